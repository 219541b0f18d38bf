use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use url::Url;

use crate::dependants::{Dependant, DependantKind, DependantTracker, Producer, producer};
use crate::error::ScrapeError;
use crate::events::ScraperJobResult;
use crate::formats::{EpisodeContent, ListResult, SearchMedium, TocResult};
use crate::hooks::{HookRegistry, TocAdapter};
use crate::jobs::JobHandle;
use crate::toc::TocNormalizer;

/// Wires hooks, the dependant tracker and the normalizer together.
#[derive(Clone)]
pub struct Orchestrator {
    hooks: Arc<HookRegistry>,
    tracker: DependantTracker,
    normalizer: Arc<TocNormalizer>,
}

impl Orchestrator {
    pub fn new(hooks: HookRegistry, tracker: DependantTracker) -> Result<Self, ScrapeError> {
        Ok(Self {
            hooks: Arc::new(hooks),
            tracker,
            normalizer: Arc::new(TocNormalizer::new()?),
        })
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn tracker(&self) -> &DependantTracker {
        &self.tracker
    }

    pub fn start(&self) {
        self.tracker.queue().start();
    }

    /// Stops scheduling and drops queued jobs; in-flight scrapes finish.
    pub fn stop(&self) {
        let queue = self.tracker.queue();
        queue.pause();
        queue.clear();
    }

    /// Keeps scraping the TOC at `url`. `Ok(None)` means it was already tracked.
    pub fn add_toc_link(&self, url: &Url, kind: DependantKind) -> anyhow::Result<Option<JobHandle>> {
        let adapter = self
            .hooks
            .toc_adapter(url)
            .with_context(|| format!("no toc hook matches {url}"))?;
        let producer = self.toc_producer(adapter, url.clone());
        Ok(self
            .tracker
            .add_dependant(Dependant::TocLink(url.to_string()), kind, producer))
    }

    /// Runs the hook's TOC adapter once and normalizes the result.
    pub async fn scrape_toc(&self, url: &Url) -> anyhow::Result<TocResult> {
        let adapter = self
            .hooks
            .toc_adapter(url)
            .with_context(|| format!("no toc hook matches {url}"))?;
        fetch_toc(adapter.as_ref(), &self.normalizer, url).await
    }

    pub fn add_news_hook(&self, name: &str) -> anyhow::Result<Option<JobHandle>> {
        let adapter = self
            .hooks
            .news_adapter(name)
            .with_context(|| format!("hook {name:?} has no news adapter"))?;
        let hook = name.to_owned();
        let producer = producer(move || {
            let (adapter, hook) = (Arc::clone(&adapter), hook.clone());
            async move {
                let news = adapter
                    .news()
                    .await
                    .with_context(|| format!("scrape news of {hook}"))?;
                tracing::debug!(hook = %hook, episodes = news.episodes.len(), "news scraped");
                Ok(ScraperJobResult::News(news))
            }
        });
        Ok(self.tracker.add_dependant(
            Dependant::NewsHook(name.to_owned()),
            DependantKind::News,
            producer,
        ))
    }

    /// Schedules every registered news adapter; returns how many were added.
    pub fn add_all_news_hooks(&self) -> anyhow::Result<usize> {
        let names: Vec<String> = self
            .hooks
            .news_adapters()
            .map(|(name, _)| name.to_owned())
            .collect();
        let mut added = 0;
        for name in names {
            if self.add_news_hook(&name)?.is_some() {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Fetches a tracked user's lists once. Every returned TOC link that is
    /// not tracked yet gets a one-shot child job.
    pub fn add_external_user<F, Fut>(&self, user: impl Into<String>, fetch: F) -> Option<JobHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ListResult>> + Send + 'static,
    {
        let dependant = Dependant::ExternalUser(user.into());
        let orchestrator = self.clone();
        let owner = dependant.clone();
        let producer = producer(move || {
            let (orchestrator, owner) = (orchestrator.clone(), owner.clone());
            let lists = fetch();
            async move {
                let list = lists.await.with_context(|| format!("fetch lists of {owner}"))?;
                orchestrator.schedule_list_links(&owner, &list);
                Ok(ScraperJobResult::List(list))
            }
        });
        self.tracker
            .add_dependant(dependant, DependantKind::OneTimeUser, producer)
    }

    /// Asks every search adapter in registration order; first hit wins.
    pub async fn search_toc(&self, medium: &SearchMedium) -> Option<TocResult> {
        for (hook, adapter) in self.hooks.search_adapters() {
            match adapter.search(medium).await {
                Ok(Some(toc)) => {
                    tracing::info!(hook, medium = medium.id, url = %toc.url, "toc found");
                    return Some(toc);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(hook, medium = medium.id, "toc search failed: {err:#}");
                }
            }
        }
        None
    }

    pub async fn download_content(&self, url: &Url) -> anyhow::Result<Vec<EpisodeContent>> {
        let adapter = self
            .hooks
            .content_adapter(url)
            .with_context(|| format!("no content hook matches {url}"))?;
        adapter
            .content(url)
            .await
            .with_context(|| format!("download episode content {url}"))
    }

    fn schedule_list_links(&self, owner: &Dependant, list: &ListResult) {
        let Some(parent) = self.tracker.handle_of(owner) else {
            tracing::debug!(%owner, "list owner no longer tracked");
            return;
        };
        for link in &list.toc_links {
            let url = match Url::parse(link) {
                Ok(url) => url,
                Err(err) => {
                    tracing::warn!(%owner, link = %link, "skip invalid toc link: {err}");
                    continue;
                }
            };
            let Some(adapter) = self.hooks.toc_adapter(&url) else {
                tracing::debug!(%owner, %url, "no toc hook for listed link");
                continue;
            };
            let producer = self.toc_producer(adapter, url.clone());
            self.tracker.add_child_dependant(
                &parent,
                Dependant::TocLink(url.to_string()),
                DependantKind::OneTimeToc,
                producer,
            );
        }
    }

    fn toc_producer(&self, adapter: Arc<dyn TocAdapter>, url: Url) -> Producer {
        let normalizer = Arc::clone(&self.normalizer);
        producer(move || {
            let (adapter, normalizer, url) =
                (Arc::clone(&adapter), Arc::clone(&normalizer), url.clone());
            async move {
                let toc = fetch_toc(adapter.as_ref(), &normalizer, &url).await?;
                Ok(ScraperJobResult::Toc(toc))
            }
        })
    }
}

async fn fetch_toc(
    adapter: &dyn TocAdapter,
    normalizer: &TocNormalizer,
    url: &Url,
) -> anyhow::Result<TocResult> {
    let rows = adapter
        .toc(url)
        .await
        .with_context(|| format!("scrape toc {url}"))?;
    let normalized = normalizer.normalize(rows);
    tracing::debug!(
        %url,
        contents = normalized.contents.len(),
        anomalies = normalized.anomalies.len(),
        "toc normalized"
    );
    Ok(TocResult {
        url: url.to_string(),
        contents: normalized.contents,
        meta: normalized.meta,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use regex::Regex;

    use super::*;
    use crate::config::{DependantConfig, QueueConfig};
    use crate::events::{EventBus, EventKey, ScrapeEvent};
    use crate::formats::{NewsResult, TocContent, TocInput, TocPiece};
    use crate::hooks::{ContentAdapter, Hook, NewsAdapter, TocSearchAdapter};
    use crate::jobs::{FixedMemoryProbe, JobQueue};

    struct Chapters(u32);

    #[async_trait]
    impl TocAdapter for Chapters {
        async fn toc(&self, url: &Url) -> anyhow::Result<Vec<TocInput>> {
            Ok((1..=self.0)
                .map(|n| {
                    TocInput::Piece(TocPiece {
                        title: format!("Chapter {n}"),
                        url: format!("{url}/{n}"),
                        release_date: None,
                        locked: false,
                    })
                })
                .collect())
        }
    }

    struct Search(Option<&'static str>);

    #[async_trait]
    impl TocSearchAdapter for Search {
        async fn search(&self, medium: &SearchMedium) -> anyhow::Result<Option<TocResult>> {
            match self.0 {
                Some(url) => Ok(Some(TocResult {
                    url: format!("{url}/{}", medium.id),
                    contents: Vec::new(),
                    meta: None,
                })),
                None => anyhow::bail!("search unavailable"),
            }
        }
    }

    struct Headlines;

    #[async_trait]
    impl NewsAdapter for Headlines {
        async fn news(&self) -> anyhow::Result<NewsResult> {
            Ok(NewsResult::default())
        }
    }

    struct Body;

    #[async_trait]
    impl ContentAdapter for Body {
        async fn content(&self, url: &Url) -> anyhow::Result<Vec<EpisodeContent>> {
            Ok(vec![EpisodeContent {
                medium_title: "Novel".to_owned(),
                episode_title: url.path().to_owned(),
                index: Some(1.0),
                content: vec!["text".to_owned()],
            }])
        }
    }

    fn orchestrator() -> Orchestrator {
        let mut hooks = HookRegistry::new();
        hooks
            .register(
                Hook::new("novels")
                    .domain(Regex::new(r"novels\.example\.com").unwrap())
                    .toc(Chapters(3))
                    .content(Body),
            )
            .unwrap();
        hooks.register(Hook::new("broken").search(Search(None))).unwrap();
        hooks.register(Hook::new("daily").news(Headlines)).unwrap();
        hooks.register(Hook::new("weekly").news(Headlines)).unwrap();
        hooks
            .register(Hook::new("finder").search(Search(Some("https://novels.example.com/m"))))
            .unwrap();
        let queue = JobQueue::new(QueueConfig::default(), Arc::new(FixedMemoryProbe(None)));
        let tracker = DependantTracker::new(queue, EventBus::new(), DependantConfig::default());
        Orchestrator::new(hooks, tracker).unwrap()
    }

    fn capture(orchestrator: &Orchestrator, key: EventKey) -> Arc<Mutex<Vec<ScrapeEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        orchestrator
            .tracker()
            .events()
            .on(key, move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[tokio::test(start_paused = true)]
    async fn toc_link_emits_normalized_toc() {
        let orchestrator = orchestrator();
        let events = capture(&orchestrator, EventKey::Toc);
        let url = Url::parse("https://novels.example.com/series").unwrap();
        assert!(orchestrator.add_toc_link(&url, DependantKind::Toc).unwrap().is_some());
        assert!(orchestrator.add_toc_link(&url, DependantKind::Toc).unwrap().is_none());
        orchestrator.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let events = events.lock().unwrap();
        let [ScrapeEvent::Result(ScraperJobResult::Toc(toc))] = events.as_slice() else {
            panic!("expected one toc event, got {events:?}");
        };
        assert_eq!(toc.url, "https://novels.example.com/series");
        let indices: Vec<i64> = toc
            .contents
            .iter()
            .map(|content| match content {
                TocContent::Episode(episode) => episode.total_index,
                TocContent::Part(part) => part.total_index,
            })
            .collect();
        assert_eq!(indices, [1, 2, 3]);
    }

    #[test]
    fn unknown_toc_domain_is_an_error() {
        let orchestrator = orchestrator();
        let url = Url::parse("https://elsewhere.org/toc").unwrap();
        let err = orchestrator
            .add_toc_link(&url, DependantKind::Toc)
            .unwrap_err()
            .to_string();
        assert!(err.contains("no toc hook"));
    }

    #[tokio::test(start_paused = true)]
    async fn external_user_lists_spawn_child_toc_jobs() {
        let orchestrator = orchestrator();
        let tocs = capture(&orchestrator, EventKey::Toc);
        let lists = capture(&orchestrator, EventKey::List);
        let handle = orchestrator
            .add_external_user("reader", || async {
                Ok(ListResult {
                    user: "reader".to_owned(),
                    toc_links: vec![
                        "https://novels.example.com/a".to_owned(),
                        "https://unknown.org/b".to_owned(),
                        "not a url".to_owned(),
                    ],
                })
            })
            .unwrap();
        orchestrator.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(lists.lock().unwrap().len(), 1);
        assert_eq!(tocs.lock().unwrap().len(), 1);
        assert!(handle.info().is_none());
        assert!(orchestrator.tracker().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn every_news_hook_is_scheduled_once() {
        let orchestrator = orchestrator();
        let news = capture(&orchestrator, EventKey::News);
        assert_eq!(orchestrator.add_all_news_hooks().unwrap(), 2);
        assert_eq!(orchestrator.add_all_news_hooks().unwrap(), 0);
        assert!(
            orchestrator
                .tracker()
                .is_tracked(&Dependant::NewsHook("weekly".to_owned()))
        );
        orchestrator.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(news.lock().unwrap().len(), 2);
        assert_eq!(orchestrator.tracker().len(), 2);
    }

    #[tokio::test]
    async fn search_skips_failing_adapters() {
        let orchestrator = orchestrator();
        let medium = SearchMedium {
            id: 7,
            title: "Novel".to_owned(),
            synonyms: Vec::new(),
        };
        let toc = orchestrator.search_toc(&medium).await.unwrap();
        assert_eq!(toc.url, "https://novels.example.com/m/7");
    }

    #[tokio::test]
    async fn content_is_downloaded_through_domain_hook() {
        let orchestrator = orchestrator();
        let url = Url::parse("https://novels.example.com/chapter-1").unwrap();
        let content = orchestrator.download_content(&url).await.unwrap();
        assert_eq!(content[0].episode_title, "/chapter-1");

        let url = Url::parse("https://elsewhere.org/chapter-1").unwrap();
        assert!(orchestrator.download_content(&url).await.is_err());
    }

    #[tokio::test]
    async fn scrape_toc_runs_once_without_scheduling() {
        let orchestrator = orchestrator();
        let url = Url::parse("https://novels.example.com/series").unwrap();
        let toc = orchestrator.scrape_toc(&url).await.unwrap();
        assert_eq!(toc.contents.len(), 3);
        assert!(orchestrator.tracker().queue().jobs().is_empty());
    }
}
