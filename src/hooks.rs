//! Registry of site adapters keyed by hook name and domain pattern.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use crate::error::ScrapeError;
use crate::formats::{EpisodeContent, NewsResult, SearchMedium, TocInput, TocResult};

/// Produces the raw rows of one medium's table of contents.
#[async_trait]
pub trait TocAdapter: Send + Sync {
    async fn toc(&self, url: &Url) -> anyhow::Result<Vec<TocInput>>;
}

#[async_trait]
pub trait NewsAdapter: Send + Sync {
    async fn news(&self) -> anyhow::Result<NewsResult>;
}

#[async_trait]
pub trait ContentAdapter: Send + Sync {
    async fn content(&self, url: &Url) -> anyhow::Result<Vec<EpisodeContent>>;
}

#[async_trait]
pub trait TocSearchAdapter: Send + Sync {
    async fn search(&self, medium: &SearchMedium) -> anyhow::Result<Option<TocResult>>;
}

/// Adapter bundle registered by one site module.
pub struct Hook {
    name: String,
    domain: Option<Regex>,
    toc: Option<Arc<dyn TocAdapter>>,
    news: Option<Arc<dyn NewsAdapter>>,
    content: Option<Arc<dyn ContentAdapter>>,
    search: Option<Arc<dyn TocSearchAdapter>>,
}

impl Hook {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: None,
            toc: None,
            news: None,
            content: None,
            search: None,
        }
    }

    pub fn domain(mut self, pattern: Regex) -> Self {
        self.domain = Some(pattern);
        self
    }

    pub fn toc(mut self, adapter: impl TocAdapter + 'static) -> Self {
        self.toc = Some(Arc::new(adapter));
        self
    }

    pub fn news(mut self, adapter: impl NewsAdapter + 'static) -> Self {
        self.news = Some(Arc::new(adapter));
        self
    }

    pub fn content(mut self, adapter: impl ContentAdapter + 'static) -> Self {
        self.content = Some(Arc::new(adapter));
        self
    }

    pub fn search(mut self, adapter: impl TocSearchAdapter + 'static) -> Self {
        self.search = Some(Arc::new(adapter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Filled once at startup; lookups afterwards are read-only.
#[derive(Default)]
pub struct HookRegistry {
    names: HashSet<String>,
    toc: Vec<(Regex, Arc<dyn TocAdapter>)>,
    content: Vec<(Regex, Arc<dyn ContentAdapter>)>,
    news: Vec<(String, Arc<dyn NewsAdapter>)>,
    search: Vec<(String, Arc<dyn TocSearchAdapter>)>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Hook) -> Result<(), ScrapeError> {
        if self.names.contains(&hook.name) {
            return Err(ScrapeError::DuplicateHook { name: hook.name });
        }
        let needs_domain = hook.toc.is_some() || hook.content.is_some();
        if needs_domain && hook.domain.is_none() {
            return Err(ScrapeError::InvalidHook {
                name: hook.name,
                reason: "toc and content adapters need a domain pattern".to_owned(),
            });
        }
        if hook.toc.is_none() && hook.news.is_none() && hook.content.is_none() && hook.search.is_none()
        {
            return Err(ScrapeError::InvalidHook {
                name: hook.name,
                reason: "no adapter given".to_owned(),
            });
        }

        let Hook {
            name,
            domain,
            toc,
            news,
            content,
            search,
        } = hook;
        if let Some(domain) = &domain {
            if let Some(toc) = toc {
                self.toc.push((domain.clone(), toc));
            }
            if let Some(content) = content {
                self.content.push((domain.clone(), content));
            }
        }
        if let Some(news) = news {
            self.news.push((name.clone(), news));
        }
        if let Some(search) = search {
            self.search.push((name.clone(), search));
        }
        tracing::debug!(hook = %name, domain = ?domain.as_ref().map(Regex::as_str), "hook registered");
        self.names.insert(name);
        Ok(())
    }

    pub fn toc_adapter(&self, url: &Url) -> Option<Arc<dyn TocAdapter>> {
        first_match(&self.toc, url)
    }

    pub fn content_adapter(&self, url: &Url) -> Option<Arc<dyn ContentAdapter>> {
        first_match(&self.content, url)
    }

    pub fn news_adapter(&self, name: &str) -> Option<Arc<dyn NewsAdapter>> {
        self.news
            .iter()
            .find(|(hook, _)| hook == name)
            .map(|(_, adapter)| Arc::clone(adapter))
    }

    pub fn news_adapters(&self) -> impl Iterator<Item = (&str, &Arc<dyn NewsAdapter>)> {
        self.news.iter().map(|(name, adapter)| (name.as_str(), adapter))
    }

    /// Search adapters in registration order.
    pub fn search_adapters(&self) -> impl Iterator<Item = (&str, &Arc<dyn TocSearchAdapter>)> {
        self.search
            .iter()
            .map(|(name, adapter)| (name.as_str(), adapter))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// First pattern matching the full url or its host wins.
fn first_match<A: ?Sized>(entries: &[(Regex, Arc<A>)], url: &Url) -> Option<Arc<A>> {
    let host = url.host_str();
    entries
        .iter()
        .find(|(pattern, _)| {
            pattern.is_match(url.as_str()) || host.is_some_and(|host| pattern.is_match(host))
        })
        .map(|(_, adapter)| Arc::clone(adapter))
}
