//! Maps things that must keep being scraped to the job servicing them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::BoxFuture;

use crate::config::DependantConfig;
use crate::events::{EventBus, EventKey, ScrapeEvent, ScraperJobResult};
use crate::jobs::{JobHandle, JobId, JobQueue, Work};

/// External identity kept alive by exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependant {
    TocLink(String),
    NewsHook(String),
    Feed(String),
    ExternalUser(String),
}

impl fmt::Display for Dependant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TocLink(link) => write!(f, "toc {link}"),
            Self::NewsHook(name) => write!(f, "news {name}"),
            Self::Feed(link) => write!(f, "feed {link}"),
            Self::ExternalUser(user) => write!(f, "user {user}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependantKind {
    Toc,
    News,
    Feed,
    OneTimeToc,
    OneTimeUser,
}

impl DependantKind {
    /// `None` for one-shot kinds.
    pub fn interval(self, config: &DependantConfig) -> Option<Duration> {
        match self {
            Self::Toc => Some(config.toc_interval),
            Self::News => Some(config.news_interval),
            Self::Feed => Some(config.feed_interval),
            Self::OneTimeToc | Self::OneTimeUser => None,
        }
    }

    pub fn event_key(self) -> EventKey {
        match self {
            Self::Toc | Self::OneTimeToc => EventKey::Toc,
            Self::News => EventKey::News,
            Self::Feed => EventKey::Feed,
            Self::OneTimeUser => EventKey::List,
        }
    }
}

pub type Producer =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<ScraperJobResult>> + Send + Sync>;

pub fn producer<F, Fut>(f: F) -> Producer
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ScraperJobResult>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

type Tracked = Arc<Mutex<HashMap<Dependant, JobHandle>>>;

#[derive(Clone)]
pub struct DependantTracker {
    queue: JobQueue,
    events: EventBus,
    config: DependantConfig,
    tracked: Tracked,
}

enum Owner<'a> {
    Queue,
    Parent(&'a JobHandle),
}

impl DependantTracker {
    pub fn new(queue: JobQueue, events: EventBus, config: DependantConfig) -> Self {
        Self {
            queue,
            events,
            config,
            tracked: Arc::default(),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Schedules `producer` for `dependant`. Returns `None` without scheduling
    /// anything when the dependant is already tracked.
    pub fn add_dependant(
        &self,
        dependant: Dependant,
        kind: DependantKind,
        producer: Producer,
    ) -> Option<JobHandle> {
        self.track(Owner::Queue, dependant, kind, producer)
    }

    /// Like [`DependantTracker::add_dependant`], with the job recorded as a
    /// child of `parent`.
    pub fn add_child_dependant(
        &self,
        parent: &JobHandle,
        dependant: Dependant,
        kind: DependantKind,
        producer: Producer,
    ) -> Option<JobHandle> {
        self.track(Owner::Parent(parent), dependant, kind, producer)
    }

    pub fn remove_dependant(&self, dependant: &Dependant) -> bool {
        let Some(handle) = lock(&self.tracked).remove(dependant) else {
            return false;
        };
        tracing::debug!(%dependant, job_id = %handle.id(), "dependant removed");
        self.queue.remove_job(&handle);
        true
    }

    pub fn is_tracked(&self, dependant: &Dependant) -> bool {
        lock(&self.tracked).contains_key(dependant)
    }

    pub fn handle_of(&self, dependant: &Dependant) -> Option<JobHandle> {
        lock(&self.tracked).get(dependant).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.tracked).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tracked).is_empty()
    }

    fn track(
        &self,
        owner: Owner<'_>,
        dependant: Dependant,
        kind: DependantKind,
        producer: Producer,
    ) -> Option<JobHandle> {
        // Held until the handle is stored so a fast first run cannot untrack
        // before the insert.
        let mut tracked = lock(&self.tracked);
        if tracked.contains_key(&dependant) {
            tracing::debug!(%dependant, "dependant already tracked");
            return None;
        }

        let interval = kind.interval(&self.config);
        let work = self.producer_work(producer);
        let setup = |handle: &JobHandle| self.register_callbacks(handle, &dependant, kind);
        let handle = match owner {
            Owner::Queue => self.queue.add_job_with(work, interval, setup),
            Owner::Parent(parent) => parent.add_child_job_with(work, interval, setup),
        };
        tracing::info!(%dependant, job_id = %handle.id(), ?interval, "dependant added");
        tracked.insert(dependant, handle.clone());
        Some(handle)
    }

    fn producer_work(&self, producer: Producer) -> Work {
        let events = self.events.clone();
        Work::new(move || {
            let events = events.clone();
            let run = producer();
            async move {
                let result = run.await?;
                events.emit(ScrapeEvent::Result(result));
                Ok(())
            }
        })
    }

    fn register_callbacks(&self, handle: &JobHandle, dependant: &Dependant, kind: DependantKind) {
        let id = handle.id();
        {
            let (events, queue, tracked, dependant) = (
                self.events.clone(),
                self.queue.clone(),
                Arc::clone(&self.tracked),
                dependant.clone(),
            );
            handle.on_failure(move |err| {
                events.emit(ScrapeEvent::error(
                    kind.event_key(),
                    dependant.to_string(),
                    err,
                ));
                if let Some(handle) = untrack(&tracked, &dependant, id) {
                    queue.remove_job(&handle);
                }
            });
        }
        if kind.interval(&self.config).is_none() {
            let (tracked, dependant) = (Arc::clone(&self.tracked), dependant.clone());
            handle.on_done(move || {
                untrack(&tracked, &dependant, id);
            });
        }
    }
}

fn lock(tracked: &Tracked) -> MutexGuard<'_, HashMap<Dependant, JobHandle>> {
    tracked.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops the mapping only if it still points at job `id`.
fn untrack(tracked: &Tracked, dependant: &Dependant, id: JobId) -> Option<JobHandle> {
    let mut tracked = lock(tracked);
    if tracked.get(dependant).is_some_and(|handle| handle.id() == id) {
        return tracked.remove(dependant);
    }
    None
}
