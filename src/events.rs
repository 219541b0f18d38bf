//! Result surface consumed by storage and push layers.
//!
//! Callbacks registered with [`EventBus::on`] run synchronously in
//! registration order. [`EventBus::subscribe`] additionally exposes every
//! event on a broadcast channel; slow receivers may lag and miss events.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::formats::{ListResult, NewsResult, TocResult};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKey {
    Toc,
    News,
    Feed,
    List,
    TocError,
    NewsError,
    FeedError,
    ListError,
}

impl EventKey {
    /// Error counterpart of a result key; error keys map to themselves.
    pub fn error_of(self) -> Self {
        match self {
            Self::Toc | Self::TocError => Self::TocError,
            Self::News | Self::NewsError => Self::NewsError,
            Self::Feed | Self::FeedError => Self::FeedError,
            Self::List | Self::ListError => Self::ListError,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Toc => "toc",
            Self::News => "news",
            Self::Feed => "feed",
            Self::List => "list",
            Self::TocError => "toc:error",
            Self::NewsError => "news:error",
            Self::FeedError => "feed:error",
            Self::ListError => "list:error",
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value produced by one run of a scrape job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScraperJobResult {
    Toc(TocResult),
    News(NewsResult),
    Feed(NewsResult),
    List(ListResult),
}

impl ScraperJobResult {
    pub fn key(&self) -> EventKey {
        match self {
            Self::Toc(_) => EventKey::Toc,
            Self::News(_) => EventKey::News,
            Self::Feed(_) => EventKey::Feed,
            Self::List(_) => EventKey::List,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeEvent {
    Result(ScraperJobResult),
    Error {
        key: EventKey,
        /// Link, hook or user the failing job was servicing.
        source: String,
        message: String,
    },
}

impl ScrapeEvent {
    pub fn error(key: EventKey, source: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Error {
            key: key.error_of(),
            source: source.into(),
            message: format!("{err:#}"),
        }
    }

    pub fn key(&self) -> EventKey {
        match self {
            Self::Result(result) => result.key(),
            Self::Error { key, .. } => *key,
        }
    }
}

type Listener = Arc<dyn Fn(&ScrapeEvent) + Send + Sync>;

#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<EventKey, Vec<Listener>>>>,
    sender: broadcast::Sender<ScrapeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            listeners: Arc::default(),
            sender,
        }
    }

    pub fn on(&self, key: EventKey, callback: impl Fn(&ScrapeEvent) + Send + Sync + 'static) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .push(Arc::new(callback));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScrapeEvent> {
        self.sender.subscribe()
    }

    /// Delivers `event` and returns how many callbacks saw it.
    pub fn emit(&self, event: ScrapeEvent) -> usize {
        let key = event.key();
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .unwrap_or_default();
        if listeners.is_empty() && self.sender.receiver_count() == 0 {
            tracing::debug!(%key, "event without listeners");
        }
        for listener in &listeners {
            listener(&event);
        }
        // No subscribers is fine; callbacks may be the only consumers.
        let _ = self.sender.send(event);
        listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn news() -> ScrapeEvent {
        ScrapeEvent::Result(ScraperJobResult::News(NewsResult::default()))
    }

    #[test]
    fn error_keys_pair_with_result_keys() {
        assert_eq!(EventKey::Toc.error_of(), EventKey::TocError);
        assert_eq!(EventKey::ListError.error_of(), EventKey::ListError);
        assert_eq!(EventKey::FeedError.to_string(), "feed:error");
    }

    #[test]
    fn callbacks_run_in_registration_order_per_key() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            bus.on(EventKey::News, move |_| seen.lock().unwrap().push(name));
        }
        let toc_seen = Arc::clone(&seen);
        bus.on(EventKey::Toc, move |_| toc_seen.lock().unwrap().push("toc"));

        assert_eq!(bus.emit(news()), 2);
        assert_eq!(*seen.lock().unwrap(), ["first", "second"]);
    }

    #[test]
    fn errors_are_routed_to_error_key() {
        let bus = EventBus::new();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        bus.on(EventKey::TocError, move |event| {
            if let ScrapeEvent::Error { source, message, .. } = event {
                sink.lock().unwrap().push(format!("{source}: {message}"));
            }
        });

        let err = anyhow::anyhow!("timeout").context("fetch toc");
        bus.emit(ScrapeEvent::error(EventKey::Toc, "https://example.com", &err));
        assert_eq!(
            *messages.lock().unwrap(),
            ["https://example.com: fetch toc: timeout"]
        );
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.emit(news()), 0);
        assert_eq!(rx.recv().await.unwrap(), news());
    }
}
