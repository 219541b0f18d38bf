use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use regex::Regex;
use url::Url;

use crate::cli::WatchArgs;
use crate::config::{DependantConfig, QueueConfig};
use crate::dependants::{DependantKind, DependantTracker};
use crate::events::{EventBus, EventKey, ScrapeEvent};
use crate::feed::JsonFeedHook;
use crate::hooks::HookRegistry;
use crate::jobs::{JobQueue, ProcessMemoryProbe};
use crate::orchestrator::Orchestrator;

const EVENT_KEYS: [EventKey; 8] = [
    EventKey::Toc,
    EventKey::News,
    EventKey::Feed,
    EventKey::List,
    EventKey::TocError,
    EventKey::NewsError,
    EventKey::FeedError,
    EventKey::ListError,
];

/// Scrapes every feed periodically and prints each event as a JSON line on
/// stdout until Ctrl-C.
pub async fn run(args: WatchArgs) -> anyhow::Result<()> {
    let feeds = args
        .feeds
        .iter()
        .map(|raw| Url::parse(raw).with_context(|| format!("invalid feed url: {raw}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    for feed in &feeds {
        if !matches!(feed.scheme(), "http" | "https") {
            anyhow::bail!("feed url must be http/https: {feed}");
        }
    }

    let (queue_config, dependant_config) = configs(&args, |key| std::env::var(key).ok())?;
    tracing::info!(
        feeds = feeds.len(),
        max_active = queue_config.max_active,
        memory_limit_bytes = ?queue_config.memory_limit_bytes,
        interval_secs = dependant_config.toc_interval.as_secs(),
        "watch: starting"
    );

    let events = EventBus::new();
    for key in EVENT_KEYS {
        events.on(key, print_event);
    }

    let mut hooks = HookRegistry::new();
    let domain = Regex::new(r"^https?://").context("compile feed domain pattern")?;
    hooks
        .register(JsonFeedHook::new()?.hook("json-feed", domain))
        .context("register json feed hook")?;

    let queue = JobQueue::new(queue_config, Arc::new(ProcessMemoryProbe::new()));
    let tracker = DependantTracker::new(queue, events, dependant_config);
    let orchestrator = Orchestrator::new(hooks, tracker).context("build orchestrator")?;

    for feed in &feeds {
        orchestrator
            .add_toc_link(feed, DependantKind::Toc)
            .with_context(|| format!("track feed {feed}"))?;
    }
    orchestrator.start();

    tokio::signal::ctrl_c()
        .await
        .context("wait for ctrl-c")?;

    let stats = orchestrator.tracker().queue().stats();
    tracing::info!(
        active = stats.active,
        waiting = stats.waiting,
        reschedules = stats.reschedules,
        "watch: stopping"
    );
    orchestrator.stop();
    Ok(())
}

/// `TOCWATCH_*` values from `lookup`, overridden by the command line flags.
fn configs(
    args: &WatchArgs,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<(QueueConfig, DependantConfig)> {
    let mut queue = QueueConfig::from_lookup(&lookup).context("load queue config")?;
    if let Some(max_active) = args.max_active {
        if max_active == 0 {
            anyhow::bail!("--max-active must be at least 1");
        }
        queue.max_active = max_active;
    }
    if let Some(limit_mb) = args.memory_limit_mb {
        queue.memory_limit_bytes = Some(limit_mb.saturating_mul(1024 * 1024));
    }

    let mut dependants = DependantConfig::from_lookup(&lookup).context("load dependant config")?;
    if let Some(secs) = args.interval_secs {
        if secs == 0 {
            anyhow::bail!("--interval-secs must be at least 1");
        }
        dependants.toc_interval = Duration::from_secs(secs);
    }
    Ok((queue, dependants))
}

fn print_event(event: &ScrapeEvent) {
    if let ScrapeEvent::Error { key, source, message } = event {
        tracing::warn!(%key, source = %source, "scrape failed: {message}");
    }
    let line = match serde_json::to_string(event) {
        Ok(line) => line,
        Err(err) => {
            tracing::warn!(key = %event.key(), "serialize event: {err}");
            return;
        }
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(err) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
        tracing::warn!("write event: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(max_active: Option<usize>, interval_secs: Option<u64>) -> WatchArgs {
        WatchArgs {
            feeds: vec!["https://example.com/toc.json".to_owned()],
            max_active,
            interval_secs,
            memory_limit_mb: Some(256),
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn flags_override_config() {
        let (queue, dependants) = configs(&args(Some(2), Some(90)), no_env).unwrap();
        assert_eq!(queue.max_active, 2);
        assert_eq!(queue.memory_limit_bytes, Some(256 * 1024 * 1024));
        assert_eq!(dependants.toc_interval, Duration::from_secs(90));
    }

    #[test]
    fn flags_win_over_environment() {
        let env = |key: &str| match key {
            "TOCWATCH_MAX_ACTIVE" => Some("9".to_owned()),
            "TOCWATCH_TOC_INTERVAL_SECS" => Some("600".to_owned()),
            "TOCWATCH_NEWS_INTERVAL_SECS" => Some("45".to_owned()),
            _ => None,
        };
        let (queue, dependants) = configs(&args(None, Some(90)), env).unwrap();
        assert_eq!(queue.max_active, 9);
        assert_eq!(dependants.toc_interval, Duration::from_secs(90));
        assert_eq!(dependants.news_interval, Duration::from_secs(45));
    }

    #[test]
    fn zero_flags_are_rejected() {
        assert!(configs(&args(Some(0), None), no_env).is_err());
        assert!(configs(&args(None, Some(0)), no_env).is_err());
    }
}
