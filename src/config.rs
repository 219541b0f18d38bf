use std::time::Duration;

use anyhow::Context as _;

/// Scheduler limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Jobs allowed to run at the same time.
    pub max_active: usize,
    /// Resident memory above which no new job is started.
    pub memory_limit_bytes: Option<u64>,
    /// Delay before the next scheduling attempt while deferring.
    pub tick_delay: Duration,
    /// Consecutive deferrals between two stall warnings.
    pub stall_log_every: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_active: 5,
            memory_limit_bytes: None,
            tick_delay: Duration::from_secs(1),
            stall_log_every: 50,
        }
    }
}

impl QueueConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(max_active) = parse_var::<usize>(&lookup, "TOCWATCH_MAX_ACTIVE")? {
            if max_active == 0 {
                anyhow::bail!("TOCWATCH_MAX_ACTIVE must be at least 1");
            }
            config.max_active = max_active;
        }
        if let Some(limit_mb) = parse_var::<u64>(&lookup, "TOCWATCH_MEMORY_LIMIT_MB")? {
            config.memory_limit_bytes = Some(limit_mb.saturating_mul(1024 * 1024));
        }
        if let Some(delay_ms) = parse_var::<u64>(&lookup, "TOCWATCH_TICK_DELAY_MS")? {
            config.tick_delay = Duration::from_millis(delay_ms.max(1));
        }
        Ok(config)
    }
}

/// Re-scrape intervals of periodic dependants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependantConfig {
    pub toc_interval: Duration,
    pub news_interval: Duration,
    pub feed_interval: Duration,
}

impl Default for DependantConfig {
    fn default() -> Self {
        Self {
            toc_interval: Duration::from_secs(60 * 60),
            news_interval: Duration::from_secs(5 * 60),
            feed_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl DependantConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        for (key, slot) in [
            ("TOCWATCH_TOC_INTERVAL_SECS", &mut config.toc_interval),
            ("TOCWATCH_NEWS_INTERVAL_SECS", &mut config.news_interval),
            ("TOCWATCH_FEED_INTERVAL_SECS", &mut config.feed_interval),
        ] {
            if let Some(secs) = parse_var::<u64>(&lookup, key)? {
                if secs == 0 {
                    anyhow::bail!("{key} must be at least 1");
                }
                *slot = Duration::from_secs(secs);
            }
        }
        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value = raw
        .parse::<T>()
        .with_context(|| format!("invalid {key}={raw:?}"))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = QueueConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.max_active, 5);
    }

    #[test]
    fn reads_queue_limits() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("TOCWATCH_MAX_ACTIVE", " 8 "),
            ("TOCWATCH_MEMORY_LIMIT_MB", "512"),
            ("TOCWATCH_TICK_DELAY_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.max_active, 8);
        assert_eq!(config.memory_limit_bytes, Some(512 * 1024 * 1024));
        assert_eq!(config.tick_delay, Duration::from_millis(250));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = QueueConfig::from_lookup(lookup(&[("TOCWATCH_MAX_ACTIVE", "many")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("TOCWATCH_MAX_ACTIVE"));

        let err = QueueConfig::from_lookup(lookup(&[("TOCWATCH_MAX_ACTIVE", "0")]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("at least 1"));
    }

    #[test]
    fn reads_dependant_intervals() {
        let config =
            DependantConfig::from_lookup(lookup(&[("TOCWATCH_NEWS_INTERVAL_SECS", "30")])).unwrap();
        assert_eq!(config.news_interval, Duration::from_secs(30));
        assert_eq!(config.toc_interval, DependantConfig::default().toc_interval);
    }
}
