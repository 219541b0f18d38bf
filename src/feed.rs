//! TOC adapter for sites that publish their listing as JSON.

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, USER_AGENT};
use url::Url;

use crate::formats::TocInput;
use crate::hooks::{Hook, TocAdapter};

const AGENT: &str = concat!("tocwatch/", env!("CARGO_PKG_VERSION"));

/// Fetches a JSON array of raw rows (`TocInput`) from the TOC url.
#[derive(Debug, Clone)]
pub struct JsonFeedHook {
    client: reqwest::Client,
}

impl JsonFeedHook {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build feed http client")?;
        Ok(Self { client })
    }

    /// Hook named `name` serving every url matching `domain`.
    pub fn hook(self, name: impl Into<String>, domain: Regex) -> Hook {
        Hook::new(name).domain(domain).toc(self)
    }
}

#[async_trait]
impl TocAdapter for JsonFeedHook {
    async fn toc(&self, url: &Url) -> anyhow::Result<Vec<TocInput>> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, AGENT)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GET {url} failed ({status}): {}", body.trim());
        }

        let rows: Vec<TocInput> = response
            .json()
            .await
            .with_context(|| format!("decode toc rows from {url}"))?;
        tracing::debug!(%url, rows = rows.len(), "feed fetched");
        Ok(rows)
    }
}
