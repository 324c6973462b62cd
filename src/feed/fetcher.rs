use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{Candidate, FeedSource};

const USER_AGENT: &str = "rss-insight/0.1";
const TEXT_WIDTH: usize = 1000;

/// Raw document retrieval, separated from parsing so tests can serve
/// canned feeds.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        Ok(response.bytes().await?)
    }
}

/// What one source produced.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub candidates: Vec<Candidate>,
    /// Entries dropped for missing required fields.
    pub skipped: usize,
    /// Set when the source as a whole failed.
    pub error: Option<String>,
}

pub struct FeedFetcher {
    transport: Arc<dyn FeedTransport>,
}

impl FeedFetcher {
    pub fn new(transport: Arc<dyn FeedTransport>) -> Self {
        Self { transport }
    }

    pub fn http() -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?)))
    }

    /// Fetch one source. Any failure of the source as a whole is logged and
    /// yields no candidates so sibling sources are unaffected.
    pub async fn fetch(&self, source: &FeedSource) -> FetchOutcome {
        match self.try_fetch(source).await {
            Ok(outcome) => {
                tracing::info!(
                    source = %source.display_name,
                    count = outcome.candidates.len(),
                    skipped = outcome.skipped,
                    "fetched feed"
                );
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    source = %source.display_name,
                    url = %source.feed_url,
                    error = %e,
                    "feed fetch failed"
                );
                FetchOutcome {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    pub async fn try_fetch(&self, source: &FeedSource) -> Result<FetchOutcome> {
        let bytes = self.transport.get(&source.feed_url).await?;
        parse_entries(&source.display_name, &bytes, Utc::now())
    }

    /// Fetch all sources concurrently, at most `width` at a time.
    pub async fn fetch_all(
        &self,
        sources: Vec<FeedSource>,
        width: usize,
    ) -> Vec<(FeedSource, FetchOutcome)> {
        stream::iter(sources)
            .map(|source| async move {
                let outcome = self.fetch(&source).await;
                (source, outcome)
            })
            .buffer_unordered(width.max(1))
            .collect()
            .await
    }

    /// Fetch the raw document; used by catalog curation.
    pub async fn fetch_document(&self, url: &str) -> Result<feed_rs::model::Feed> {
        let bytes = self.transport.get(url).await?;
        Ok(parser::parse(&bytes[..])?)
    }
}

/// Parse a feed document into candidates for `source`.
pub fn parse_entries(source: &str, bytes: &[u8], collected_at: DateTime<Utc>) -> Result<FetchOutcome> {
    let feed = parser::parse(bytes)?;

    let mut outcome = FetchOutcome::default();
    for entry in feed.entries {
        match normalize_entry(source, entry, collected_at) {
            Ok(candidate) => outcome.candidates.push(candidate),
            Err(e) => {
                tracing::warn!(source, error = %e, "skipping feed entry");
                outcome.skipped += 1;
            }
        }
    }

    Ok(outcome)
}

fn normalize_entry(source: &str, entry: Entry, collected_at: DateTime<Utc>) -> Result<Candidate> {
    let url = entry
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
        .ok_or_else(|| AppError::Other(anyhow::anyhow!("entry {} has no link", entry.id)))?;

    let raw_content = entry_text(&entry).unwrap_or_default();

    let published_at = entry
        .published
        .or(entry.updated)
        .map(|dt| dt.to_rfc2822())
        .unwrap_or_default();

    let title = entry
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled".to_string());

    Ok(Candidate::new(
        source,
        title,
        url,
        raw_content,
        published_at,
        collected_at,
    ))
}

/// Body text, preferring full content, then summary, then a media
/// description; markup is rendered to plain text.
pub(crate) fn entry_text(entry: &Entry) -> Option<String> {
    let html = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .or_else(|| {
            entry
                .media
                .iter()
                .find_map(|m| m.description.as_ref().map(|d| d.content.clone()))
        })?;

    html_to_text(&html)
}

pub fn html_to_text(html: &str) -> Option<String> {
    let text = match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            return None;
        }
    };

    let cleaned = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Some(cleaned)
}
