use std::collections::BTreeMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::fetcher::{entry_text, FeedFetcher};
use crate::error::Result;
use crate::models::FeedSource;

/// The list of feeds one run collects from.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: Vec<FeedSource>,
}

impl SourceCatalog {
    pub fn new(sources: Vec<FeedSource>) -> Self {
        Self { sources }
    }

    /// Load a `.json` map of base64-encoded name to feed url, or an OPML
    /// subscription list.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_opml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("opml") || e.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);

        if is_opml {
            Self::from_opml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let entries: BTreeMap<String, String> = serde_json::from_str(content)?;
        let sources = entries
            .into_iter()
            .map(|(source_id, feed_url)| {
                let display_name = decode_name(&source_id);
                FeedSource::new(source_id, display_name, feed_url)
            })
            .collect();
        Ok(Self { sources })
    }

    pub fn from_opml(content: &str) -> Result<Self> {
        let document = opml::OPML::from_str(content)?;

        let mut sources = Vec::new();
        let mut pending: Vec<&opml::Outline> = document.body.outlines.iter().collect();
        while let Some(outline) = pending.pop() {
            if let Some(xml_url) = &outline.xml_url {
                let name = outline.title.clone().unwrap_or_else(|| outline.text.clone());
                sources.push(FeedSource::new(encode_name(&name), name, xml_url.clone()));
            }
            pending.extend(outline.outlines.iter());
        }

        sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        sources.dedup_by(|a, b| a.feed_url == b.feed_url);
        Ok(Self { sources })
    }

    /// Serialize back to the JSON catalog format.
    pub fn to_json(&self) -> Result<String> {
        let entries: BTreeMap<&str, &str> = self
            .sources
            .iter()
            .map(|s| (s.source_id.as_str(), s.feed_url.as_str()))
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn into_sources(self) -> Vec<FeedSource> {
        self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

pub fn encode_name(name: &str) -> String {
    STANDARD.encode(name.as_bytes())
}

/// Decode a catalog identifier; identifiers that are not base64 UTF-8 are
/// shown as-is.
pub fn decode_name(source_id: &str) -> String {
    STANDARD
        .decode(source_id)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| source_id.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedMeasurement {
    pub source: FeedSource,
    pub entries: usize,
    pub average_chars: f64,
    pub accepted: bool,
}

/// Measure the average plain-text entry length of every feed and keep those
/// at or above `min_avg_chars`. Unreachable feeds are rejected.
pub async fn curate(
    fetcher: &FeedFetcher,
    sources: Vec<FeedSource>,
    min_avg_chars: usize,
    width: usize,
) -> (SourceCatalog, Vec<FeedMeasurement>) {
    let mut measurements: Vec<FeedMeasurement> = stream::iter(sources)
        .map(|source| async move {
            let (entries, average_chars) = match fetcher.fetch_document(&source.feed_url).await {
                Ok(feed) => {
                    let lengths: Vec<usize> = feed
                        .entries
                        .iter()
                        .map(|e| entry_text(e).map(|t| t.chars().count()).unwrap_or(0))
                        .collect();
                    (lengths.len(), average(&lengths))
                }
                Err(e) => {
                    tracing::warn!(source = %source.display_name, error = %e, "curation fetch failed");
                    (0, 0.0)
                }
            };

            let accepted = entries > 0 && average_chars >= min_avg_chars as f64;
            tracing::info!(
                source = %source.display_name,
                entries,
                average_chars,
                accepted,
                "measured feed"
            );

            FeedMeasurement {
                source,
                entries,
                average_chars,
                accepted,
            }
        })
        .buffer_unordered(width.max(1))
        .collect()
        .await;

    measurements.sort_by(|a, b| a.source.source_id.cmp(&b.source.source_id));

    let accepted = measurements
        .iter()
        .filter(|m| m.accepted)
        .map(|m| m.source.clone())
        .collect();

    (SourceCatalog::new(accepted), measurements)
}

fn average(lengths: &[usize]) -> f64 {
    if lengths.is_empty() {
        return 0.0;
    }
    lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
}
