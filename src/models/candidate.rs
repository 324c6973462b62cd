use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A freshly fetched article that has not been checked against the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub source: String,
    pub title: String,
    pub url: String,
    pub raw_content: String,
    /// Publication date as text, parsed into a timestamp when the post is
    /// stored. The feed parser does not keep the element's raw text, so this
    /// is its publish (else update) date rendered as RFC 2822, or empty when
    /// the feed's date was missing or unparsable.
    pub published_at: String,
    pub collected_at: DateTime<Utc>,
    pub content_hash: String,
}

impl Candidate {
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        raw_content: impl Into<String>,
        published_at: impl Into<String>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        let content_hash = content_hash(&url);
        Self {
            source: source.into(),
            title: title.into(),
            url,
            raw_content: raw_content.into(),
            published_at: published_at.into(),
            collected_at,
            content_hash,
        }
    }
}

/// SHA-256 of the normalized url, lowercase hex.
///
/// Normalization trims whitespace and, for parsable urls, drops the fragment
/// and lower-cases scheme and host through the canonical serialization.
pub fn content_hash(url: &str) -> String {
    let normalized = normalize_url(url);
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}
