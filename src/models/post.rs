use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use super::{Candidate, Category};
use crate::feed::parse_published_at;

/// Row written by the collection stage. Only identity and feed metadata;
/// analysis fields start out empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub id: String,
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<FixedOffset>,
    pub collected_at: DateTime<Utc>,
    pub archive_key: Option<String>,
}

impl NewPost {
    pub fn from_candidate(
        candidate: &Candidate,
        archive_key: Option<&str>,
        tz: FixedOffset,
    ) -> Self {
        Self {
            id: candidate.content_hash.clone(),
            source: candidate.source.clone(),
            title: candidate.title.clone(),
            url: candidate.url.clone(),
            published_at: parse_published_at(&candidate.published_at, tz),
            collected_at: candidate.collected_at,
            archive_key: archive_key.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub source: String,
    pub title: String,
    pub url: String,
    pub category: Option<String>,
    pub published_at: Option<DateTime<FixedOffset>>,
    pub collected_at: DateTime<Utc>,
    pub is_analyzed: bool,
    pub summary: Option<String>,
    pub archive_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: i64,
    pub keyword: String,
    /// Canonical keyword this one is a synonym of.
    pub master_id: Option<i64>,
}

/// Analysis result applied to one post during the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostUpdate {
    pub post_id: String,
    pub category: Category,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostKeywordMapping {
    pub post_id: String,
    pub keyword_id: i64,
}
