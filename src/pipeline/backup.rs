use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::archive::{put_unique, ObjectStore};
use crate::error::Result;
use crate::models::Annotation;

#[derive(Serialize)]
struct BackupDocument<'a> {
    generated_at: DateTime<FixedOffset>,
    count: usize,
    annotations: &'a [Annotation],
}

/// Keeps the raw annotator output of each enrichment run next to the
/// archive, so results can be replayed without calling the service again.
pub struct ResultBackup {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    tz: FixedOffset,
}

impl ResultBackup {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, tz: FixedOffset) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { store, prefix, tz }
    }

    pub fn object_key(&self, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.tz);
        format!(
            "{}/dt={}/enrichment_{}.json",
            self.prefix,
            local.format("%Y-%m-%d"),
            local.format("%H%M%S"),
        )
    }

    /// Returns `None` when there was nothing to back up.
    pub async fn write(&self, annotations: &[Annotation]) -> Result<Option<String>> {
        if annotations.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let document = BackupDocument {
            generated_at: now.with_timezone(&self.tz),
            count: annotations.len(),
            annotations,
        };
        let body = serde_json::to_vec_pretty(&document)?;
        let key = put_unique(self.store.as_ref(), &self.object_key(now), body).await?;

        tracing::info!(key = %key, count = annotations.len(), "backed up annotations");
        Ok(Some(key))
    }
}
