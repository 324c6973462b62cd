use std::collections::HashSet;

use futures::stream::{self, StreamExt};

use crate::archive::ArchiveWriter;
use crate::db::Repository;
use crate::error::Result;

/// Posts to annotate, with their text re-hydrated from the archive.
#[derive(Debug, Default)]
pub struct Selection {
    /// `(post_id, raw_content)` pairs, unique by id.
    pub items: Vec<(String, String)>,
    pub unreadable: Vec<String>,
}

pub struct EnrichmentSelector<'a> {
    repository: &'a Repository,
    archive: &'a ArchiveWriter,
    width: usize,
}

impl<'a> EnrichmentSelector<'a> {
    pub fn new(repository: &'a Repository, archive: &'a ArchiveWriter, width: usize) -> Self {
        Self {
            repository,
            archive,
            width,
        }
    }

    /// Read `run_keys` plus every archive still referenced by an unanalyzed
    /// post, keeping rows whose post is unanalyzed.
    pub async fn select(&self, run_keys: &[String]) -> Result<Selection> {
        let unanalyzed = self.repository.list_unanalyzed().await?;
        if unanalyzed.is_empty() {
            return Ok(Selection::default());
        }

        let pending = self.repository.pending_archive_keys().await?;
        let mut seen_keys = HashSet::new();
        let keys: Vec<String> = run_keys
            .iter()
            .cloned()
            .chain(pending)
            .filter(|k| seen_keys.insert(k.clone()))
            .collect();

        tracing::info!(unanalyzed = unanalyzed.len(), archives = keys.len(), "selecting posts");

        let loaded: Vec<_> = stream::iter(keys)
            .map(|key| async move {
                let rows = self.archive.read(&key).await;
                (key, rows)
            })
            .buffered(self.width.max(1))
            .collect()
            .await;

        let mut selection = Selection::default();
        let mut seen_posts = HashSet::new();
        for (key, rows) in loaded {
            match rows {
                Ok(rows) => {
                    for row in rows {
                        if unanalyzed.contains(&row.content_hash) && seen_posts.insert(row.content_hash.clone()) {
                            selection.items.push((row.content_hash, row.raw_content));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "archive unreadable");
                    selection.unreadable.push(key);
                }
            }
        }

        Ok(selection)
    }
}
