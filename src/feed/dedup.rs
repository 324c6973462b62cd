use std::collections::HashSet;

use crate::db::Repository;
use crate::error::Result;
use crate::models::Candidate;

/// Filters candidates down to those whose hash is not yet a stored post.
pub struct Deduplicator<'a> {
    repository: &'a Repository,
}

impl<'a> Deduplicator<'a> {
    pub fn new(repository: &'a Repository) -> Self {
        Self { repository }
    }

    /// One existence query for the whole batch. Repeats inside the batch
    /// collapse to their first occurrence.
    pub async fn fresh(&self, candidates: Vec<Candidate>) -> Result<Vec<Candidate>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let hashes: Vec<String> = candidates.iter().map(|c| c.content_hash.clone()).collect();
        let existing = self.repository.existing_ids(hashes).await?;

        let mut seen = HashSet::new();
        let fresh = candidates
            .into_iter()
            .filter(|c| !existing.contains(&c.content_hash))
            .filter(|c| seen.insert(c.content_hash.clone()))
            .collect();

        Ok(fresh)
    }
}
