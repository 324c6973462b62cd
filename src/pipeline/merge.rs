use std::collections::{BTreeSet, HashSet};

use crate::db::Repository;
use crate::error::Result;
use crate::models::{Annotation, PostKeywordMapping, PostUpdate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub keywords: usize,
    pub mappings: usize,
    pub posts_updated: usize,
}

/// Writes annotations back: keywords first, then post updates and edges in
/// one transaction.
pub struct ResultMerger<'a> {
    repository: &'a Repository,
}

impl<'a> ResultMerger<'a> {
    pub fn new(repository: &'a Repository) -> Self {
        Self { repository }
    }

    pub async fn merge(&self, annotations: &[Annotation]) -> Result<MergeOutcome> {
        if annotations.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let union: BTreeSet<&str> = annotations
            .iter()
            .flat_map(|a| a.keywords.iter().map(String::as_str))
            .collect();
        let ids = self
            .repository
            .upsert_keywords(union.into_iter().map(str::to_string).collect())
            .await?;

        let updates: Vec<PostUpdate> = annotations
            .iter()
            .map(|a| PostUpdate {
                post_id: a.post_id.clone(),
                category: a.category,
                summary: Some(a.summary.clone()).filter(|s| !s.is_empty()),
            })
            .collect();

        let mut seen = HashSet::new();
        let mut mappings = Vec::new();
        for annotation in annotations {
            for keyword in &annotation.keywords {
                let Some(&keyword_id) = ids.get(keyword) else {
                    tracing::warn!(post_id = %annotation.post_id, keyword = %keyword, "keyword id missing");
                    continue;
                };
                let mapping = PostKeywordMapping {
                    post_id: annotation.post_id.clone(),
                    keyword_id,
                };
                if seen.insert(mapping.clone()) {
                    mappings.push(mapping);
                }
            }
        }

        let counts = self.repository.apply_enrichment(updates, mappings).await?;
        tracing::info!(
            keywords = ids.len(),
            mappings = counts.mappings_inserted,
            posts = counts.posts_updated,
            "merged annotations"
        );

        Ok(MergeOutcome {
            keywords: ids.len(),
            mappings: counts.mappings_inserted,
            posts_updated: counts.posts_updated,
        })
    }
}
