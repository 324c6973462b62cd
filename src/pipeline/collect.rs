use chrono::FixedOffset;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::archive::ArchiveWriter;
use crate::db::Repository;
use crate::error::Result;
use crate::feed::{Deduplicator, FeedFetcher};
use crate::models::{FeedSource, NewPost};

/// Outcome of one source in a collection run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub fetched: usize,
    /// Entries dropped for lacking a link or title.
    pub skipped: usize,
    pub fresh: usize,
    pub stored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Default::default()
        }
    }

    fn record_error(&mut self, stage: &str, error: impl std::fmt::Display) {
        let message = format!("{}: {}", stage, error);
        self.error = Some(match self.error.take() {
            Some(previous) => format!("{}; {}", previous, message),
            None => message,
        });
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    /// Archive objects written by this run, input to enrichment.
    pub archive_keys: Vec<String>,
    pub sources: Vec<SourceReport>,
}

impl CollectionReport {
    fn from_sources(mut sources: Vec<SourceReport>) -> Self {
        sources.sort_by(|a, b| a.source.cmp(&b.source));
        let archive_keys = sources.iter().filter_map(|s| s.archive_key.clone()).collect();
        Self {
            archive_keys,
            sources,
        }
    }

    pub fn stored(&self) -> usize {
        self.sources.iter().map(|s| s.stored).sum()
    }

    pub fn skipped(&self) -> usize {
        self.sources.iter().map(|s| s.skipped).sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }
}

/// Fan-out over sources: fetch, dedup, archive and store each one
/// independently.
pub(crate) struct Collector<'a> {
    pub repository: &'a Repository,
    pub fetcher: &'a FeedFetcher,
    pub archive: &'a ArchiveWriter,
    pub tz: FixedOffset,
    pub width: usize,
}

impl Collector<'_> {
    pub async fn run(&self, sources: Vec<FeedSource>) -> Result<CollectionReport> {
        self.repository.ping().await?;

        tracing::info!(sources = sources.len(), width = self.width, "collection started");
        let reports: Vec<SourceReport> = stream::iter(sources)
            .map(|source| self.collect_source(source))
            .buffer_unordered(self.width.max(1))
            .collect()
            .await;

        let report = CollectionReport::from_sources(reports);
        tracing::info!(
            stored = report.stored(),
            skipped = report.skipped(),
            archives = report.archive_keys.len(),
            failed = report.failed_sources(),
            "collection finished"
        );
        Ok(report)
    }

    async fn collect_source(&self, source: FeedSource) -> SourceReport {
        let name = source.display_name.as_str();
        let mut report = SourceReport::new(name);

        let outcome = self.fetcher.fetch(&source).await;
        report.fetched = outcome.candidates.len();
        report.skipped = outcome.skipped;
        if let Some(e) = outcome.error {
            report.record_error("fetch", e);
            return report;
        }

        let fresh = match Deduplicator::new(self.repository).fresh(outcome.candidates).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(source = name, error = %e, "dedup lookup failed");
                report.record_error("dedup", e);
                return report;
            }
        };
        report.fresh = fresh.len();
        if fresh.is_empty() {
            return report;
        }

        // The catalog still receives the posts when archiving fails; they
        // just have no archive to be enriched from.
        match self.archive.write(&source, &fresh).await {
            Ok(key) => report.archive_key = Some(key),
            Err(e) => {
                tracing::warn!(source = name, error = %e, "archive write failed");
                report.record_error("archive", e);
            }
        }

        let posts: Vec<NewPost> = fresh
            .iter()
            .map(|c| NewPost::from_candidate(c, report.archive_key.as_deref(), self.tz))
            .collect();

        match self.repository.upsert_posts(posts).await {
            Ok(stored) => {
                report.stored = stored;
                tracing::info!(source = name, fresh = report.fresh, stored, "stored posts");
            }
            Err(e) => {
                tracing::warn!(source = name, error = %e, "post upsert failed");
                report.record_error("store", e);
            }
        }

        report
    }
}
