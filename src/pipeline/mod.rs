mod backup;
mod collect;
mod merge;
mod select;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::FixedOffset;
use serde::Serialize;

pub use backup::ResultBackup;
pub use collect::{CollectionReport, SourceReport};
pub use merge::{MergeOutcome, ResultMerger};
pub use select::{EnrichmentSelector, Selection};

use crate::ai::{GeminiClient, KeywordAnnotator};
use crate::archive::{self, ArchiveWriter};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::FeedFetcher;
use crate::models::FeedSource;
use collect::Collector;

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentReport {
    pub selected: usize,
    pub annotated: usize,
    pub failed: usize,
    pub keywords: usize,
    pub mappings: usize,
    pub posts_updated: usize,
    pub unreadable_archives: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_key: Option<String>,
}

/// The two run entry points, wired once from configuration.
pub struct Pipeline {
    repository: Repository,
    fetcher: FeedFetcher,
    archive: ArchiveWriter,
    annotator: Option<KeywordAnnotator>,
    backup: Option<ResultBackup>,
    tz: FixedOffset,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        repository: Repository,
        fetcher: FeedFetcher,
        archive: ArchiveWriter,
        tz: FixedOffset,
        concurrency: usize,
    ) -> Self {
        Self {
            repository,
            fetcher,
            archive,
            annotator: None,
            backup: None,
            tz,
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_annotator(mut self, annotator: KeywordAnnotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn with_backup(mut self, backup: ResultBackup) -> Self {
        self.backup = Some(backup);
        self
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let tz = config.timezone()?;
        let repository = Repository::new(&config.db_path).await?;
        let store = archive::open_store(&config.archive).await?;
        let archive = ArchiveWriter::new(Arc::clone(&store), config.archive.prefix.clone(), tz);

        let mut pipeline = Self::new(repository, FeedFetcher::http()?, archive, tz, config.concurrency);

        if let Some(api_key) = &config.gemini_api_key {
            let client = GeminiClient::new(api_key.clone(), config.model.clone(), config.request_timeout())?;
            tracing::debug!(model = client.model(), "annotator configured");
            let annotator = KeywordAnnotator::new(Arc::new(client), config.max_attempts, config.retry_delays())?;
            pipeline = pipeline.with_annotator(annotator);
        }

        if config.backup_results {
            pipeline = pipeline.with_backup(ResultBackup::new(store, config.archive.results_prefix.clone(), tz));
        }

        Ok(pipeline)
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn fetcher(&self) -> &FeedFetcher {
        &self.fetcher
    }

    /// Collection stage. Per-source failures are reported, not returned.
    pub async fn collect(&self, sources: Vec<FeedSource>) -> Result<CollectionReport> {
        Collector {
            repository: &self.repository,
            fetcher: &self.fetcher,
            archive: &self.archive,
            tz: self.tz,
            width: self.concurrency,
        }
        .run(sources)
        .await
    }

    /// Enrichment stage over `keys` and any archive still holding
    /// unanalyzed posts.
    pub async fn enrich(&self, keys: &[String]) -> Result<EnrichmentReport> {
        self.repository.ping().await?;
        let annotator = self.annotator.as_ref().ok_or_else(|| {
            AppError::Config("gemini_api_key is not set (config file or GEMINI_API_KEY)".into())
        })?;

        let selection = EnrichmentSelector::new(&self.repository, &self.archive, self.concurrency)
            .select(keys)
            .await?;

        let mut report = EnrichmentReport {
            selected: selection.items.len(),
            unreadable_archives: selection.unreadable.len(),
            ..Default::default()
        };
        if selection.items.is_empty() {
            tracing::info!("nothing to enrich");
            return Ok(report);
        }

        let results = annotator.annotate_all(selection.items, self.concurrency).await;
        let mut annotations = Vec::with_capacity(results.len());
        for (_, result) in results {
            match result {
                Ok(annotation) => annotations.push(annotation),
                Err(_) => report.failed += 1,
            }
        }
        annotations.sort_by(|a, b| a.post_id.cmp(&b.post_id));
        report.annotated = annotations.len();

        let outcome = ResultMerger::new(&self.repository).merge(&annotations).await?;
        report.keywords = outcome.keywords;
        report.mappings = outcome.mappings;
        report.posts_updated = outcome.posts_updated;

        if let Some(backup) = &self.backup {
            match backup.write(&annotations).await {
                Ok(key) => report.backup_key = key,
                Err(e) => tracing::warn!(error = %e, "result backup failed"),
            }
        }

        tracing::info!(
            selected = report.selected,
            annotated = report.annotated,
            failed = report.failed,
            "enrichment finished"
        );
        Ok(report)
    }
}
