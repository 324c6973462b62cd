use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;

use super::*;
use crate::ai::{AnnotateError, GenerationRequest, TextGenerator};
use crate::archive::{LocalObjectStore, ObjectStore};
use crate::feed::catalog::encode_name;
use crate::feed::fetcher_tests::{StaticTransport, THREE_ENTRY_FEED};
use crate::models::content_hash;

const FEED_URL: &str = "https://tech.example.com/rss.xml";
const OTHER_URL: &str = "https://blog.example.org/feed.xml";

/// One usable entry and one without a link.
const OTHER_FEED: &str = r#"<rss version="2.0"><channel><title>Other</title>
    <item><title>Postgres vacuum tuning</title><link>https://blog.example.org/vacuum</link>
      <description>Autovacuum settings for large Postgres tables.</description></item>
    <item><title>Dangling</title><description>No link here.</description></item>
    </channel></rss>"#;

const KAFKA_ANSWER: &str =
    r#"{"keywords": ["Kafka", "Kafka"], "category": "Backend", "summary": "카프카 이야기"}"#;

/// Answers every prompt with the Kafka annotation, except prompts containing
/// `broken_marker`, which get an unparsable reply.
struct FakeGenerator {
    broken_marker: Option<&'static str>,
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, AnnotateError> {
        match self.broken_marker {
            Some(marker) if request.prompt.contains(marker) => Ok("I cannot answer that".into()),
            _ => Ok(KAFKA_ANSWER.into()),
        }
    }
}

/// Fails with a transient error `failures` times, then answers.
struct FlakyGenerator {
    failures_left: AtomicU32,
    calls: AtomicU32,
}

impl FlakyGenerator {
    fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TextGenerator for FlakyGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> std::result::Result<String, AnnotateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(AnnotateError::Transient("503 Service Unavailable".into()))
        } else {
            Ok(KAFKA_ANSWER.into())
        }
    }
}

struct UnavailableStore;

#[async_trait]
impl ObjectStore for UnavailableStore {
    async fn put(&self, _key: &str, _bytes: Vec<u8>) -> Result<String> {
        Err(AppError::ObjectStore("bucket unavailable".into()))
    }

    async fn get(&self, _key: &str) -> Result<Vec<u8>> {
        Err(AppError::ObjectStore("bucket unavailable".into()))
    }
}

fn tz() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

fn source() -> FeedSource {
    FeedSource::new(encode_name("Example"), "Example", FEED_URL)
}

fn other_source() -> FeedSource {
    FeedSource::new(encode_name("Other"), "Other", OTHER_URL)
}

fn transport() -> StaticTransport {
    StaticTransport::default()
        .with(FEED_URL, THREE_ENTRY_FEED)
        .with(OTHER_URL, OTHER_FEED)
}

fn pipeline_with_store(
    repository: Repository,
    store: Arc<dyn ObjectStore>,
    generator: Option<Arc<dyn TextGenerator>>,
) -> Pipeline {
    let archive = ArchiveWriter::new(store, "blog-data/raw", tz());
    let pipeline = Pipeline::new(repository, FeedFetcher::new(Arc::new(transport())), archive, tz(), 2);
    match generator {
        Some(generator) => {
            let annotator = KeywordAnnotator::new(generator, 5, vec![Duration::ZERO]).unwrap();
            pipeline.with_annotator(annotator)
        }
        None => pipeline,
    }
}

fn pipeline(repository: Repository, dir: &Path, generator: Option<Arc<dyn TextGenerator>>) -> Pipeline {
    pipeline_with_store(repository, Arc::new(LocalObjectStore::new(dir)), generator)
}

fn healthy() -> Option<Arc<dyn TextGenerator>> {
    Some(Arc::new(FakeGenerator { broken_marker: None }))
}

#[tokio::test]
async fn three_entry_feed_with_a_bad_date_stores_three_posts() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline(repository.clone(), dir.path(), None);

    let report = pipeline.collect(vec![source()]).await.unwrap();
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.sources[0].fetched, 3);
    assert_eq!(report.sources[0].stored, 3);
    assert_eq!(report.archive_keys.len(), 1);
    assert!(report.archive_keys[0].starts_with("blog-data/raw/dt="));

    let undated = repository
        .get_post(&content_hash("https://tech.example.com/undated"))
        .await
        .unwrap()
        .unwrap();
    assert!(undated.published_at.is_some());
    assert!(!undated.is_analyzed);
    assert_eq!(undated.archive_key.as_deref(), Some(report.archive_keys[0].as_str()));
}

#[tokio::test]
async fn collecting_the_same_url_twice_keeps_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline(repository.clone(), dir.path(), None);

    pipeline.collect(vec![source()]).await.unwrap();
    let second = pipeline.collect(vec![source()]).await.unwrap();

    assert_eq!(second.sources[0].fetched, 3);
    assert_eq!(second.sources[0].fresh, 0);
    assert!(second.archive_keys.is_empty());
    assert_eq!(repository.count_posts().await.unwrap(), 3);
}

#[tokio::test]
async fn dead_source_does_not_affect_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline(repository.clone(), dir.path(), None);

    let dead = FeedSource::new(encode_name("Dead"), "Dead", "https://dead.example.com/rss");
    let report = pipeline.collect(vec![dead, source()]).await.unwrap();

    assert_eq!(report.sources.len(), 2);
    assert_eq!(report.stored(), 3);
    let dead = report.sources.iter().find(|s| s.source == "Dead").unwrap();
    assert_eq!(dead.fetched, 0);
    assert!(dead.archive_key.is_none());
    assert!(dead.error.as_deref().unwrap().starts_with("fetch"));
    assert_eq!(report.failed_sources(), 1);
}

#[tokio::test]
async fn entries_without_a_link_are_counted_as_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline(repository.clone(), dir.path(), None);

    let report = pipeline.collect(vec![other_source(), source()]).await.unwrap();
    let other = report.sources.iter().find(|s| s.source == "Other").unwrap();
    assert_eq!(other.fetched, 1);
    assert_eq!(other.skipped, 1);
    assert_eq!(other.stored, 1);
    assert!(other.error.is_none());
    assert_eq!(report.skipped(), 1);
}

#[tokio::test]
async fn same_named_sources_are_all_enriched() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline(repository.clone(), dir.path(), healthy());

    let sources = vec![
        FeedSource::new("id-a", "Engineering Blog", FEED_URL),
        FeedSource::new("id-b", "Engineering Blog", OTHER_URL),
    ];
    let collected = pipeline.collect(sources).await.unwrap();
    assert_eq!(collected.stored(), 4);
    assert_eq!(collected.archive_keys.len(), 2);
    assert_ne!(collected.archive_keys[0], collected.archive_keys[1]);

    let first = pipeline.enrich(&collected.archive_keys).await.unwrap();
    assert_eq!(first.selected, 4);
    assert_eq!(first.annotated, 4);

    let second = pipeline.enrich(&collected.archive_keys).await.unwrap();
    assert_eq!(second.selected, 0);
    assert!(repository.list_unanalyzed().await.unwrap().is_empty());
}

#[tokio::test]
async fn post_is_analyzed_after_four_transient_failures() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let generator = Arc::new(FlakyGenerator::new(4));
    let pipeline = pipeline(repository.clone(), dir.path(), Some(generator.clone()));

    let collected = pipeline.collect(vec![other_source()]).await.unwrap();
    let report = pipeline.enrich(&collected.archive_keys).await.unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 5);
    assert_eq!(report.annotated, 1);
    assert_eq!(report.failed, 0);
    let id = content_hash("https://blog.example.org/vacuum");
    assert!(repository.get_post(&id).await.unwrap().unwrap().is_analyzed);
}

#[tokio::test]
async fn archive_failure_still_stores_posts() {
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline_with_store(repository.clone(), Arc::new(UnavailableStore), None);

    let report = pipeline.collect(vec![source()]).await.unwrap();
    let example = &report.sources[0];
    assert_eq!(example.stored, 3);
    assert!(example.archive_key.is_none());
    assert!(example.error.as_deref().unwrap().starts_with("archive"));
    assert!(report.archive_keys.is_empty());
    assert_eq!(repository.count_posts().await.unwrap(), 3);
}

#[tokio::test]
async fn duplicate_keywords_become_one_keyword_and_one_edge() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline(repository.clone(), dir.path(), healthy());

    let collected = pipeline.collect(vec![source()]).await.unwrap();
    let report = pipeline.enrich(&collected.archive_keys).await.unwrap();

    assert_eq!(report.selected, 3);
    assert_eq!(report.annotated, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.keywords, 1);
    assert_eq!(report.mappings, 3);
    assert_eq!(report.posts_updated, 3);
    assert_eq!(repository.count_keywords("Kafka").await.unwrap(), 1);

    let id = content_hash("https://tech.example.com/kafka");
    let keywords = repository.keywords_for_post(&id).await.unwrap();
    assert_eq!(keywords.len(), 1);
    assert_eq!(keywords[0].keyword, "Kafka");

    let post = repository.get_post(&id).await.unwrap().unwrap();
    assert!(post.is_analyzed);
    assert_eq!(post.category.as_deref(), Some("Backend"));
    assert_eq!(post.summary.as_deref(), Some("카프카 이야기"));
}

#[tokio::test]
async fn enrichment_rerun_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline(repository.clone(), dir.path(), healthy());

    let collected = pipeline.collect(vec![source()]).await.unwrap();
    pipeline.enrich(&collected.archive_keys).await.unwrap();
    let again = pipeline.enrich(&collected.archive_keys).await.unwrap();

    assert_eq!(again.selected, 0);
    assert_eq!(again.posts_updated, 0);
    assert!(repository.list_unanalyzed().await.unwrap().is_empty());
}

#[tokio::test]
async fn permanently_failed_post_is_retried_by_a_later_run() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let undated = content_hash("https://tech.example.com/undated");

    let flaky = pipeline(
        repository.clone(),
        dir.path(),
        Some(Arc::new(FakeGenerator {
            broken_marker: Some("Plain text"),
        })),
    );
    let collected = flaky.collect(vec![source()]).await.unwrap();
    let first = flaky.enrich(&collected.archive_keys).await.unwrap();
    assert_eq!(first.annotated, 2);
    assert_eq!(first.failed, 1);

    let unanalyzed = repository.list_unanalyzed().await.unwrap();
    assert_eq!(unanalyzed.len(), 1);
    assert!(unanalyzed.contains(&undated));
    assert!(repository.keywords_for_post(&undated).await.unwrap().is_empty());

    // A later run collects nothing new, yet still reaches the failed post.
    let fixed = pipeline(repository.clone(), dir.path(), healthy());
    let second = fixed.enrich(&[]).await.unwrap();
    assert_eq!(second.selected, 1);
    assert_eq!(second.annotated, 1);
    assert!(repository.get_post(&undated).await.unwrap().unwrap().is_analyzed);
}

#[tokio::test]
async fn unreadable_archive_is_counted_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline(repository.clone(), dir.path(), healthy());

    let collected = pipeline.collect(vec![source()]).await.unwrap();
    let mut keys = collected.archive_keys.clone();
    keys.push("blog-data/raw/dt=2026-01-01/Gone_000000.parquet".into());

    let report = pipeline.enrich(&keys).await.unwrap();
    assert_eq!(report.unreadable_archives, 1);
    assert_eq!(report.annotated, 3);
}

#[tokio::test]
async fn enrichment_without_annotator_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let pipeline = pipeline(repository, dir.path(), None);

    let err = pipeline.enrich(&[]).await.unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[tokio::test]
async fn results_are_backed_up_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let repository = Repository::open_in_memory().await.unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(dir.path()));
    let pipeline = pipeline_with_store(repository, Arc::clone(&store), healthy())
        .with_backup(ResultBackup::new(Arc::clone(&store), "blog-data/results", tz()));

    let collected = pipeline.collect(vec![source()]).await.unwrap();
    let report = pipeline.enrich(&collected.archive_keys).await.unwrap();

    let key = report.backup_key.unwrap();
    assert!(key.starts_with("blog-data/results/dt="));
    let body: serde_json::Value = serde_json::from_slice(&store.get(&key).await.unwrap()).unwrap();
    assert_eq!(body["count"], 3);
}
