use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use sha2::{Digest, Sha256};

use super::codec;
use super::store::{put_unique, ObjectStore};
use crate::error::Result;
use crate::models::{Candidate, FeedSource};

/// Writes one immutable Parquet snapshot per source and run, partitioned
/// by calendar date in a fixed zone.
#[derive(Clone)]
pub struct ArchiveWriter {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    tz: FixedOffset,
}

impl ArchiveWriter {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, tz: FixedOffset) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { store, prefix, tz }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    /// `<prefix>/dt=<YYYY-MM-DD>/<name>-<tag>_<HHmmss>.parquet`, where `tag`
    /// is derived from the source id and feed url so that sources sharing a
    /// display name never share a key.
    pub fn object_key(&self, source: &FeedSource, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.tz);
        format!(
            "{}/dt={}/{}-{}_{}.parquet",
            self.prefix,
            local.format("%Y-%m-%d"),
            sanitize(&source.display_name),
            source_tag(source),
            local.format("%H%M%S"),
        )
    }

    pub async fn write(&self, source: &FeedSource, candidates: &[Candidate]) -> Result<String> {
        self.write_at(source, candidates, Utc::now()).await
    }

    /// Store a snapshot without ever replacing an existing object. When the
    /// key is taken (same source twice within a second) a numbered variant
    /// is used instead.
    pub async fn write_at(
        &self,
        source: &FeedSource,
        candidates: &[Candidate],
        at: DateTime<Utc>,
    ) -> Result<String> {
        let key = self.object_key(source, at);
        let bytes = codec::encode(candidates)?;
        let size = bytes.len();

        let key = put_unique(self.store.as_ref(), &key, bytes).await?;
        tracing::info!(source = %source.display_name, rows = candidates.len(), size, key = %key, "archived snapshot");
        Ok(key)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<Candidate>> {
        let bytes = self.store.get(key).await?;
        codec::decode(bytes)
    }
}

/// First 8 hex digits of SHA-256 over the source id and feed url.
fn source_tag(source: &FeedSource) -> String {
    let digest = Sha256::new()
        .chain_update(source.source_id.as_bytes())
        .chain_update(b"\n")
        .chain_update(source.feed_url.as_bytes())
        .finalize();
    hex::encode(&digest[..4])
}

fn sanitize(source: &str) -> String {
    source
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::archive::LocalObjectStore;

    fn writer(root: &std::path::Path) -> ArchiveWriter {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        ArchiveWriter::new(Arc::new(LocalObjectStore::new(root)), "blog-data/raw/", tz)
    }

    fn candidates(url: &str) -> Vec<Candidate> {
        vec![Candidate::new("Example", "Post", url, "body text", "", Utc::now())]
    }

    #[test]
    fn keys_are_partitioned_in_the_local_zone() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());

        // 23:30 UTC is already the next day at +09:00.
        let at = Utc.with_ymd_and_hms(2026, 2, 9, 23, 30, 5).unwrap();
        let toss = FeedSource::new("toss", "토스", "https://toss.tech/rss.xml");
        let key = writer.object_key(&toss, at);
        assert!(key.starts_with("blog-data/raw/dt=2026-02-10/토스-"), "{}", key);
        assert!(key.ends_with("_083005.parquet"), "{}", key);

        let slashed = FeedSource::new("ab", "a/b", "https://ab.example.com/rss");
        assert!(writer
            .object_key(&slashed, at)
            .starts_with("blog-data/raw/dt=2026-02-10/a_b-"));
    }

    #[test]
    fn same_display_name_gets_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());
        let at = Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap();

        let a = FeedSource::new("id-a", "Engineering Blog", "https://a.example.com/rss");
        let b = FeedSource::new("id-b", "Engineering Blog", "https://b.example.com/rss");
        assert_ne!(writer.object_key(&a, at), writer.object_key(&b, at));
        assert_eq!(writer.object_key(&a, at), writer.object_key(&a.clone(), at));
    }

    #[tokio::test]
    async fn written_snapshot_can_be_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());
        let source = FeedSource::new("example", "Example", "https://tech.example.com/rss.xml");
        let candidates = candidates("https://tech.example.com/post");

        let key = writer.write(&source, &candidates).await.unwrap();
        assert!(key.starts_with("blog-data/raw/dt="));
        assert!(dir.path().join(&key).exists());

        let rows = writer.read(&key).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content_hash, candidates[0].content_hash);
    }

    #[tokio::test]
    async fn second_snapshot_in_the_same_second_gets_its_own_key() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());
        let source = FeedSource::new("example", "Example", "https://tech.example.com/rss.xml");
        let at = Utc.with_ymd_and_hms(2026, 2, 10, 1, 2, 3).unwrap();

        let first = writer
            .write_at(&source, &candidates("https://tech.example.com/one"), at)
            .await
            .unwrap();
        let second = writer
            .write_at(&source, &candidates("https://tech.example.com/two"), at)
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(second.ends_with("_100203.1.parquet"), "{}", second);
        assert_eq!(writer.read(&first).await.unwrap()[0].url, "https://tech.example.com/one");
        assert_eq!(writer.read(&second).await.unwrap()[0].url, "https://tech.example.com/two");
    }
}
