use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Keyword, NewPost, Post, PostKeywordMapping, PostUpdate};

use super::schema::SCHEMA;

/// Row counts written by one enrichment merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentCounts {
    pub posts_updated: usize,
    pub mappings_inserted: usize,
}

/// Relational catalog of posts, keywords and their edges.
///
/// All writes use conflict clauses so concurrent or repeated runs never
/// duplicate rows and never overwrite analysis state.
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            rusqlite::vtab::array::load_module(conn)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Fails when the database cannot be queried at all.
    pub async fn ping(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Post operations

    /// Which of `ids` are already stored, in a single statement.
    pub async fn existing_ids(&self, ids: Vec<String>) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let existing = self
            .conn
            .call(move |conn| {
                let values: Rc<Vec<Value>> = Rc::new(ids.into_iter().map(Value::from).collect());
                let mut stmt =
                    conn.prepare("SELECT id FROM external_posts WHERE id IN rarray(?1)")?;
                let existing = stmt
                    .query_map([values], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<HashSet<_>, _>>()?;
                Ok(existing)
            })
            .await?;
        Ok(existing)
    }

    /// Insert posts, leaving rows whose id already exists untouched.
    /// Returns the number of rows actually inserted.
    pub async fn upsert_posts(&self, posts: Vec<NewPost>) -> Result<usize> {
        if posts.is_empty() {
            return Ok(0);
        }

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT INTO external_posts (id, source, title, url, published_at, collected_at, archive_key)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                           ON CONFLICT(id) DO NOTHING"#,
                    )?;
                    for post in &posts {
                        inserted += stmt.execute(params![
                            post.id,
                            post.source,
                            post.title,
                            post.url,
                            post.published_at.to_rfc3339(),
                            post.collected_at.to_rfc3339(),
                            post.archive_key,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    pub async fn list_unanalyzed(&self) -> Result<HashSet<String>> {
        let ids = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM external_posts WHERE is_analyzed = 0")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<HashSet<_>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Archive objects that still hold text for unanalyzed posts.
    pub async fn pending_archive_keys(&self) -> Result<Vec<String>> {
        let keys = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT DISTINCT archive_key FROM external_posts
                       WHERE is_analyzed = 0 AND archive_key IS NOT NULL
                       ORDER BY archive_key"#,
                )?;
                let keys = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }

    pub async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        let id = id.to_string();
        let post = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, source, title, url, category, published_at, collected_at,
                              is_analyzed, summary, archive_key
                       FROM external_posts WHERE id = ?1"#,
                )?;
                let post = stmt.query_row(params![id], post_from_row).optional()?;
                Ok(post)
            })
            .await?;
        Ok(post)
    }

    pub async fn count_posts(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM external_posts", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }

    // Keyword operations

    /// Register keywords and return ids for every requested text, whether it
    /// was just inserted or already present.
    pub async fn upsert_keywords(&self, keywords: Vec<String>) -> Result<HashMap<String, i64>> {
        if keywords.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids = {
                    let mut insert = tx.prepare(
                        "INSERT INTO keywords (keyword) VALUES (?1) ON CONFLICT(keyword) DO NOTHING",
                    )?;
                    for keyword in &keywords {
                        insert.execute(params![keyword])?;
                    }

                    let values: Rc<Vec<Value>> =
                        Rc::new(keywords.into_iter().map(Value::from).collect());
                    let mut select =
                        tx.prepare("SELECT keyword, id FROM keywords WHERE keyword IN rarray(?1)")?;
                    let ids = select
                        .query_map([values], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                        })?
                        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
                    ids
                };
                tx.commit()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    pub async fn keywords_for_post(&self, post_id: &str) -> Result<Vec<Keyword>> {
        let post_id = post_id.to_string();
        let keywords = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT k.id, k.keyword, k.master_id
                       FROM keywords k
                       JOIN external_posts_keywords m ON m.keyword_id = k.id
                       WHERE m.post_id = ?1
                       ORDER BY k.keyword"#,
                )?;
                let keywords = stmt
                    .query_map(params![post_id], keyword_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(keywords)
            })
            .await?;
        Ok(keywords)
    }

    pub async fn count_keywords(&self, keyword: &str) -> Result<usize> {
        let keyword = keyword.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM keywords WHERE keyword = ?1",
                    params![keyword],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count as usize)
    }

    // Enrichment

    /// Apply one merge batch atomically: flip analyzed posts and insert
    /// keyword edges. Posts already analyzed are left as they are, and
    /// existing edges are ignored, so the same batch can be retried.
    pub async fn apply_enrichment(
        &self,
        updates: Vec<PostUpdate>,
        mappings: Vec<PostKeywordMapping>,
    ) -> Result<EnrichmentCounts> {
        let counts = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut counts = EnrichmentCounts::default();
                {
                    let mut update = tx.prepare(
                        r#"UPDATE external_posts
                           SET category = ?1, summary = ?2, is_analyzed = 1
                           WHERE id = ?3 AND is_analyzed = 0"#,
                    )?;
                    for post in &updates {
                        counts.posts_updated += update.execute(params![
                            post.category.as_str(),
                            post.summary,
                            post.post_id,
                        ])?;
                    }

                    let mut insert = tx.prepare(
                        r#"INSERT INTO external_posts_keywords (post_id, keyword_id)
                           VALUES (?1, ?2)
                           ON CONFLICT(post_id, keyword_id) DO NOTHING"#,
                    )?;
                    for mapping in &mappings {
                        counts.mappings_inserted +=
                            insert.execute(params![mapping.post_id, mapping.keyword_id])?;
                    }
                }
                tx.commit()?;
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }
}

/// Timestamps are always written as RFC 3339, including the schema default.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn post_from_row(row: &Row) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        source: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        category: row.get(4)?,
        published_at: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok()),
        collected_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        is_analyzed: row.get::<_, i64>(7)? != 0,
        summary: row.get(8)?,
        archive_key: row.get(9)?,
    })
}

fn keyword_from_row(row: &Row) -> rusqlite::Result<Keyword> {
    Ok(Keyword {
        id: row.get(0)?,
        keyword: row.get(1)?,
        master_id: row.get(2)?,
    })
}
