//! Feed collection, deduplication and keyword enrichment for engineering
//! blogs.
//!
//! The collection stage fans out over a source catalog, archives new posts
//! as Parquet snapshots and records them in SQLite. The enrichment stage
//! re-reads those snapshots for posts that are still unanalyzed and merges
//! annotator output (keywords, category, summary) back into the catalog.

pub mod ai;
pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod pipeline;
