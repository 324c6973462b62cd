pub mod catalog;
mod dates;
mod dedup;
mod fetcher;

pub use catalog::{curate, SourceCatalog};
pub use dates::parse_published_at;
pub use dedup::Deduplicator;
pub use fetcher::{parse_entries, FeedFetcher, FeedTransport, FetchOutcome, HttpTransport};

#[cfg(test)]
pub(crate) use fetcher::tests as fetcher_tests;
