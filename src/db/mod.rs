mod repository;
mod schema;

pub use repository::{EnrichmentCounts, Repository};
