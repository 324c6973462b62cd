mod codec;
mod store;
mod writer;

use std::sync::Arc;

pub use store::{put_unique, LocalObjectStore, ObjectStore};
#[cfg(feature = "s3")]
pub use store::S3ObjectStore;
pub use writer::ArchiveWriter;

use crate::config::{ArchiveBackend, ArchiveConfig};
use crate::error::{AppError, Result};

/// Build the configured object store backend.
pub async fn open_store(config: &ArchiveConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        ArchiveBackend::Local => Ok(Arc::new(LocalObjectStore::new(&config.root))),
        #[cfg(feature = "s3")]
        ArchiveBackend::S3 => {
            let bucket = config
                .bucket
                .clone()
                .ok_or_else(|| AppError::Config("archive.bucket is required for the s3 backend".into()))?;
            let store = S3ObjectStore::new(bucket, config.region.clone(), config.endpoint.clone()).await;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        ArchiveBackend::S3 => Err(AppError::Config(
            "the s3 archive backend requires building with --features s3".into(),
        )),
    }
}
