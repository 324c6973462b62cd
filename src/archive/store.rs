use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};

/// Write-once blob storage addressed by slash-separated keys.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return the key. Fails with
    /// [`AppError::ObjectExists`] rather than replacing an existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Object store backed by a directory tree.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(AppError::ObjectStore(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Readers never observe a half-written object, and the hard link
        // refuses to replace one that is already there.
        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .await
            .map_err(|e| already_exists_or(e, key))?;
        let written = async {
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        let linked = match written {
            Ok(()) => tokio::fs::hard_link(&partial, &path).await,
            Err(e) => Err(e),
        };
        tokio::fs::remove_file(&partial).await?;
        linked.map_err(|e| already_exists_or(e, key))?;

        tracing::debug!(key, size = bytes.len(), "stored object");
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::read(&path).await?)
    }
}

const MAX_KEY_VARIANTS: usize = 16;

/// Put under `key`, or under the first free numbered variant
/// (`name.1.ext`, `name.2.ext`, ...) when that key is taken.
pub async fn put_unique(store: &dyn ObjectStore, key: &str, bytes: Vec<u8>) -> Result<String> {
    let mut candidate = key.to_string();
    for n in 1..=MAX_KEY_VARIANTS {
        match store.put(&candidate, bytes.clone()).await {
            Err(AppError::ObjectExists(_)) => candidate = numbered(key, n),
            other => return other,
        }
    }
    Err(AppError::ObjectStore(format!(
        "no free key after {} variants of {}",
        MAX_KEY_VARIANTS, key
    )))
}

fn numbered(key: &str, n: usize) -> String {
    let (dir, file) = key.rsplit_once('/').unwrap_or(("", key));
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}.{}.{}", stem, n, ext),
        _ => format!("{}.{}", file, n),
    };
    if dir.is_empty() {
        file
    } else {
        format!("{}/{}", dir, file)
    }
}

fn already_exists_or(e: std::io::Error, key: &str) -> AppError {
    if e.kind() == std::io::ErrorKind::AlreadyExists {
        AppError::ObjectExists(key.to_string())
    } else {
        AppError::Io(e)
    }
}

#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

#[cfg(feature = "s3")]
mod s3 {
    use async_trait::async_trait;
    use aws_config::Region;
    use aws_sdk_s3::{primitives::ByteStream, Client};

    use super::ObjectStore;
    use crate::error::{AppError, Result};

    pub struct S3ObjectStore {
        client: Client,
        bucket: String,
    }

    impl S3ObjectStore {
        pub async fn new(bucket: String, region: Option<String>, endpoint: Option<String>) -> Self {
            let region = Region::new(region.unwrap_or_else(|| "ap-northeast-2".to_string()));
            let base_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(region.clone())
                .load()
                .await;

            let mut s3_builder = aws_sdk_s3::config::Builder::from(&base_config).region(region);
            if let Some(endpoint) = &endpoint {
                s3_builder = s3_builder.endpoint_url(endpoint);
                s3_builder = s3_builder.force_path_style(true);
            }

            Self {
                client: Client::from_conf(s3_builder.build()),
                bucket,
            }
        }
    }

    #[async_trait]
    impl ObjectStore for S3ObjectStore {
        async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String> {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .if_none_match("*")
                .body(ByteStream::from(bytes))
                .send()
                .await
                .map_err(|e| {
                    let status = e.raw_response().map(|r| r.status().as_u16());
                    if status == Some(412) {
                        AppError::ObjectExists(key.to_string())
                    } else {
                        AppError::ObjectStore(format!("S3 put {}: {}", key, e))
                    }
                })?;

            tracing::debug!(bucket = %self.bucket, key, "stored object");
            Ok(key.to_string())
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>> {
            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| AppError::ObjectStore(format!("S3 get {}: {}", key, e)))?;

            let data = resp
                .body
                .collect()
                .await
                .map_err(|e| AppError::ObjectStore(format!("S3 read {}: {}", key, e)))?
                .to_vec();
            Ok(data)
        }
    }
}
