use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const APP_DIR: &str = "rss-insight";
const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackend {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub backend: ArchiveBackend,

    /// Root directory for the local backend.
    #[serde(default = "default_archive_root")]
    pub root: String,

    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,

    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_results_prefix")]
    pub results_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    pub gemini_api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,

    #[serde(default = "default_true")]
    pub backup_results: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub archive: ArchiveConfig,
}

fn data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    std::fs::create_dir_all(&data_dir).ok();
    data_dir
}

fn default_db_path() -> String {
    data_dir().join("catalog.db").to_string_lossy().to_string()
}

fn default_catalog_path() -> String {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("platforms.json")
        .to_string_lossy()
        .to_string()
}

fn default_archive_root() -> String {
    data_dir().join("archive").to_string_lossy().to_string()
}

fn default_prefix() -> String {
    "blog-data/raw".to_string()
}

fn default_results_prefix() -> String {
    "blog-data/results".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delays() -> Vec<u64> {
    vec![2, 4, 8, 16, 32]
}

fn default_utc_offset() -> i32 {
    9
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: ArchiveBackend::Local,
            root: default_archive_root(),
            bucket: None,
            region: None,
            endpoint: None,
            prefix: default_prefix(),
            results_prefix: default_results_prefix(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            catalog_path: default_catalog_path(),
            gemini_api_key: None,
            model: default_model(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            retry_delays_secs: default_retry_delays(),
            utc_offset_hours: default_utc_offset(),
            backup_results: true,
            request_timeout_secs: default_request_timeout(),
            archive: ArchiveConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the per-user config file when `path` is
    /// `None`. A missing per-user file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let config_path = Self::config_path();
                if config_path.exists() {
                    Self::from_file(&config_path)?
                } else {
                    let config = Config::default();
                    config.save(&config_path)?;
                    config
                }
            }
        };

        if config.gemini_api_key.is_none() {
            config.gemini_api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(AppError::Config("concurrency must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(AppError::Config("max_attempts must be at least 1".into()));
        }
        if self.archive.backend == ArchiveBackend::S3 && self.archive.bucket.is_none() {
            return Err(AppError::Config("archive.bucket is required for the s3 backend".into()));
        }
        self.timezone()?;
        Ok(())
    }

    /// The fixed zone used for archive partitions and date fallbacks.
    pub fn timezone(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            AppError::Config(format!("invalid utc_offset_hours: {}", self.utc_offset_hours))
        })
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/catalog.db"
            concurrency = 2

            [archive]
            prefix = "raw"
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, "/tmp/catalog.db");
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_delays_secs, vec![2, 4, 8, 16, 32]);
        assert_eq!(config.archive.prefix, "raw");
        assert_eq!(config.archive.results_prefix, "blog-data/results");
        assert_eq!(config.archive.backend, ArchiveBackend::Local);
        assert!(config.backup_results);
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let mut config = Config::default();
        config.archive.backend = ArchiveBackend::S3;
        assert!(config.validate().is_err());

        config.archive.bucket = Some("posts".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn timezone_defaults_to_plus_nine() {
        let config = Config::default();
        assert_eq!(config.timezone().unwrap().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn explicit_path_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.model = "test-model".into();
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.model, "test-model");
    }
}
