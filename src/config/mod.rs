use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::alias::DEFAULT_ALIAS_LENGTH;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub shortener: ShortenerConfig,
    pub deletion: DeletionConfig,
    pub owner: OwnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Write ceiling in bytes, unlimited when unset
    pub max_storage_bytes: Option<u64>,
    /// Mirror every successful write to this file
    pub dump_file: Option<PathBuf>,
    /// Replay this file into the backend at startup
    pub restore_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortenerConfig {
    /// Prefix joined with the alias to form short URLs
    pub base_url: String,
    pub alias_length: usize,
    pub max_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnerConfig {
    /// HMAC key for owner tokens; a random key is used when unset
    pub secret_key: Option<String>,
}

impl StorageBackend {
    /// Guess the backend from a database URL scheme
    pub fn from_database_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_lowercase();
        match scheme.as_str() {
            "sqlite" => Some(Self::Sqlite),
            "postgres" | "postgresql" => Some(Self::Postgres),
            _ => None,
        }
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => bail!("unknown storage backend '{other}', supported: memory, sqlite, postgres"),
        }
    }
}

impl StorageConfig {
    const fn default_max_connections() -> u32 {
        5
    }

    /// Database URL for relational backends
    pub fn database_url(&self) -> &str {
        self.database_url
            .as_deref()
            .unwrap_or("sqlite://trimurl.db?mode=rwc")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: Self::default_max_connections(),
            max_storage_bytes: None,
            dump_file: None,
            restore_file: None,
        }
    }
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            alias_length: DEFAULT_ALIAS_LENGTH,
            max_retries: 3,
        }
    }
}

impl DeletionConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 1000,
            batch_size: 1000,
            flush_interval_ms: 500,
        }
    }
}

/// Parse an optional environment variable
fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} has an invalid value '{value}'")),
        Err(_) => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").ok();

        let backend = match std::env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => database_url
                .as_deref()
                .and_then(StorageBackend::from_database_url)
                .unwrap_or(StorageBackend::Memory),
        };

        if backend == StorageBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORAGE_BACKEND=postgres");
        }

        let dump_file = std::env::var("FILE_STORAGE_PATH").ok().map(PathBuf::from);
        let restore_file = std::env::var("RESTORE_FILE_PATH")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dump_file.clone());

        let storage = StorageConfig {
            backend,
            database_url,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or_else(StorageConfig::default_max_connections),
            max_storage_bytes: env_parse("MAX_STORAGE_BYTES")?,
            dump_file,
            restore_file,
        };

        let defaults = ShortenerConfig::default();
        let shortener = ShortenerConfig {
            base_url: std::env::var("BASE_URL").unwrap_or(defaults.base_url),
            alias_length: env_parse("ALIAS_LENGTH")?.unwrap_or(defaults.alias_length),
            max_retries: env_parse("MAX_ALIAS_RETRIES")?.unwrap_or(defaults.max_retries),
        };

        if shortener.alias_length == 0 {
            bail!("ALIAS_LENGTH must be at least 1");
        }

        let defaults = DeletionConfig::default();
        let deletion = DeletionConfig {
            workers: env_parse("DELETE_WORKERS")?.unwrap_or(defaults.workers),
            queue_capacity: env_parse("DELETE_QUEUE_CAPACITY")?.unwrap_or(defaults.queue_capacity),
            batch_size: env_parse("DELETE_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            flush_interval_ms: env_parse("DELETE_FLUSH_INTERVAL_MS")?
                .unwrap_or(defaults.flush_interval_ms),
        };

        if deletion.workers == 0 || deletion.queue_capacity == 0 || deletion.batch_size == 0 {
            bail!("DELETE_WORKERS, DELETE_QUEUE_CAPACITY and DELETE_BATCH_SIZE must be positive");
        }

        let owner = OwnerConfig {
            secret_key: std::env::var("OWNER_SECRET_KEY").ok(),
        };

        Ok(Config {
            storage,
            shortener,
            deletion,
            owner,
        })
    }
}
