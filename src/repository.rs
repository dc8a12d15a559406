//! Durability wrapper around a storage backend
//!
//! Every successful write is mirrored as one JSON line into an append-only
//! dump file, and the same format can be replayed into a fresh backend at
//! startup.

use crate::config::{StorageBackend, StorageConfig};
use crate::models::{DeletionTask, DumpRecord, LongUrl, OriginalUrl};
use crate::storage::{
    MemoryStorage, PostgresStorage, SqliteStorage, Storage, StorageError, StorageResult,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

struct DumpFile {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

pub struct Repository {
    inner: Arc<dyn Storage>,
    dump: Option<DumpFile>,
}

impl Repository {
    /// Wrap a backend without any dump file
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self { inner, dump: None }
    }

    /// Build the configured backend, restore it and attach the mirror
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let inner: Arc<dyn Storage> = match config.backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory storage");
                Arc::new(MemoryStorage::new(config.max_storage_bytes))
            }
            StorageBackend::Sqlite => {
                tracing::info!("Using SQLite storage: {}", config.database_url());
                Arc::new(
                    SqliteStorage::new(config.database_url(), config.max_connections)
                        .await
                        .context("Failed to connect to SQLite")?
                        .with_size_limit(config.max_storage_bytes),
                )
            }
            StorageBackend::Postgres => {
                tracing::info!("Using PostgreSQL storage");
                Arc::new(
                    PostgresStorage::new(config.database_url(), config.max_connections)
                        .await
                        .context("Failed to connect to PostgreSQL")?
                        .with_size_limit(config.max_storage_bytes),
                )
            }
        };

        inner
            .init()
            .await
            .context("Failed to initialize storage")?;

        let repository = Self::new(inner);

        if let Some(path) = &config.restore_file {
            let restored = repository.restore_from(path).await?;
            tracing::info!("Restored {} records from {}", restored, path.display());
        }

        match &config.dump_file {
            Some(path) => repository.with_dump_file(path).await,
            None => Ok(repository),
        }
    }

    /// Mirror every later successful write to `path`, creating it if missing
    pub async fn with_dump_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open dump file {}", path.display()))?;

        self.dump = Some(DumpFile {
            path,
            file: Mutex::new(Some(file)),
        });
        Ok(self)
    }

    /// Replay a dump file into the backend, in file order
    ///
    /// Stops at the first malformed line or rejected record. Records the
    /// backend already holds under the same alias and long URL are skipped.
    /// A missing file restores nothing. Returns the number of records stored.
    pub async fn restore_from(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No dump file at {}, nothing to restore", path.display());
                return Ok(0);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let mut restored = 0;
        let mut skipped = 0;
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let record: DumpRecord = serde_json::from_str(line).with_context(|| {
                format!("Malformed record at {}:{}", path.display(), index + 1)
            })?;

            let location = || {
                format!(
                    "Failed to restore '{}' from {}:{}",
                    record.short_url,
                    path.display(),
                    index + 1
                )
            };

            match self
                .inner
                .store(&record.short_url, &record.long_url, &record.user_id)
                .await
            {
                Ok(_) => restored += 1,
                Err(e @ StorageError::DuplicateAlias(_)) => {
                    if !self.already_stored(&record).await {
                        return Err(e).with_context(location);
                    }
                    skipped += 1;
                }
                Err(e) => return Err(e).with_context(location),
            }
        }

        if skipped > 0 {
            tracing::info!("Skipped {} records already present in storage", skipped);
        }
        Ok(restored)
    }

    /// A persistent backend may already hold the records its own dump replays
    async fn already_stored(&self, record: &DumpRecord) -> bool {
        match self.inner.get(&record.short_url).await {
            Ok(existing) => existing.long_url == record.long_url,
            Err(_) => false,
        }
    }

    async fn mirror(&self, records: &[DumpRecord]) -> StorageResult<()> {
        let Some(dump) = &self.dump else {
            return Ok(());
        };

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record).map_err(|e| StorageError::Other(e.into()))?;
            buf.push(b'\n');
        }

        let mut guard = dump.file.lock().await;
        let file = guard.as_mut().ok_or_else(|| {
            StorageError::Other(anyhow::anyhow!(
                "dump file {} is closed",
                dump.path.display()
            ))
        })?;

        file.write_all(&buf)
            .await
            .map_err(|e| StorageError::Other(e.into()))?;
        file.flush()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;
        Ok(())
    }

    async fn close_dump(&self) -> StorageResult<()> {
        let Some(dump) = &self.dump else {
            return Ok(());
        };

        let Some(mut file) = dump.file.lock().await.take() else {
            return Ok(());
        };

        file.flush()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;
        Ok(())
    }
}

#[async_trait]
impl Storage for Repository {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn store(&self, alias: &str, long_url: &str, owner_id: &str) -> StorageResult<String> {
        let stored = self.inner.store(alias, long_url, owner_id).await?;
        self.mirror(&[DumpRecord::new(&stored, long_url, owner_id)])
            .await?;
        Ok(stored)
    }

    async fn store_batch(&self, entries: &[OriginalUrl], owner_id: &str) -> StorageResult<()> {
        self.inner.store_batch(entries, owner_id).await?;

        let records: Vec<DumpRecord> = entries
            .iter()
            .map(|entry| DumpRecord::new(&entry.correlation_id, &entry.original_url, owner_id))
            .collect();
        self.mirror(&records).await
    }

    async fn get(&self, alias: &str) -> StorageResult<LongUrl> {
        self.inner.get(alias).await
    }

    async fn get_by_owner(&self, owner_id: &str) -> StorageResult<Vec<OriginalUrl>> {
        self.inner.get_by_owner(owner_id).await
    }

    async fn update_deleted_flags(&self, tasks: &[DeletionTask]) -> StorageResult<()> {
        self.inner.update_deleted_flags(tasks).await
    }

    async fn create_user(&self) -> StorageResult<String> {
        self.inner.create_user().await
    }

    async fn ping(&self) -> StorageResult<()> {
        self.inner.ping().await
    }

    async fn close(&self) -> StorageResult<()> {
        let backend = self.inner.close().await;
        let dump = self.close_dump().await;

        match (backend, dump) {
            (Err(e), Err(dump_err)) => {
                tracing::error!("Failed to close dump file: {}", dump_err);
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}
