use crate::models::{AliasRecord, DeletionTask, LongUrl, OriginalUrl};
use crate::storage::{classify_insert_error, Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
    max_bytes: Option<u64>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
            max_bytes: None,
        })
    }

    /// Reject writes once the database file grows past `max_bytes`
    pub fn with_size_limit(mut self, max_bytes: Option<u64>) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn check_capacity(&self) -> StorageResult<()> {
        let Some(limit) = self.max_bytes else {
            return Ok(());
        };

        let size: i64 = sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if size.max(0) as u64 > limit {
            return Err(StorageError::CapacityExceeded { limit });
        }
        Ok(())
    }
}

/// Insert one record, or report why it cannot be inserted
///
/// A taken alias wins over an already-shortened long URL, so resubmitting an
/// identical record is a `DuplicateAlias`.
async fn insert_alias(
    conn: &mut SqliteConnection,
    alias: &str,
    long_url: &str,
    owner_id: &str,
) -> StorageResult<String> {
    let taken: Option<i64> = sqlx::query_scalar("SELECT 1 FROM shortened_urls WHERE alias = ?")
        .bind(alias)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

    if taken.is_some() {
        return Err(StorageError::DuplicateAlias(alias.to_string()));
    }

    let created_at = chrono::Utc::now().timestamp();

    let inserted: Option<String> = sqlx::query_scalar(
        r#"
        INSERT INTO shortened_urls (alias, long_url, owner_id, is_deleted, created_at)
        VALUES (?, ?, ?, 0, ?)
        ON CONFLICT (owner_id, long_url) DO NOTHING
        RETURNING alias
        "#,
    )
    .bind(alias)
    .bind(long_url)
    .bind(owner_id)
    .bind(created_at)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| classify_insert_error(e, alias))?;

    if let Some(stored) = inserted {
        return Ok(stored);
    }

    let existing: String = sqlx::query_scalar(
        "SELECT alias FROM shortened_urls WHERE owner_id = ? AND long_url = ?",
    )
    .bind(owner_id)
    .bind(long_url)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| StorageError::Other(e.into()))?;

    Err(StorageError::Conflict { existing })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shortened_urls (
                alias TEXT PRIMARY KEY,
                long_url TEXT NOT NULL,
                owner_id TEXT NOT NULL DEFAULT '',
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (owner_id, long_url)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_owner_id ON shortened_urls(owner_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS owners (
                owner_id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn store(&self, alias: &str, long_url: &str, owner_id: &str) -> StorageResult<String> {
        self.check_capacity().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;

        let stored = insert_alias(&mut tx, alias, long_url, owner_id).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;
        Ok(stored)
    }

    async fn store_batch(&self, entries: &[OriginalUrl], owner_id: &str) -> StorageResult<()> {
        self.check_capacity().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;

        // Any failure drops `tx`, which rolls the whole batch back
        for entry in entries {
            insert_alias(&mut tx, &entry.correlation_id, &entry.original_url, owner_id).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;
        Ok(())
    }

    async fn get(&self, alias: &str) -> StorageResult<LongUrl> {
        let record = sqlx::query_as::<_, AliasRecord>(
            r#"
            SELECT alias, long_url, owner_id, is_deleted
            FROM shortened_urls
            WHERE alias = ?
            "#,
        )
        .bind(alias)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?
        .ok_or_else(|| StorageError::NotFound(alias.to_string()))?;

        Ok(LongUrl {
            long_url: record.long_url,
            is_deleted: record.is_deleted,
        })
    }

    async fn get_by_owner(&self, owner_id: &str) -> StorageResult<Vec<OriginalUrl>> {
        let urls = sqlx::query_as::<_, OriginalUrl>(
            r#"
            SELECT alias AS correlation_id, long_url AS original_url
            FROM shortened_urls
            WHERE owner_id = ? AND is_deleted = 0
            "#,
        )
        .bind(owner_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(urls)
    }

    async fn update_deleted_flags(&self, tasks: &[DeletionTask]) -> StorageResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;

        for task in tasks {
            sqlx::query(
                r#"
                UPDATE shortened_urls
                SET is_deleted = 1
                WHERE alias = ? AND owner_id = ?
                "#,
            )
            .bind(&task.alias)
            .bind(&task.owner_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Other(e.into()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.into()))?;
        Ok(())
    }

    async fn create_user(&self) -> StorageResult<String> {
        let owner_id = Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO owners (owner_id, created_at) VALUES (?, ?)")
            .bind(&owner_id)
            .bind(chrono::Utc::now().timestamp())
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| StorageError::Other(e.into()))?;

        Ok(owner_id)
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| StorageError::Other(e.into()))?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
