use crate::models::{DeletionTask, LongUrl, OriginalUrl};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The alias is taken; callers may retry with another one
    #[error("alias {0:?} already exists")]
    DuplicateAlias(String),
    /// The long URL already has an alias for this owner; nothing was written
    #[error("long url is already shortened as {existing:?}")]
    Conflict { existing: String },
    #[error("storage limit of {limit} bytes exceeded")]
    CapacityExceeded { limit: u64 },
    #[error("alias {0:?} not found")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Store `long_url` under `alias` for `owner_id`
    ///
    /// Returns the stored alias. Fails with `DuplicateAlias` when the alias is
    /// taken and with `Conflict` carrying the existing alias when the owner
    /// already shortened this URL.
    async fn store(&self, alias: &str, long_url: &str, owner_id: &str) -> StorageResult<String>;

    /// Store a batch of caller-named entries, all or nothing
    async fn store_batch(&self, entries: &[OriginalUrl], owner_id: &str) -> StorageResult<()>;

    /// Look up an alias, deleted records included
    async fn get(&self, alias: &str) -> StorageResult<LongUrl>;

    /// All non-deleted records of an owner, in no particular order
    async fn get_by_owner(&self, owner_id: &str) -> StorageResult<Vec<OriginalUrl>>;

    /// Soft-delete every task whose alias belongs to the task's owner
    ///
    /// Pairs with a mismatched owner are ignored.
    async fn update_deleted_flags(&self, tasks: &[DeletionTask]) -> StorageResult<()>;

    /// Mint a new owner identifier
    async fn create_user(&self) -> StorageResult<String>;

    async fn ping(&self) -> StorageResult<()>;

    async fn close(&self) -> StorageResult<()>;
}
