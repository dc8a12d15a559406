//! Scriptable storage used by unit tests

use crate::models::{DeletionTask, LongUrl, OriginalUrl};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// How `store` answers
#[derive(Debug, Clone)]
pub(crate) enum StoreBehaviour {
    Accept,
    AlwaysDuplicate,
    Conflict(String),
    Fail,
}

pub(crate) struct MockStorage {
    behaviour: StoreBehaviour,
    fail_flushes: bool,
    store_calls: AtomicUsize,
    flushed: Mutex<Vec<Vec<DeletionTask>>>,
}

impl MockStorage {
    pub(crate) fn new(behaviour: StoreBehaviour) -> Self {
        Self {
            behaviour,
            fail_flushes: false,
            store_calls: AtomicUsize::new(0),
            flushed: Mutex::new(Vec::new()),
        }
    }

    /// Every `update_deleted_flags` call is recorded and then fails
    pub(crate) fn failing_flushes() -> Self {
        Self {
            fail_flushes: true,
            ..Self::new(StoreBehaviour::Accept)
        }
    }

    pub(crate) fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn flushed(&self) -> Vec<Vec<DeletionTask>> {
        self.flushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn store(&self, alias: &str, _long_url: &str, _owner_id: &str) -> StorageResult<String> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            StoreBehaviour::Accept => Ok(alias.to_string()),
            StoreBehaviour::AlwaysDuplicate => Err(StorageError::DuplicateAlias(alias.to_string())),
            StoreBehaviour::Conflict(existing) => Err(StorageError::Conflict {
                existing: existing.clone(),
            }),
            StoreBehaviour::Fail => Err(StorageError::Other(anyhow!("connection reset"))),
        }
    }

    async fn store_batch(&self, _entries: &[OriginalUrl], _owner_id: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn get(&self, alias: &str) -> StorageResult<LongUrl> {
        Err(StorageError::NotFound(alias.to_string()))
    }

    async fn get_by_owner(&self, _owner_id: &str) -> StorageResult<Vec<OriginalUrl>> {
        Ok(Vec::new())
    }

    async fn update_deleted_flags(&self, tasks: &[DeletionTask]) -> StorageResult<()> {
        self.flushed.lock().unwrap().push(tasks.to_vec());
        if self.fail_flushes {
            return Err(StorageError::Other(anyhow!("database is locked")));
        }
        Ok(())
    }

    async fn create_user(&self) -> StorageResult<String> {
        Ok("mock-owner".to_string())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
