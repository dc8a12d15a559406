use crate::models::{AliasRecord, DeletionTask, LongUrl, OriginalUrl};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Bookkeeping overhead charged per stored string
const STRING_OVERHEAD: usize = 16;

/// Approximate footprint of one record
///
/// Each string is counted twice because it also lives in an index.
pub fn entry_cost(alias: &str, long_url: &str) -> u64 {
    [alias, long_url]
        .iter()
        .map(|s| ((s.len() + STRING_OVERHEAD) * 2) as u64)
        .sum()
}

#[derive(Default)]
struct State {
    records: HashMap<String, AliasRecord>,
    /// (owner_id, long_url) -> alias
    long_urls: HashMap<(String, String), String>,
    owners: HashMap<String, Vec<String>>,
    used_bytes: u64,
}

impl State {
    /// Classify a prospective insert without mutating anything
    fn check(&self, alias: &str, long_url: &str, owner_id: &str, limit: u64) -> StorageResult<u64> {
        if self.records.contains_key(alias) {
            return Err(StorageError::DuplicateAlias(alias.to_string()));
        }

        if let Some(existing) = self
            .long_urls
            .get(&(owner_id.to_string(), long_url.to_string()))
        {
            return Err(StorageError::Conflict {
                existing: existing.clone(),
            });
        }

        let cost = entry_cost(alias, long_url);
        if self.used_bytes.saturating_add(cost) > limit {
            return Err(StorageError::CapacityExceeded { limit });
        }

        Ok(cost)
    }

    fn insert(&mut self, alias: &str, long_url: &str, owner_id: &str, cost: u64) {
        self.records.insert(
            alias.to_string(),
            AliasRecord {
                alias: alias.to_string(),
                long_url: long_url.to_string(),
                owner_id: owner_id.to_string(),
                is_deleted: false,
            },
        );
        self.long_urls.insert(
            (owner_id.to_string(), long_url.to_string()),
            alias.to_string(),
        );
        self.owners
            .entry(owner_id.to_string())
            .or_default()
            .push(alias.to_string());
        self.used_bytes += cost;
    }
}

/// In-memory storage guarded by a single reader/writer lock
///
/// Every map and the byte counter change together under the write lock, so
/// the check-then-insert in `store` is atomic with respect to other callers.
pub struct MemoryStorage {
    state: RwLock<State>,
    max_bytes: u64,
}

impl MemoryStorage {
    pub fn new(max_bytes: Option<u64>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            max_bytes: max_bytes.unwrap_or(u64::MAX),
        }
    }

    /// Bytes currently charged against the ceiling
    pub async fn used_bytes(&self) -> u64 {
        self.state.read().await.used_bytes
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn store(&self, alias: &str, long_url: &str, owner_id: &str) -> StorageResult<String> {
        let mut state = self.state.write().await;
        let cost = state.check(alias, long_url, owner_id, self.max_bytes)?;
        state.insert(alias, long_url, owner_id, cost);
        Ok(alias.to_string())
    }

    async fn store_batch(&self, entries: &[OriginalUrl], owner_id: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;

        // Validate the whole batch first so a rejected batch leaves no trace
        let mut aliases = HashSet::new();
        let mut long_urls = HashMap::new();
        let mut total: u64 = 0;
        for entry in entries {
            let cost = state.check(
                &entry.correlation_id,
                &entry.original_url,
                owner_id,
                self.max_bytes,
            )?;

            if !aliases.insert(entry.correlation_id.as_str()) {
                return Err(StorageError::DuplicateAlias(entry.correlation_id.clone()));
            }
            if let Some(existing) =
                long_urls.insert(entry.original_url.as_str(), entry.correlation_id.as_str())
            {
                return Err(StorageError::Conflict {
                    existing: existing.to_string(),
                });
            }

            total = total.saturating_add(cost);
            if state.used_bytes.saturating_add(total) > self.max_bytes {
                return Err(StorageError::CapacityExceeded {
                    limit: self.max_bytes,
                });
            }
        }

        for entry in entries {
            let cost = entry_cost(&entry.correlation_id, &entry.original_url);
            state.insert(&entry.correlation_id, &entry.original_url, owner_id, cost);
        }

        Ok(())
    }

    async fn get(&self, alias: &str) -> StorageResult<LongUrl> {
        let state = self.state.read().await;
        let record = state
            .records
            .get(alias)
            .ok_or_else(|| StorageError::NotFound(alias.to_string()))?;

        Ok(LongUrl {
            long_url: record.long_url.clone(),
            is_deleted: record.is_deleted,
        })
    }

    async fn get_by_owner(&self, owner_id: &str) -> StorageResult<Vec<OriginalUrl>> {
        let state = self.state.read().await;
        let Some(aliases) = state.owners.get(owner_id) else {
            return Ok(Vec::new());
        };

        let urls = aliases
            .iter()
            .filter_map(|alias| state.records.get(alias))
            .filter(|record| !record.is_deleted)
            .map(|record| OriginalUrl {
                correlation_id: record.alias.clone(),
                original_url: record.long_url.clone(),
            })
            .collect();

        Ok(urls)
    }

    async fn update_deleted_flags(&self, tasks: &[DeletionTask]) -> StorageResult<()> {
        let mut state = self.state.write().await;
        for task in tasks {
            if let Some(record) = state.records.get_mut(&task.alias) {
                if record.owner_id == task.owner_id {
                    record.is_deleted = true;
                }
            }
        }
        Ok(())
    }

    async fn create_user(&self) -> StorageResult<String> {
        Ok(Uuid::new_v4().to_string())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
