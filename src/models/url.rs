use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted alias together with its target and owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AliasRecord {
    pub alias: String,
    pub long_url: String,
    pub owner_id: String,
    pub is_deleted: bool,
}

/// Result of looking up a single alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongUrl {
    pub long_url: String,
    pub is_deleted: bool,
}

/// An entry of a batch request, also used for owner listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OriginalUrl {
    pub correlation_id: String,
    pub original_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortenedEntry {
    pub correlation_id: String,
    pub short_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub original_url: String,
    pub short_url: String,
}

/// Request to soft-delete `alias` on behalf of `owner_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionTask {
    pub owner_id: String,
    pub alias: String,
}

/// One line of the dump file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpRecord {
    pub short_url: String,
    pub long_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
}

impl DumpRecord {
    pub fn new(alias: &str, long_url: &str, owner_id: &str) -> Self {
        Self {
            short_url: alias.to_string(),
            long_url: long_url.to_string(),
            user_id: owner_id.to_string(),
        }
    }
}
