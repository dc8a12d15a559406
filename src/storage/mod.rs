pub mod memory;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

#[cfg(test)]
pub(crate) mod mock;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

/// Map an insert failure, treating unique violations as a taken alias
///
/// Conflicts on the long URL never reach here: `ON CONFLICT ... DO NOTHING`
/// turns them into an empty result instead of an error.
pub(crate) fn classify_insert_error(err: sqlx::Error, alias: &str) -> StorageError {
    let unique_violation = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());

    if unique_violation {
        StorageError::DuplicateAlias(alias.to_string())
    } else {
        StorageError::Other(err.into())
    }
}
