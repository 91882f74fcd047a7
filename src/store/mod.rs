//! Persistence boundary for workout logs.
//!
//! The reconciliation layer only talks to [`LogStore`]; adapters translate
//! their engine's failures into [`StoreError`] so the classifier never sees a
//! raw engine error.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::domain::{LogId, LogKey, LogPatch, NewLogRecord, PersistedLogRecord};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLogStore;
pub use sqlite::{SqliteLogStore, StoreOptions};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("a log already exists for {key}")]
    UniqueConstraintViolation { key: LogKey },
    #[error("log '{id}' not found")]
    NotFound { id: LogId },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out: {0}")]
    Timeout(String),
    #[error("malformed store data: {0}")]
    Malformed(String),
    #[error("store error: {0}")]
    Other(String),
}

pub trait LogStore: Send + Sync {
    fn find_by_key(&self, key: &LogKey) -> Result<Option<PersistedLogRecord>, StoreError>;

    /// Fails with [`StoreError::UniqueConstraintViolation`] when a row for the
    /// record's key already exists.
    fn create_log(&self, record: &NewLogRecord) -> Result<PersistedLogRecord, StoreError>;

    /// Fails with [`StoreError::NotFound`] when `id` no longer resolves to a
    /// row for `key`; a row belonging to another key is left untouched.
    fn update_log(
        &self,
        id: &LogId,
        key: &LogKey,
        patch: &LogPatch,
    ) -> Result<PersistedLogRecord, StoreError>;

    fn exists_by_id_and_key(&self, id: &LogId, key: &LogKey) -> Result<bool, StoreError>;
}

impl<T: LogStore + ?Sized> LogStore for Arc<T> {
    fn find_by_key(&self, key: &LogKey) -> Result<Option<PersistedLogRecord>, StoreError> {
        (**self).find_by_key(key)
    }

    fn create_log(&self, record: &NewLogRecord) -> Result<PersistedLogRecord, StoreError> {
        (**self).create_log(record)
    }

    fn update_log(
        &self,
        id: &LogId,
        key: &LogKey,
        patch: &LogPatch,
    ) -> Result<PersistedLogRecord, StoreError> {
        (**self).update_log(id, key, patch)
    }

    fn exists_by_id_and_key(&self, id: &LogId, key: &LogKey) -> Result<bool, StoreError> {
        (**self).exists_by_id_and_key(id, key)
    }
}

/// Collapses a raw lookup result into "the one row for this key" or nothing.
///
/// More than one row, or a row whose id is empty or a placeholder, is treated
/// as not found so the caller falls back to a create and lets the uniqueness
/// constraint arbitrate.
pub fn normalize_lookup(
    key: &LogKey,
    mut rows: Vec<PersistedLogRecord>,
) -> Option<PersistedLogRecord> {
    if rows.len() > 1 {
        warn!(%key, rows = rows.len(), "lookup returned several rows; treating as not found");
        return None;
    }
    let row = rows.pop()?;
    usable_record(key, row)
}

/// Drops records that cannot be used as the row for `key`.
pub fn usable_record(key: &LogKey, row: PersistedLogRecord) -> Option<PersistedLogRecord> {
    if !row.id.is_well_formed() {
        warn!(%key, id = %row.id, "lookup returned an unusable id; treating as not found");
        return None;
    }
    if &row.key != key {
        warn!(%key, found = %row.key, "lookup returned a row for another key");
        return None;
    }
    Some(row)
}

#[cfg(test)]
mod tests {
    use super::normalize_lookup;
    use crate::domain::{LogId, LogKey, PersistedLogRecord};

    fn row(id: &str, key: &LogKey) -> PersistedLogRecord {
        PersistedLogRecord {
            id: LogId::from(id),
            key: key.clone(),
            name: key.default_log_name(),
            is_finished: false,
            is_draft: true,
            exercises: Vec::new(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            completed_at: None,
        }
    }

    #[test]
    fn single_well_formed_row_is_kept() {
        let key = LogKey::new("u1", "p1", 0, 0).expect("valid key");
        let found = normalize_lookup(&key, vec![row("log-1", &key)]);
        assert_eq!(found.map(|r| r.id), Some(LogId::from("log-1")));
    }

    #[test]
    fn arrays_placeholders_and_foreign_rows_become_not_found() {
        let key = LogKey::new("u1", "p1", 0, 0).expect("valid key");
        let other = LogKey::new("u1", "p1", 0, 1).expect("valid key");

        assert!(normalize_lookup(&key, vec![]).is_none());
        assert!(normalize_lookup(&key, vec![row("a", &key), row("b", &key)]).is_none());
        assert!(normalize_lookup(&key, vec![row("", &key)]).is_none());
        assert!(normalize_lookup(&key, vec![row("undefined", &key)]).is_none());
        assert!(normalize_lookup(&key, vec![row("log-9", &other)]).is_none());
    }
}
