use std::collections::HashMap;

use parking_lot::Mutex;

use super::{LogStore, StoreError};
use crate::domain::{now_utc_rfc3339, LogId, LogKey, LogPatch, NewLogRecord, PersistedLogRecord};

/// In-process [`LogStore`] with the same uniqueness rule as the SQLite
/// adapter. Shared through an `Arc`, it stands in for one remote store seen by
/// several sessions.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    rows: Mutex<HashMap<LogId, PersistedLogRecord>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows_for_key(&self, key: &LogKey) -> Vec<PersistedLogRecord> {
        self.rows
            .lock()
            .values()
            .filter(|row| &row.key == key)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &LogId) -> Option<PersistedLogRecord> {
        self.rows.lock().get(id).cloned()
    }

    pub fn delete(&self, id: &LogId) -> Option<PersistedLogRecord> {
        self.rows.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogStore for MemoryLogStore {
    fn find_by_key(&self, key: &LogKey) -> Result<Option<PersistedLogRecord>, StoreError> {
        Ok(super::normalize_lookup(key, self.rows_for_key(key)))
    }

    fn create_log(&self, record: &NewLogRecord) -> Result<PersistedLogRecord, StoreError> {
        let mut rows = self.rows.lock();
        if rows.values().any(|row| row.key == record.key) {
            return Err(StoreError::UniqueConstraintViolation {
                key: record.key.clone(),
            });
        }

        let now = now_utc_rfc3339();
        let row = PersistedLogRecord {
            id: LogId::generate(),
            key: record.key.clone(),
            name: record.name.clone(),
            is_finished: record.is_finished,
            is_draft: !record.is_finished,
            exercises: record.exercises.clone(),
            completed_at: record.is_finished.then(|| now.clone()),
            updated_at: now,
        };
        rows.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    fn update_log(
        &self,
        id: &LogId,
        key: &LogKey,
        patch: &LogPatch,
    ) -> Result<PersistedLogRecord, StoreError> {
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(id)
            .filter(|row| &row.key == key)
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
        patch.apply_to(row, &now_utc_rfc3339());
        Ok(row.clone())
    }

    fn exists_by_id_and_key(&self, id: &LogId, key: &LogKey) -> Result<bool, StoreError> {
        Ok(self.rows.lock().get(id).is_some_and(|row| &row.key == key))
    }
}
