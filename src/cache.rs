//! Session-local map from a log key to the last known persisted identity.
//!
//! Entries are hints. A cached id may point at a deleted or repurposed row, so
//! the coordinator re-checks it before trusting it with a write.

use std::collections::HashMap;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::{ExerciseEntry, LogId, LogKey};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub log_id: Option<LogId>,
    /// `None` when the id was adopted from a lookup and nothing has been
    /// written through it yet.
    pub last_saved_at: Option<OffsetDateTime>,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
    pub pending_exercises: Vec<ExerciseEntry>,
    pub is_finished: bool,
}

impl CacheEntry {
    pub fn saved(log_id: LogId, exercises: Vec<ExerciseEntry>, is_finished: bool) -> Self {
        Self {
            log_id: Some(log_id),
            last_saved_at: Some(OffsetDateTime::now_utc()),
            is_valid: true,
            invalid_reason: None,
            pending_exercises: exercises,
            is_finished,
        }
    }

    /// The cached id, if it is still worth trying.
    pub fn usable_id(&self) -> Option<&LogId> {
        if !self.is_valid {
            return None;
        }
        self.log_id.as_ref().filter(|id| id.is_well_formed())
    }
}

#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: Mutex<HashMap<LogKey, CacheEntry>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &LogKey) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn set(&self, key: LogKey, entry: CacheEntry) {
        self.entries.lock().insert(key, entry);
    }

    /// Marks the entry unusable but keeps its id for diagnostics.
    pub fn invalidate(&self, key: &LogKey, reason: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                debug!(%key, reason, "invalidating cached log identity");
                entry.is_valid = false;
                entry.invalid_reason = Some(reason.to_string());
                true
            }
            None => false,
        }
    }

    /// Records an id discovered through a natural-key lookup.
    pub fn adopt(&self, key: &LogKey, log_id: LogId) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| CacheEntry {
            log_id: None,
            last_saved_at: None,
            is_valid: true,
            invalid_reason: None,
            pending_exercises: Vec::new(),
            is_finished: false,
        });
        entry.log_id = Some(log_id);
        entry.is_valid = true;
        entry.invalid_reason = None;
    }

    pub fn evict(&self, key: &LogKey) -> Option<CacheEntry> {
        self.entries.lock().remove(key)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheEntry, IdentityCache};
    use crate::domain::{ExerciseEntry, LogId, LogKey};

    fn key() -> LogKey {
        LogKey::new("u1", "p1", 0, 0).expect("valid key")
    }

    #[test]
    fn set_overwrites_and_get_returns_copy() {
        let cache = IdentityCache::new();
        assert!(cache.get(&key()).is_none());

        cache.set(key(), CacheEntry::saved(LogId::from("a"), vec![], false));
        cache.set(
            key(),
            CacheEntry::saved(LogId::from("b"), vec![ExerciseEntry::new("row", 1)], true),
        );

        let entry = cache.get(&key()).expect("entry should exist");
        assert_eq!(entry.log_id, Some(LogId::from("b")));
        assert!(entry.is_finished);
        assert!(entry.last_saved_at.is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_keeps_id_and_reason() {
        let cache = IdentityCache::new();
        assert!(!cache.invalidate(&key(), "nothing cached"));

        cache.set(key(), CacheEntry::saved(LogId::from("a"), vec![], false));
        assert!(cache.invalidate(&key(), "validator rejected id"));

        let entry = cache.get(&key()).expect("entry is retained");
        assert!(!entry.is_valid);
        assert_eq!(entry.log_id, Some(LogId::from("a")));
        assert_eq!(entry.invalid_reason.as_deref(), Some("validator rejected id"));
        assert!(entry.usable_id().is_none());
    }

    #[test]
    fn adopt_revalidates_and_preserves_pending_batch() {
        let cache = IdentityCache::new();
        cache.set(
            key(),
            CacheEntry::saved(LogId::from("a"), vec![ExerciseEntry::new("row", 1)], false),
        );
        cache.invalidate(&key(), "stale");
        cache.adopt(&key(), LogId::from("b"));

        let entry = cache.get(&key()).expect("entry should exist");
        assert_eq!(entry.usable_id(), Some(&LogId::from("b")));
        assert_eq!(entry.pending_exercises.len(), 1);
        assert!(entry.invalid_reason.is_none());

        cache.adopt(&LogKey::new("u1", "p1", 0, 1).expect("valid key"), LogId::from("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn malformed_cached_id_is_not_usable() {
        let entry = CacheEntry::saved(LogId::from("undefined"), vec![], false);
        assert!(entry.usable_id().is_none());
    }

    #[test]
    fn evict_and_clear_remove_entries() {
        let cache = IdentityCache::new();
        cache.set(key(), CacheEntry::saved(LogId::from("a"), vec![], false));
        assert!(cache.evict(&key()).is_some());
        assert!(cache.is_empty());

        cache.set(key(), CacheEntry::saved(LogId::from("a"), vec![], false));
        cache.clear();
        assert!(cache.get(&key()).is_none());
    }
}
