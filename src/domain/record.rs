use serde::{Deserialize, Serialize};

use super::exercise::ExerciseEntry;
use super::log_key::{LogId, LogKey};

/// Authoritative row as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedLogRecord {
    pub id: LogId,
    #[serde(flatten)]
    pub key: LogKey,
    pub name: String,
    pub is_finished: bool,
    pub is_draft: bool,
    pub exercises: Vec<ExerciseEntry>,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLogRecord {
    pub key: LogKey,
    pub name: String,
    pub is_finished: bool,
    pub exercises: Vec<ExerciseEntry>,
}

impl NewLogRecord {
    pub fn for_key(key: LogKey, exercises: Vec<ExerciseEntry>, is_finished: bool) -> Self {
        Self {
            name: key.default_log_name(),
            key,
            is_finished,
            exercises,
        }
    }
}

/// Partial update; `None` fields are left as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogPatch {
    pub name: Option<String>,
    pub is_finished: Option<bool>,
    pub exercises: Option<Vec<ExerciseEntry>>,
}

impl LogPatch {
    pub fn from_batch(exercises: Vec<ExerciseEntry>, is_finished: bool) -> Self {
        Self {
            name: None,
            is_finished: Some(is_finished),
            exercises: Some(exercises),
        }
    }

    /// Merges touched fields into `record` and keeps the derived columns in
    /// step. `now` is stamped as `updated_at`, and as `completed_at` the first
    /// time the record becomes finished.
    pub fn apply_to(&self, record: &mut PersistedLogRecord, now: &str) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(exercises) = &self.exercises {
            record.exercises = exercises.clone();
        }
        if let Some(is_finished) = self.is_finished {
            record.is_finished = is_finished;
            record.is_draft = !is_finished;
            if is_finished && record.completed_at.is_none() {
                record.completed_at = Some(now.to_string());
            }
        }
        record.updated_at = now.to_string();
    }
}
