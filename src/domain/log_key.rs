use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const MAX_LOG_ID_LEN: usize = 128;

/// Strings that have shown up in place of a real identifier.
const PLACEHOLDER_IDS: [&str; 7] = [
    "null",
    "undefined",
    "none",
    "nil",
    "new",
    "temp",
    "placeholder",
];

/// Natural key of a workout log: one slot per account, program, week and day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogKey {
    pub account_id: String,
    pub program_id: String,
    pub week_index: u32,
    pub day_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidLogKey {
    #[error("account id cannot be empty")]
    EmptyAccount,
    #[error("program id cannot be empty")]
    EmptyProgram,
}

impl LogKey {
    pub fn new(
        account_id: &str,
        program_id: &str,
        week_index: u32,
        day_index: u32,
    ) -> Result<Self, InvalidLogKey> {
        let account_id = account_id.trim();
        let program_id = program_id.trim();
        if account_id.is_empty() {
            return Err(InvalidLogKey::EmptyAccount);
        }
        if program_id.is_empty() {
            return Err(InvalidLogKey::EmptyProgram);
        }
        Ok(Self {
            account_id: account_id.to_string(),
            program_id: program_id.to_string(),
            week_index,
            day_index,
        })
    }

    pub fn default_log_name(&self) -> String {
        format!("Week {} Day {}", self.week_index + 1, self.day_index + 1)
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/w{}/d{}",
            self.account_id, self.program_id, self.week_index, self.day_index
        )
    }
}

/// Opaque identifier of a persisted log row.
///
/// Values coming back from a store or a stale cache are not trusted; callers
/// check [`LogId::is_well_formed`] before using one to address a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(String);

impl LogId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_well_formed(&self) -> bool {
        let raw = self.0.as_str();
        if raw.is_empty() || raw.len() > MAX_LOG_ID_LEN {
            return false;
        }
        if PLACEHOLDER_IDS
            .iter()
            .any(|placeholder| raw.eq_ignore_ascii_case(placeholder))
        {
            return false;
        }
        raw.chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
