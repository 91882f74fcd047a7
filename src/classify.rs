//! Routing of store failures into retry, fallback or fatal paths.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{BatchError, LogKey};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    ConstraintViolation,
    ValidationUnavailable,
    PermissionDenied,
    NotFoundOnUpdate,
    Malformed,
    Unclassified,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::ConstraintViolation => "constraint_violation",
            ErrorClass::ValidationUnavailable => "validation_unavailable",
            ErrorClass::PermissionDenied => "permission_denied",
            ErrorClass::NotFoundOnUpdate => "not_found_on_update",
            ErrorClass::Malformed => "malformed",
            ErrorClass::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(err: &StoreError) -> ErrorClass {
    match err {
        StoreError::Unavailable(_) | StoreError::Timeout(_) => ErrorClass::Transient,
        StoreError::UniqueConstraintViolation { .. } => ErrorClass::ConstraintViolation,
        StoreError::NotFound { .. } => ErrorClass::NotFoundOnUpdate,
        StoreError::PermissionDenied(_) => ErrorClass::PermissionDenied,
        StoreError::Malformed(_) => ErrorClass::Malformed,
        StoreError::Other(_) => ErrorClass::Unclassified,
    }
}

/// Who should hear about a failure that reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    User,
    Developer,
}

/// Failure of one save attempt, after classification. Raw store errors never
/// cross this boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SaveError {
    #[error("not allowed to save {key}: {message}")]
    PermissionDenied { key: LogKey, message: String },
    #[error("saving {key} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        key: LogKey,
        attempts: u32,
        last_error: String,
    },
    #[error("saving {key} failed: {message}")]
    SaveFailed { key: LogKey, message: String },
    #[error("refusing to save {key}: {message}")]
    Malformed { key: LogKey, message: String },
    #[error("could not resolve the log for {key} after a concurrent create")]
    RaceUnresolved { key: LogKey },
}

impl SaveError {
    pub fn key(&self) -> &LogKey {
        match self {
            SaveError::PermissionDenied { key, .. }
            | SaveError::RetriesExhausted { key, .. }
            | SaveError::SaveFailed { key, .. }
            | SaveError::Malformed { key, .. }
            | SaveError::RaceUnresolved { key } => key,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SaveError::PermissionDenied { .. } => ErrorClass::PermissionDenied,
            SaveError::RetriesExhausted { .. } => ErrorClass::Transient,
            SaveError::SaveFailed { .. } => ErrorClass::Unclassified,
            SaveError::Malformed { .. } => ErrorClass::Malformed,
            SaveError::RaceUnresolved { .. } => ErrorClass::ConstraintViolation,
        }
    }

    pub fn visibility(&self) -> Visibility {
        match self {
            SaveError::PermissionDenied { .. }
            | SaveError::RetriesExhausted { .. }
            | SaveError::SaveFailed { .. } => Visibility::User,
            SaveError::Malformed { .. } | SaveError::RaceUnresolved { .. } => {
                Visibility::Developer
            }
        }
    }

    /// Whether resubmitting the same batch later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SaveError::RetriesExhausted { .. }
                | SaveError::SaveFailed { .. }
                | SaveError::RaceUnresolved { .. }
        )
    }

    pub(crate) fn from_batch(key: &LogKey, err: &BatchError) -> Self {
        SaveError::Malformed {
            key: key.clone(),
            message: err.to_string(),
        }
    }

    pub(crate) fn from_store(key: &LogKey, err: &StoreError, attempts: u32) -> Self {
        let key = key.clone();
        match classify(err) {
            ErrorClass::PermissionDenied => SaveError::PermissionDenied {
                key,
                message: err.to_string(),
            },
            ErrorClass::Malformed => SaveError::Malformed {
                key,
                message: err.to_string(),
            },
            ErrorClass::Transient => SaveError::RetriesExhausted {
                key,
                attempts,
                last_error: err.to_string(),
            },
            ErrorClass::ConstraintViolation => SaveError::RaceUnresolved { key },
            ErrorClass::NotFoundOnUpdate
            | ErrorClass::ValidationUnavailable
            | ErrorClass::Unclassified => SaveError::SaveFailed {
                key,
                message: err.to_string(),
            },
        }
    }
}

/// Bounded retry budget with exponential, jittered backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_transient_retries: u32,
    pub unclassified_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub race_retry_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
            unclassified_retries: 1,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_millis(5000),
            race_retry_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Retries left for `class` after `retries_so_far` retries.
    pub fn allows_retry(&self, class: ErrorClass, retries_so_far: u32) -> bool {
        match class {
            ErrorClass::Transient => retries_so_far < self.max_transient_retries,
            ErrorClass::Unclassified => retries_so_far < self.unclassified_retries,
            _ => false,
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// capped, plus up to half of that again as jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self.backoff_base.saturating_mul(1u32 << exponent);
        let capped = scaled.min(self.backoff_max);
        capped + jitter(capped / 2)
    }

    pub fn race_backoff(&self) -> Duration {
        jitter(self.race_retry_jitter)
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
