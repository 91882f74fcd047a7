//! Keeps exactly one persisted workout log per account, program, week and day
//! while edits stream in from an active session.

pub mod app;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheEntry, IdentityCache};
pub use classify::{classify, ErrorClass, RetryPolicy, SaveError, Visibility};
pub use config::{ConfigError, SyncConfig};
pub use coordinator::{
    ReconcileOptions, ReconciliationCoordinator, SaveOutcome, SaveReceipt, SaveRequest, WriteMode,
};
pub use domain::{ExerciseEntry, LogId, LogKey, PersistedLogRecord};
pub use scheduler::{CachedStatus, SaveEvent, SaveEventKind, SaveScheduler};
pub use session::Session;
pub use store::{LogStore, MemoryLogStore, SqliteLogStore, StoreError, StoreOptions};
pub use validator::{RemoteValidator, ValidationUnavailable};
