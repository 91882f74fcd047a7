use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::classify::ErrorClass;
use crate::config::{ConfigError, SyncConfig};
use crate::coordinator::SaveReceipt;
use crate::domain::{ExerciseEntry, InvalidLogKey, LogKey, PersistedLogRecord};
use crate::scheduler::{SaveEvent, SaveEventKind};
use crate::session::Session;
use crate::store::{LogStore, SqliteLogStore, StoreError};

const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    InvalidKey(#[from] InvalidLogKey),
    #[error("invalid JSON in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{message}")]
    Save { class: ErrorClass, message: String },
    #[error("no workout log for {0}")]
    NotFound(LogKey),
    #[error("{0}")]
    InvalidArgument(String),
}

/// One line of a replay file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayEdit {
    pub program_id: String,
    pub week_index: u32,
    pub day_index: u32,
    pub exercises: Vec<ExerciseEntry>,
    #[serde(default)]
    pub is_finished: bool,
    /// Pause before this edit is submitted.
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub events: Vec<SaveEvent>,
    /// Batches still waiting out their quiet window when the session ended.
    pub abandoned: usize,
}

impl ReplayReport {
    pub fn saved(&self) -> usize {
        self.count(|kind| matches!(kind, SaveEventKind::Saved(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|kind| matches!(kind, SaveEventKind::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&SaveEventKind) -> bool) -> usize {
        self.events
            .iter()
            .filter(|event| predicate(&event.kind))
            .count()
    }
}

pub struct App {
    store: Arc<SqliteLogStore>,
    config: SyncConfig,
    account_id: String,
}

impl App {
    pub fn open(db_path: &Path, config: SyncConfig, account_id: &str) -> Result<Self, AppError> {
        config.validate()?;
        let account_id = account_id.trim().to_string();
        if account_id.is_empty() {
            return Err(AppError::InvalidArgument(
                "account id must not be empty".to_string(),
            ));
        }
        let store = SqliteLogStore::open(db_path, config.store_options(Some(account_id.clone())))?;
        Ok(Self {
            store: Arc::new(store),
            config,
            account_id,
        })
    }

    pub fn schema_version(&self) -> Result<i64, AppError> {
        Ok(self.store.schema_version()?)
    }

    pub fn key(&self, program_id: &str, week_index: u32, day_index: u32) -> Result<LogKey, AppError> {
        Ok(LogKey::new(
            &self.account_id,
            program_id,
            week_index,
            day_index,
        )?)
    }

    pub fn show(&self, key: &LogKey) -> Result<PersistedLogRecord, AppError> {
        self.store
            .find_by_key(key)?
            .ok_or_else(|| AppError::NotFound(key.clone()))
    }

    /// Runs one batch through a fresh session, flushing instead of waiting
    /// out the quiet window. `None` means the batch was empty.
    pub async fn save(
        &self,
        key: LogKey,
        exercises: Vec<ExerciseEntry>,
        is_finished: bool,
    ) -> Result<Option<SaveReceipt>, AppError> {
        let session = self.start_session();
        let scheduler = session.scheduler();
        let mut events = scheduler.subscribe();

        scheduler.schedule_save(key.clone(), exercises, is_finished);
        scheduler.flush(&key);

        let outcome = loop {
            match events.recv().await {
                Ok(event) if event.key == key => break Ok(event.kind),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => {
                    break Err(AppError::InvalidArgument(
                        "session closed before the save finished".to_string(),
                    ))
                }
            }
        };
        scheduler.shutdown().await;

        match outcome? {
            SaveEventKind::Saved(receipt) => Ok(Some(receipt)),
            SaveEventKind::Skipped => Ok(None),
            SaveEventKind::Failed { class, message, .. } => Err(AppError::Save { class, message }),
        }
    }

    /// Feeds `edits` through one session with their recorded pauses, then
    /// flushes and collects every save event.
    pub async fn replay(&self, edits: Vec<ReplayEdit>) -> Result<ReplayReport, AppError> {
        let session = self.start_session();
        let scheduler = session.scheduler();
        let mut events = scheduler.subscribe();
        let mut keys = Vec::new();

        for edit in edits {
            if edit.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(edit.delay_ms)).await;
            }
            let key = self.key(&edit.program_id, edit.week_index, edit.day_index)?;
            if !keys.contains(&key) {
                keys.push(key.clone());
            }
            scheduler.schedule_save(key, edit.exercises, edit.is_finished);
        }
        scheduler.flush_all();

        let mut report = ReplayReport::default();
        while keys
            .iter()
            .any(|key| scheduler.get_cached_status(key).has_pending_save)
        {
            if let Ok(received) = timeout(IDLE_POLL, events.recv()).await {
                collect(&mut report, received);
            }
        }
        report.abandoned = scheduler.shutdown().await.len();
        loop {
            match events.try_recv() {
                Ok(event) => report.events.push(event),
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "replay missed save events");
                }
                Err(_) => break,
            }
        }
        debug!(
            events = report.events.len(),
            saved = report.saved(),
            failed = report.failed(),
            "replay finished"
        );
        Ok(report)
    }

    fn start_session(&self) -> Session {
        let store: Arc<dyn LogStore> = self.store.clone();
        Session::start(store, &self.config, Handle::current())
    }
}

fn collect(report: &mut ReplayReport, received: Result<SaveEvent, RecvError>) {
    match received {
        Ok(event) => report.events.push(event),
        Err(RecvError::Lagged(skipped)) => warn!(skipped, "replay missed save events"),
        Err(RecvError::Closed) => {}
    }
}

pub fn parse_exercises(raw: &str, context: &str) -> Result<Vec<ExerciseEntry>, AppError> {
    serde_json::from_str(raw).map_err(|source| AppError::Json {
        context: context.to_string(),
        source,
    })
}

/// Parses a JSON-lines replay file; blank lines are skipped.
pub fn parse_replay(raw: &str) -> Result<Vec<ReplayEdit>, AppError> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| AppError::Json {
                context: format!("replay line {}", index + 1),
                source,
            })
        })
        .collect()
}
