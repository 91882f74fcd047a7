//! Per-key debounce in front of the coordinator.
//!
//! Each key gets one worker task that owns its pending batch. Edits restart
//! the quiet window and replace the batch; a cycle starts when the window
//! elapses or the key is flushed. The worker awaits each cycle before reading
//! its channel again, so one key never has two cycles in flight, while
//! different keys proceed independently. A worker with nothing to do for
//! [`IDLE_WORKER_TIMEOUT`] retires; the next edit for its key spawns a new one.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::{ErrorClass, Visibility};
use crate::coordinator::{ReconciliationCoordinator, SaveOutcome, SaveReceipt, SaveRequest};
use crate::domain::{ExerciseEntry, LogKey};

const EVENT_CAPACITY: usize = 256;
pub const IDLE_WORKER_TIMEOUT: Duration = Duration::from_secs(30);

/// Display-only view of a key's save state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedStatus {
    pub has_pending_save: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_saved_at: Option<OffsetDateTime>,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveEvent {
    pub key: LogKey,
    #[serde(flatten)]
    pub kind: SaveEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveEventKind {
    Saved(SaveReceipt),
    Skipped,
    /// The batch is kept so [`SaveScheduler::retry_failed`] can resubmit it.
    Failed {
        class: ErrorClass,
        visibility: Visibility,
        message: String,
        request: SaveRequest,
    },
}

enum Command {
    Edit(SaveRequest),
    Flush,
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<Option<SaveRequest>>,
}

struct Shared {
    coordinator: Arc<ReconciliationCoordinator>,
    debounce: Duration,
    idle_timeout: Duration,
    events: broadcast::Sender<SaveEvent>,
    /// Lock order: `workers`, then `dirty`, then `failed`. A worker only
    /// retires while holding `workers` with an empty channel.
    workers: Mutex<HashMap<LogKey, Worker>>,
    /// Keys with an edit that has not been persisted yet. Guarded together
    /// with the worker channels so a late edit is never mistaken for idle.
    dirty: Mutex<HashSet<LogKey>>,
    failed: Mutex<HashMap<LogKey, SaveRequest>>,
}

pub struct SaveScheduler {
    shared: Arc<Shared>,
    runtime: Handle,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl SaveScheduler {
    pub fn new(
        coordinator: Arc<ReconciliationCoordinator>,
        debounce: Duration,
        runtime: Handle,
    ) -> Self {
        Self::with_idle_timeout(coordinator, debounce, IDLE_WORKER_TIMEOUT, runtime)
    }

    pub fn with_idle_timeout(
        coordinator: Arc<ReconciliationCoordinator>,
        debounce: Duration,
        idle_timeout: Duration,
        runtime: Handle,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                coordinator,
                debounce,
                idle_timeout,
                events,
                workers: Mutex::new(HashMap::new()),
                dirty: Mutex::new(HashSet::new()),
                failed: Mutex::new(HashMap::new()),
            }),
            runtime,
            closed: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.shared.debounce
    }

    /// Queues `exercises` as the newest snapshot for `key`. Returns
    /// immediately; the outcome arrives as a [`SaveEvent`].
    pub fn schedule_save(&self, key: LogKey, exercises: Vec<ExerciseEntry>, is_finished: bool) {
        self.submit(SaveRequest {
            key,
            exercises,
            is_finished,
        });
    }

    fn submit(&self, request: SaveRequest) {
        let key = request.key.clone();
        let mut workers = self.shared.workers.lock();
        // Checked under the lock: `shutdown` sets the flag before draining
        // the map, so no worker is spawned after the drain.
        if self.closed.load(Ordering::SeqCst) {
            debug!(%key, "scheduler is shut down; ignoring edit");
            return;
        }
        let worker = workers
            .entry(key.clone())
            .or_insert_with(|| self.spawn_worker(key.clone()));
        let mut dirty = self.shared.dirty.lock();
        if worker.commands.send(Command::Edit(request)).is_err() {
            warn!(%key, "save worker has stopped; edit dropped");
            return;
        }
        // A newer snapshot supersedes any failed batch for this key.
        self.shared.failed.lock().remove(&key);
        dirty.insert(key);
    }

    fn spawn_worker(&self, key: LogKey) -> Worker {
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = self.runtime.spawn(run_worker(
            Arc::clone(&self.shared),
            key,
            receiver,
            self.shutdown_tx.subscribe(),
        ));
        Worker { commands, task }
    }

    pub fn get_cached_status(&self, key: &LogKey) -> CachedStatus {
        let has_pending_save = self.shared.dirty.lock().contains(key);
        let entry = self.shared.coordinator.cache().get(key);
        CachedStatus {
            has_pending_save,
            last_saved_at: entry.as_ref().and_then(|entry| entry.last_saved_at),
            is_valid: entry.is_some_and(|entry| entry.is_valid),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.shared.events.subscribe()
    }

    /// Number of keys with a live worker task.
    pub fn active_workers(&self) -> usize {
        self.shared.workers.lock().len()
    }

    /// Ends the quiet window for `key` now. No-op without a pending batch.
    /// During a running cycle it applies to the edits queued behind it.
    pub fn flush(&self, key: &LogKey) {
        if let Some(worker) = self.shared.workers.lock().get(key) {
            let _ = worker.commands.send(Command::Flush);
        }
    }

    pub fn flush_all(&self) {
        for worker in self.shared.workers.lock().values() {
            let _ = worker.commands.send(Command::Flush);
        }
    }

    /// Resubmits the batch of the last failed cycle for `key` and flushes it.
    /// Returns `false` when nothing failed or a newer edit replaced it.
    pub fn retry_failed(&self, key: &LogKey) -> bool {
        let Some(request) = self.shared.failed.lock().remove(key) else {
            return false;
        };
        info!(%key, "retrying failed save");
        self.submit(request);
        self.flush(key);
        true
    }

    /// Forgets the cached identity for `key`; the next save starts from a
    /// natural-key lookup.
    pub fn clear(&self, key: &LogKey) {
        self.shared.failed.lock().remove(key);
        if self.shared.coordinator.cache().evict(key).is_some() {
            debug!(%key, "cleared cached log identity");
        }
    }

    /// Stops every worker. Cycles already running finish and update the
    /// cache; batches still waiting out their quiet window are returned
    /// unsaved.
    pub async fn shutdown(&self) -> Vec<SaveRequest> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        self.shutdown_tx.send_replace(true);

        let workers: Vec<(LogKey, Worker)> = self.shared.workers.lock().drain().collect();
        let mut abandoned = Vec::new();
        for (key, worker) in workers {
            drop(worker.commands);
            match worker.task.await {
                Ok(Some(request)) => {
                    warn!(%key, "shutting down with an unsaved batch");
                    abandoned.push(request);
                }
                Ok(None) => {}
                Err(err) => warn!(%key, error = %err, "save worker ended abnormally"),
            }
        }
        self.shared.dirty.lock().clear();
        abandoned
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    key: LogKey,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) -> Option<SaveRequest> {
    let mut pending: Option<SaveRequest> = None;
    let mut flush_now = false;

    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            return latest_edit(&mut commands, pending);
        }

        if pending.is_none() {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Edit(request)) => pending = Some(request),
                    Some(Command::Flush) => continue,
                    None => return None,
                },
                () = tokio::time::sleep(shared.idle_timeout) => {
                    match try_retire(&shared, &key, &mut commands) {
                        Some(Command::Edit(request)) => pending = Some(request),
                        Some(Command::Flush) => continue,
                        None => return None,
                    }
                }
                _ = shutdown.changed() => return latest_edit(&mut commands, None),
            }
        }

        let mut flushed = std::mem::take(&mut flush_now);
        while !flushed {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Edit(request)) => {
                        debug!(%key, "coalescing edit into pending batch");
                        pending = Some(request);
                    }
                    Some(Command::Flush) => flushed = true,
                    None => return pending,
                },
                () = tokio::time::sleep(shared.debounce) => break,
                _ = shutdown.changed() => return latest_edit(&mut commands, pending),
            }
        }

        let Some(request) = pending.take() else {
            continue;
        };
        let kind = run_cycle(&shared, request.clone()).await;
        (pending, flush_now) = settle(&shared, &key, &mut commands, request, &kind);
        let _ = shared.events.send(SaveEvent {
            key: key.clone(),
            kind,
        });
    }
}

/// Removes this worker from the map unless a command slipped in first.
/// `submit` sends under the same lock, so an empty channel here means no
/// edit can be lost.
fn try_retire(
    shared: &Shared,
    key: &LogKey,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Option<Command> {
    let mut workers = shared.workers.lock();
    if let Ok(command) = commands.try_recv() {
        return Some(command);
    }
    workers.remove(key);
    debug!(%key, "retiring idle save worker");
    None
}

/// Post-cycle bookkeeping. Edits that arrived mid-cycle collapse into the
/// returned batch, which gets one more cycle: immediately when a flush was
/// queued with it, otherwise after a quiet window.
fn settle(
    shared: &Shared,
    key: &LogKey,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    request: SaveRequest,
    kind: &SaveEventKind,
) -> (Option<SaveRequest>, bool) {
    let mut dirty = shared.dirty.lock();
    let (next, flush) = drain_queue(commands, None);
    if next.is_some() {
        return (next, flush);
    }

    dirty.remove(key);
    match kind {
        SaveEventKind::Saved(_) if request.is_finished => {
            shared.coordinator.cache().evict(key);
            debug!(%key, "workout finished; evicted cached identity");
        }
        SaveEventKind::Failed { .. } => {
            shared.failed.lock().insert(key.clone(), request);
        }
        _ => {}
    }
    (None, false)
}

/// Empties the channel. Yields the newest edit (or `pending` when none was
/// queued) and whether any flush was queued.
fn drain_queue(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    mut pending: Option<SaveRequest>,
) -> (Option<SaveRequest>, bool) {
    let mut flush = false;
    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Edit(request) => pending = Some(request),
            Command::Flush => flush = true,
        }
    }
    (pending, flush)
}

fn latest_edit(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    pending: Option<SaveRequest>,
) -> Option<SaveRequest> {
    drain_queue(commands, pending).0
}

async fn run_cycle(shared: &Shared, request: SaveRequest) -> SaveEventKind {
    let coordinator = Arc::clone(&shared.coordinator);
    let key = request.key.clone();
    info!(%key, exercises = request.exercises.len(), finished = request.is_finished, "starting save cycle");

    let attempt = request.clone();
    let result = tokio::task::spawn_blocking(move || coordinator.reconcile(&attempt)).await;
    match result {
        Ok(Ok(SaveOutcome::Saved(receipt))) => SaveEventKind::Saved(receipt),
        Ok(Ok(SaveOutcome::Skipped)) => SaveEventKind::Skipped,
        Ok(Err(err)) => SaveEventKind::Failed {
            class: err.class(),
            visibility: err.visibility(),
            message: err.to_string(),
            request,
        },
        Err(join) => {
            warn!(%key, error = %join, "save cycle aborted");
            SaveEventKind::Failed {
                class: ErrorClass::Unclassified,
                visibility: Visibility::Developer,
                message: join.to_string(),
                request,
            }
        }
    }
}
