//! Create-versus-update decision for one log key.
//!
//! A cycle walks cache → validator → natural-key lookup → write, and absorbs
//! the unique-constraint race between sessions that create the same slot at
//! the same time. The cycle is synchronous; the scheduler runs it off the
//! async executor and guarantees one cycle per key at a time.

use std::sync::Arc;
use std::thread;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, IdentityCache};
use crate::classify::{classify, ErrorClass, RetryPolicy, SaveError};
use crate::domain::{
    validate_batch, ExerciseEntry, LogId, LogKey, LogPatch, NewLogRecord, PersistedLogRecord,
};
use crate::store::{usable_record, LogStore, StoreError};
use crate::validator::RemoteValidator;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveRequest {
    pub key: LogKey,
    pub exercises: Vec<ExerciseEntry>,
    pub is_finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// An existing row (cached or found by key) was updated.
    Updated,
    /// This session created the row.
    Created,
    /// Our create lost a race; the winner's row was updated instead.
    Recovered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveReceipt {
    pub key: LogKey,
    pub log_id: LogId,
    pub mode: WriteMode,
    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: OffsetDateTime,
    /// The cached id was used without confirmation because validation was
    /// unavailable.
    pub degraded: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(SaveReceipt),
    /// Empty batch; nothing was sent to the store.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOptions {
    /// Confirm cached ids with the store before writing through them.
    pub validate_cached_ids: bool,
    pub retry: RetryPolicy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            validate_cached_ids: true,
            retry: RetryPolicy::default(),
        }
    }
}

enum CycleError {
    Store(StoreError),
    /// Create collided but the winning row could not be found or updated.
    RaceUnresolved,
}

impl From<StoreError> for CycleError {
    fn from(value: StoreError) -> Self {
        CycleError::Store(value)
    }
}

struct Written {
    record: PersistedLogRecord,
    mode: WriteMode,
}

pub struct ReconciliationCoordinator {
    store: Arc<dyn LogStore>,
    cache: Arc<IdentityCache>,
    validator: RemoteValidator,
    options: ReconcileOptions,
}

impl ReconciliationCoordinator {
    pub fn new(
        store: Arc<dyn LogStore>,
        cache: Arc<IdentityCache>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            validator: RemoteValidator::new(Arc::clone(&store)),
            store,
            cache,
            options,
        }
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    pub fn reconcile(&self, request: &SaveRequest) -> Result<SaveOutcome, SaveError> {
        let key = &request.key;
        if request.exercises.is_empty() {
            debug!(%key, "empty exercise batch; nothing to save");
            return Ok(SaveOutcome::Skipped);
        }
        validate_batch(&request.exercises).map_err(|err| {
            error!(%key, error = %err, "rejecting malformed exercise batch");
            SaveError::from_batch(key, &err)
        })?;

        let policy = &self.options.retry;
        let mut attempts = 0u32;
        let mut transient_retries = 0u32;
        let mut unclassified_retries = 0u32;
        let mut race_retried = false;

        loop {
            attempts += 1;
            let mut degraded = false;
            match self.run_cycle(request, &mut degraded) {
                Ok(written) => {
                    let receipt = self.commit(request, written, degraded, attempts);
                    return Ok(SaveOutcome::Saved(receipt));
                }
                Err(CycleError::RaceUnresolved) if !race_retried => {
                    race_retried = true;
                    let delay = policy.race_backoff();
                    warn!(%key, attempt = attempts, ?delay, "create race unresolved; retrying cycle");
                    thread::sleep(delay);
                }
                Err(CycleError::RaceUnresolved) => {
                    error!(%key, attempt = attempts, "create race unresolved after retry");
                    return Err(SaveError::RaceUnresolved { key: key.clone() });
                }
                Err(CycleError::Store(err)) => {
                    let class = classify(&err);
                    let retries = match class {
                        ErrorClass::Transient => &mut transient_retries,
                        _ => &mut unclassified_retries,
                    };
                    if policy.allows_retry(class, *retries) {
                        *retries += 1;
                        let delay = policy.backoff(*retries);
                        warn!(%key, attempt = attempts, %class, error = %err, ?delay, "save attempt failed; retrying");
                        thread::sleep(delay);
                        continue;
                    }
                    let save_error = SaveError::from_store(key, &err, attempts);
                    error!(%key, attempt = attempts, %class, error = %err, "save failed");
                    return Err(save_error);
                }
            }
        }
    }

    fn commit(
        &self,
        request: &SaveRequest,
        written: Written,
        degraded: bool,
        attempts: u32,
    ) -> SaveReceipt {
        let saved_at = OffsetDateTime::now_utc();
        let log_id = written.record.id;
        self.cache.set(
            request.key.clone(),
            CacheEntry {
                last_saved_at: Some(saved_at),
                ..CacheEntry::saved(
                    log_id.clone(),
                    request.exercises.clone(),
                    request.is_finished,
                )
            },
        );
        info!(key = %request.key, %log_id, mode = ?written.mode, degraded, attempts, "saved workout log");
        SaveReceipt {
            key: request.key.clone(),
            log_id,
            mode: written.mode,
            saved_at,
            degraded,
            attempts,
        }
    }

    fn run_cycle(&self, request: &SaveRequest, degraded: &mut bool) -> Result<Written, CycleError> {
        let key = &request.key;
        let patch = LogPatch::from_batch(request.exercises.clone(), request.is_finished);

        if let Some(id) = self.cached_target(key, degraded) {
            // The store only writes when `id` still belongs to `key`, so an
            // unconfirmed id that now names another slot fails as NotFound.
            match self.store.update_log(&id, key, &patch) {
                Ok(record) => {
                    return Ok(Written {
                        record,
                        mode: WriteMode::Updated,
                    })
                }
                Err(StoreError::NotFound { .. }) => {
                    info!(%key, %id, degraded = *degraded, "cached id no longer names this log; looking up by key");
                    self.cache.invalidate(key, "log not found on update");
                }
                Err(err) => return Err(err.into()),
            }
        }

        match self.lookup(key)? {
            Some(id) => match self.store.update_log(&id, key, &patch) {
                Ok(record) => Ok(Written {
                    record,
                    mode: WriteMode::Updated,
                }),
                Err(StoreError::NotFound { .. }) => {
                    info!(%key, %id, "log found by key vanished before update; creating");
                    self.cache.invalidate(key, "log not found on update");
                    self.create(request, &patch)
                }
                Err(err) => Err(err.into()),
            },
            None => self.create(request, &patch),
        }
    }

    /// Steps 1 and 2: a cached id worth writing through, if any.
    fn cached_target(&self, key: &LogKey, degraded: &mut bool) -> Option<LogId> {
        let id = self.cache.get(key)?.usable_id()?.clone();
        if !self.options.validate_cached_ids {
            return Some(id);
        }

        match self.validator.validate(&id, key) {
            Ok(true) => Some(id),
            Ok(false) => {
                self.cache
                    .invalidate(key, "validator rejected cached id for this log key");
                None
            }
            Err(unavailable) => {
                warn!(%key, %id, error = %unavailable, "proceeding with unconfirmed cached id");
                *degraded = true;
                Some(id)
            }
        }
    }

    /// Step 3. Transport failures mean "unknown", which is safe to treat as
    /// absent: a duplicate create is rejected by the store.
    fn lookup(&self, key: &LogKey) -> Result<Option<LogId>, CycleError> {
        match self.store.find_by_key(key) {
            Ok(found) => {
                let Some(record) = found.and_then(|row| usable_record(key, row)) else {
                    debug!(%key, "no existing log for key");
                    return Ok(None);
                };
                debug!(%key, id = %record.id, "adopting log found by key");
                self.cache.adopt(key, record.id.clone());
                Ok(Some(record.id))
            }
            Err(err) => match classify(&err) {
                ErrorClass::Transient | ErrorClass::Unclassified => {
                    warn!(%key, error = %err, "lookup by key failed; continuing in create mode");
                    Ok(None)
                }
                _ => Err(err.into()),
            },
        }
    }

    fn create(&self, request: &SaveRequest, patch: &LogPatch) -> Result<Written, CycleError> {
        let key = &request.key;
        let record =
            NewLogRecord::for_key(key.clone(), request.exercises.clone(), request.is_finished);
        match self.store.create_log(&record) {
            Ok(record) => Ok(Written {
                record,
                mode: WriteMode::Created,
            }),
            Err(StoreError::UniqueConstraintViolation { .. }) => {
                info!(%key, "another session created this log first; recovering");
                self.recover(key, patch)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Step 5: one lookup for the winner's row, then one update with our batch.
    fn recover(&self, key: &LogKey, patch: &LogPatch) -> Result<Written, CycleError> {
        let winner = self
            .store
            .find_by_key(key)?
            .and_then(|row| usable_record(key, row))
            .ok_or(CycleError::RaceUnresolved)?;
        self.cache.adopt(key, winner.id.clone());

        match self.store.update_log(&winner.id, key, patch) {
            Ok(record) => Ok(Written {
                record,
                mode: WriteMode::Recovered,
            }),
            Err(StoreError::NotFound { .. }) => {
                self.cache.invalidate(key, "winning log vanished during recovery");
                Err(CycleError::RaceUnresolved)
            }
            Err(err) => Err(err.into()),
        }
    }
}
