//! Confirms a cached log id against the store before it is written through.
//!
//! A malformed id is rejected without a store call. Store failures come back
//! as [`ValidationUnavailable`] rather than a verdict, and the caller decides
//! whether to proceed unconfirmed.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{LogId, LogKey};
use crate::store::{LogStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not validate log '{log_id}' for {key}: {source}")]
pub struct ValidationUnavailable {
    pub log_id: LogId,
    pub key: LogKey,
    pub source: StoreError,
}

/// Point check that a cached id still names the row for a key.
pub struct RemoteValidator {
    store: Arc<dyn LogStore>,
}

impl RemoteValidator {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Checks id, account, program, week and day together; an id alone can
    /// outlive the slot it was created for.
    pub fn validate(&self, log_id: &LogId, key: &LogKey) -> Result<bool, ValidationUnavailable> {
        if !log_id.is_well_formed() {
            debug!(%key, %log_id, "malformed cached id; skipping remote validation");
            return Ok(false);
        }

        match self.store.exists_by_id_and_key(log_id, key) {
            Ok(matches) => {
                debug!(%key, %log_id, matches, "validated cached log id");
                Ok(matches)
            }
            Err(source) => {
                warn!(%key, %log_id, error = %source, "log id validation unavailable");
                Err(ValidationUnavailable {
                    log_id: log_id.clone(),
                    key: key.clone(),
                    source,
                })
            }
        }
    }
}
