//! Scripted store used by unit tests to replay races and failures
//! deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc as std_mpsc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::domain::{LogId, LogKey, LogPatch, NewLogRecord, PersistedLogRecord};
use crate::store::{LogStore, MemoryLogStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Find,
    Create,
    Update,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Find(LogKey),
    Create(LogKey),
    Update(LogId),
    Exists(LogId),
}

impl Call {
    fn op(&self) -> Op {
        match self {
            Call::Find(_) => Op::Find,
            Call::Create(_) => Op::Create,
            Call::Update(_) => Op::Update,
            Call::Exists(_) => Op::Exists,
        }
    }
}

struct Gate {
    op: Op,
    entered: mpsc::UnboundedSender<()>,
    release: std_mpsc::Receiver<()>,
}

#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryLogStore,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<Op, VecDeque<StoreError>>>,
    competitors: Mutex<VecDeque<NewLogRecord>>,
    lookup_overrides: Mutex<VecDeque<Option<PersistedLogRecord>>>,
    gate: Mutex<Option<Gate>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryLogStore {
        &self.inner
    }

    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().iter().filter(|call| call.op() == op).count()
    }

    pub fn call_log(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn updated_ids(&self) -> Vec<LogId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Update(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fail_next(&self, op: Op, err: StoreError) {
        self.fail_times(op, err, 1);
    }

    pub fn fail_times(&self, op: Op, err: StoreError, times: usize) {
        let mut failures = self.failures.lock();
        let queue = failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    /// Another session creates `record` just before our next create runs.
    pub fn compete_on_next_create(&self, record: NewLogRecord) {
        self.competitors.lock().push_back(record);
    }

    /// The next `count` lookups miss even when a row exists, like a read
    /// served before a concurrent write became visible.
    pub fn stale_next_lookups(&self, count: usize) {
        let mut overrides = self.lookup_overrides.lock();
        for _ in 0..count {
            overrides.push_back(None);
        }
    }

    /// The next lookup returns `response` verbatim, bypassing the backing map.
    pub fn respond_next_lookup(&self, response: Option<PersistedLogRecord>) {
        self.lookup_overrides.lock().push_back(response);
    }

    /// Holds the next call to `op` until the returned sender fires. The
    /// receiver yields once the call has been entered.
    pub fn gate(&self, op: Op) -> (mpsc::UnboundedReceiver<()>, std_mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        *self.gate.lock() = Some(Gate {
            op,
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    fn enter(&self, call: Call) -> Result<(), StoreError> {
        let op = call.op();
        self.calls.lock().push(call);

        let gate = {
            let mut slot = self.gate.lock();
            if slot.as_ref().is_some_and(|gate| gate.op == op) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }

        let injected = self
            .failures
            .lock()
            .get_mut(&op)
            .and_then(|queue| queue.pop_front());
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl LogStore for ScriptedStore {
    fn find_by_key(&self, key: &LogKey) -> Result<Option<PersistedLogRecord>, StoreError> {
        self.enter(Call::Find(key.clone()))?;
        let scripted = self.lookup_overrides.lock().pop_front();
        match scripted {
            Some(response) => Ok(response),
            None => self.inner.find_by_key(key),
        }
    }

    fn create_log(&self, record: &NewLogRecord) -> Result<PersistedLogRecord, StoreError> {
        self.enter(Call::Create(record.key.clone()))?;
        let competitor = self.competitors.lock().pop_front();
        if let Some(competitor) = competitor {
            let _ = self.inner.create_log(&competitor);
        }
        self.inner.create_log(record)
    }

    fn update_log(
        &self,
        id: &LogId,
        key: &LogKey,
        patch: &LogPatch,
    ) -> Result<PersistedLogRecord, StoreError> {
        self.enter(Call::Update(id.clone()))?;
        self.inner.update_log(id, key, patch)
    }

    fn exists_by_id_and_key(&self, id: &LogId, key: &LogKey) -> Result<bool, StoreError> {
        self.enter(Call::Exists(id.clone()))?;
        self.inner.exists_by_id_and_key(id, key)
    }
}
