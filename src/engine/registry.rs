// src/engine/registry.rs

//! Concurrency-safe directory of runs.
//!
//! Locking layout:
//! - one `RwLock` around the id -> entry map, held only for lookup, insert
//!   and eviction;
//! - one `Mutex` per run record, so appends to one run never wait on
//!   another run.
//!
//! Lock order is always map -> record, never the reverse.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::exec::ProcessControl;
use crate::types::{RetentionPolicy, RunId, RunSnapshot, RunStatus, RunSummary};

/// The terminal subset of [`RunStatus`], accepted by [`RunRegistry::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalStatus {
    Success,
    Error,
    Terminated,
}

impl From<TerminalStatus> for RunStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Success => RunStatus::Success,
            TerminalStatus::Error => RunStatus::Error,
            TerminalStatus::Terminated => RunStatus::Terminated,
        }
    }
}

impl TryFrom<RunStatus> for TerminalStatus {
    type Error = RunStatus;

    fn try_from(status: RunStatus) -> Result<Self, RunStatus> {
        match status {
            RunStatus::Success => Ok(TerminalStatus::Success),
            RunStatus::Error => Ok(TerminalStatus::Error),
            RunStatus::Terminated => Ok(TerminalStatus::Terminated),
            RunStatus::Running => Err(status),
        }
    }
}

/// Result of [`RunRegistry::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    /// This call moved the run to its terminal status.
    Applied,
    /// The run had already reached this terminal status; nothing changed.
    AlreadyTerminal(RunStatus),
    NotFound,
}

/// What a canceller finds when it looks a run up.
#[derive(Debug, Clone)]
pub enum Activity {
    Terminal(RunStatus),
    /// Still running. The process is `None` between record creation and a
    /// successful spawn.
    Active(Option<ProcessControl>),
}

#[derive(Debug)]
struct RunRecord {
    status: RunStatus,
    log: String,
    exit_code: Option<i32>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    process: Option<ProcessControl>,
    pump: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct RunEntry {
    /// Creation order, used for listing and eviction.
    seq: u64,
    record: Mutex<RunRecord>,
    status_tx: watch::Sender<RunStatus>,
}

impl RunEntry {
    fn snapshot(&self, id: RunId) -> RunSnapshot {
        let record = self.record.lock();
        RunSnapshot {
            id,
            status: record.status,
            log: record.log.clone(),
            exit_code: record.exit_code,
            created_at: record.created_at,
            finished_at: record.finished_at,
        }
    }

    fn summary(&self, id: RunId) -> RunSummary {
        let record = self.record.lock();
        RunSummary {
            id,
            status: record.status,
            created_at: record.created_at,
            finished_at: record.finished_at,
        }
    }
}

/// Single source of truth for run state.
///
/// Constructed once and shared (`Arc<RunRegistry>`) between the supervisor,
/// the log pumps and any request handlers.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, Arc<RunEntry>>>,
    next_seq: AtomicU64,
    retention: RetentionPolicy,
}

impl RunRegistry {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Allocate a fresh run in `running` state with an empty log.
    pub fn create(&self) -> RunId {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (status_tx, _) = watch::channel(RunStatus::Running);
        let entry = Arc::new(RunEntry {
            seq,
            record: Mutex::new(RunRecord {
                status: RunStatus::Running,
                log: String::new(),
                exit_code: None,
                created_at: Utc::now(),
                finished_at: None,
                process: None,
                pump: None,
            }),
            status_tx,
        });

        let mut runs = self.runs.write();
        let mut id = RunId::new();
        while runs.contains_key(&id) {
            id = RunId::new();
        }
        runs.insert(id, entry);

        debug!(run_id = %id, seq, "run record created");
        id
    }

    fn entry(&self, id: RunId) -> Option<Arc<RunEntry>> {
        self.runs.read().get(&id).cloned()
    }

    /// Install the process controls on a running record.
    ///
    /// Returns `false` (and installs nothing) if the run is unknown or was
    /// finalized before the process could be attached.
    pub fn attach_process(&self, id: RunId, process: ProcessControl) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut record = entry.record.lock();
        if record.status.is_terminal() {
            debug!(run_id = %id, status = %record.status, "run already finalized; not attaching process");
            return false;
        }
        record.process = Some(process);
        true
    }

    /// Remember the log pump task so shutdown can join it.
    pub fn attach_pump(&self, id: RunId, pump: JoinHandle<()>) {
        match self.entry(id) {
            Some(entry) => entry.record.lock().pump = Some(pump),
            None => trace!(run_id = %id, "run gone before its pump was attached"),
        }
    }

    /// Append text to a run's log. Unknown ids are ignored.
    pub fn append_log(&self, id: RunId, text: &str) {
        match self.entry(id) {
            Some(entry) => entry.record.lock().log.push_str(text),
            None => trace!(run_id = %id, "append to unknown run ignored"),
        }
    }

    /// Move a run to a terminal status.
    ///
    /// Only the first call for a run has any effect; later calls report
    /// the status that won.
    pub fn finalize(&self, id: RunId, status: TerminalStatus) -> Finalize {
        self.finalize_with_exit_code(id, status, None)
    }

    /// Like [`finalize`](Self::finalize), also recording the exit code of a
    /// process that ended on its own.
    pub fn finalize_with_exit_code(
        &self,
        id: RunId,
        status: TerminalStatus,
        exit_code: Option<i32>,
    ) -> Finalize {
        let Some(entry) = self.entry(id) else {
            return Finalize::NotFound;
        };

        let status = RunStatus::from(status);
        {
            let mut record = entry.record.lock();
            if record.status.is_terminal() {
                return Finalize::AlreadyTerminal(record.status);
            }
            record.status = status;
            record.exit_code = exit_code;
            record.finished_at = Some(Utc::now());
            record.process = None;
            // Publish while still holding the record lock so watchers never
            // see the channel lag behind the record.
            entry.status_tx.send_replace(status);
        }

        debug!(run_id = %id, %status, exit_code = ?exit_code, "run finalized");
        self.enforce_retention();
        Finalize::Applied
    }

    /// Immutable copy of a run's status and log.
    pub fn get(&self, id: RunId) -> Option<RunSnapshot> {
        self.entry(id).map(|entry| entry.snapshot(id))
    }

    pub fn status(&self, id: RunId) -> Option<RunStatus> {
        self.entry(id).map(|entry| entry.record.lock().status)
    }

    pub fn activity(&self, id: RunId) -> Option<Activity> {
        let entry = self.entry(id)?;
        let record = entry.record.lock();
        Some(if record.status.is_terminal() {
            Activity::Terminal(record.status)
        } else {
            Activity::Active(record.process.clone())
        })
    }

    /// Watch a run's status. The receiver sees the terminal status as soon
    /// as [`finalize`](Self::finalize) applies it.
    pub fn subscribe(&self, id: RunId) -> Option<watch::Receiver<RunStatus>> {
        self.entry(id).map(|entry| entry.status_tx.subscribe())
    }

    /// Summaries of every retained run, oldest first.
    pub fn list(&self) -> Vec<RunSummary> {
        let mut entries: Vec<(RunId, Arc<RunEntry>)> = self
            .runs
            .read()
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(id, entry)| entry.summary(id))
            .collect()
    }

    /// Runs that are still `running`, with their process controls if any.
    pub fn active_runs(&self) -> Vec<(RunId, Option<ProcessControl>)> {
        self.runs
            .read()
            .iter()
            .filter_map(|(id, entry)| {
                let record = entry.record.lock();
                (!record.status.is_terminal()).then(|| (*id, record.process.clone()))
            })
            .collect()
    }

    /// Take every tracked pump handle out of the registry.
    pub fn take_pumps(&self) -> Vec<(RunId, JoinHandle<()>)> {
        self.runs
            .read()
            .iter()
            .filter_map(|(id, entry)| entry.record.lock().pump.take().map(|h| (*id, h)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }

    fn enforce_retention(&self) {
        let RetentionPolicy::KeepFinished(keep) = self.retention else {
            return;
        };

        let mut runs = self.runs.write();
        let mut finished: Vec<(u64, RunId)> = runs
            .iter()
            .filter(|(_, entry)| entry.record.lock().status.is_terminal())
            .map(|(id, entry)| (entry.seq, *id))
            .collect();
        if finished.len() <= keep {
            return;
        }

        finished.sort_unstable();
        let excess = finished.len() - keep;
        for (_, id) in finished.into_iter().take(excess) {
            runs.remove(&id);
            debug!(run_id = %id, "evicted finished run (retention limit {keep})");
        }
    }
}
