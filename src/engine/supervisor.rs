// src/engine/supervisor.rs

//! Facade for starting, observing and cancelling runs.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, RunvisorError};
use crate::exec::{CommandSpec, CommandTemplate, ProcessHandle};
use crate::types::{RetentionPolicy, RunId, RunSnapshot, RunStatus, RunSummary};

use super::pump::LogPump;
use super::registry::{Activity, Finalize, RunRegistry, TerminalStatus};

/// Default wait between the graceful and the forced stop of a cancelled run.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Knobs for a [`RunSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub grace_period: Duration,
    pub retention: RetentionPolicy,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            retention: RetentionPolicy::Unbounded,
        }
    }
}

/// What a cancel request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run had already finished; nothing was signalled.
    AlreadyFinished(RunStatus),
    /// The run had no process yet; it was finalized as `terminated`.
    NotStarted(RunStatus),
    /// The process stopped within the grace period. The status is the one
    /// the log pump decided.
    Stopped(RunStatus),
    /// The process ignored the graceful stop and was killed.
    Killed(RunStatus),
}

impl CancelOutcome {
    /// Status of the run as observed when the cancel call returned.
    pub fn status(&self) -> RunStatus {
        match *self {
            CancelOutcome::AlreadyFinished(s)
            | CancelOutcome::NotStarted(s)
            | CancelOutcome::Stopped(s)
            | CancelOutcome::Killed(s) => s,
        }
    }

    /// Whether this call signalled or finalized anything.
    pub fn acted(&self) -> bool {
        !matches!(self, CancelOutcome::AlreadyFinished(_))
    }
}

/// Starts processes as runs, tracks them in a [`RunRegistry`], and cancels
/// them with a bounded graceful-then-forced escalation.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Debug, Clone)]
pub struct RunSupervisor {
    registry: Arc<RunRegistry>,
    grace_period: Duration,
}

impl Default for RunSupervisor {
    fn default() -> Self {
        Self::new(SupervisorOptions::default())
    }
}

impl RunSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self::with_registry(
            Arc::new(RunRegistry::new(options.retention)),
            options.grace_period,
        )
    }

    pub fn with_registry(registry: Arc<RunRegistry>, grace_period: Duration) -> Self {
        Self {
            registry,
            grace_period,
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Start `template` with `args` appended to its own arguments.
    pub fn start_run<I, S>(&self, template: &CommandTemplate, args: I) -> Result<RunId>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.start(&template.instantiate(args))
    }

    /// Create a run for `spec` and start its process.
    ///
    /// Returns as soon as the process is spawned; output draining happens on
    /// a separate task. Must be called from within a Tokio runtime.
    ///
    /// If the process can't be spawned, the run is still created, finalized
    /// as `error` with the reason in its log, and the returned
    /// [`RunvisorError::Spawn`] carries its id.
    pub fn start(&self, spec: &CommandSpec) -> Result<RunId> {
        let id = self.registry.create();
        let program = spec.program_display();
        info!(run_id = %id, %program, args = ?spec.args, "run accepted");

        let handle = match ProcessHandle::spawn(spec) {
            Ok(handle) => handle,
            Err(source) => {
                error!(run_id = %id, %program, error = %source, "failed to spawn run process");
                self.registry
                    .append_log(id, &format!("failed to start '{program}': {source}\n"));
                self.registry.finalize(id, TerminalStatus::Error);
                return Err(RunvisorError::Spawn {
                    run_id: id,
                    program,
                    source,
                });
            }
        };

        let pid = handle.pid();
        let (output, control) = handle.into_parts();
        if !self.registry.attach_process(id, control.clone()) {
            // Cancelled between create() and spawn; the pump still reaps it.
            debug!(run_id = %id, ?pid, "run cancelled before spawn completed; killing process");
            control.force_stop();
        }

        let pump = LogPump::new(id, output, control, Arc::clone(&self.registry)).spawn();
        self.registry.attach_pump(id, pump);

        info!(run_id = %id, ?pid, "run started");
        Ok(id)
    }

    /// Snapshot of a run's status and log so far.
    pub fn get_run(&self, id: RunId) -> Result<RunSnapshot> {
        self.registry.get(id).ok_or(RunvisorError::RunNotFound(id))
    }

    pub fn list_runs(&self) -> Vec<RunSummary> {
        self.registry.list()
    }

    /// Suspend until the run reaches a terminal status.
    pub async fn wait_for_completion(&self, id: RunId) -> Result<RunStatus> {
        let mut status_rx = self
            .registry
            .subscribe(id)
            .ok_or(RunvisorError::RunNotFound(id))?;
        if let Ok(status) = status_rx.wait_for(|s| s.is_terminal()).await {
            return Ok(*status);
        }
        // Evicted while we waited; it was terminal by then.
        let last = *status_rx.borrow();
        Ok(last)
    }

    /// Cancel a run: graceful stop, wait up to the grace period for it to
    /// finish, then kill it and mark it `terminated`.
    ///
    /// Cancelling a finished run is a no-op. A status set by the log pump
    /// during the grace period is never overwritten.
    pub async fn cancel_run(&self, id: RunId) -> Result<CancelOutcome> {
        let activity = self
            .registry
            .activity(id)
            .ok_or(RunvisorError::RunNotFound(id))?;

        let process = match activity {
            Activity::Terminal(status) => {
                debug!(run_id = %id, %status, "cancel requested for finished run");
                return Ok(CancelOutcome::AlreadyFinished(status));
            }
            Activity::Active(None) => {
                info!(run_id = %id, "cancel requested before process attached; terminating run");
                let status = self.finalize_terminated(id);
                return Ok(CancelOutcome::NotStarted(status));
            }
            Activity::Active(Some(process)) => process,
        };

        let Some(mut status_rx) = self.registry.subscribe(id) else {
            return Err(RunvisorError::RunNotFound(id));
        };

        info!(
            run_id = %id,
            pid = ?process.pid(),
            grace_period = ?self.grace_period,
            "cancelling run; requesting graceful stop"
        );
        process.request_graceful_stop();

        let finished = timeout(self.grace_period, status_rx.wait_for(|s| s.is_terminal()))
            .await
            .map(|waited| waited.map(|status| *status));

        match finished {
            Ok(Ok(status)) => {
                info!(run_id = %id, %status, "run stopped within grace period");
                Ok(CancelOutcome::Stopped(status))
            }
            Ok(Err(_)) => {
                // Registry entry dropped (evicted), so the run was terminal.
                let status = *status_rx.borrow();
                Ok(CancelOutcome::Stopped(status))
            }
            Err(_elapsed) => {
                // Claim `terminated` before killing: once the kill lands, the
                // pump sees end-of-stream and would otherwise race us to
                // finalize with `error`.
                let claimed = self.registry.finalize(id, TerminalStatus::Terminated);
                if let Finalize::AlreadyTerminal(status) = claimed {
                    // Exited on its own right at the deadline; already reaped.
                    debug!(run_id = %id, %status, "run finished as the grace period ran out");
                    return Ok(CancelOutcome::Stopped(status));
                }

                warn!(
                    run_id = %id,
                    pid = ?process.pid(),
                    "run ignored graceful stop for {:?}; killing",
                    self.grace_period
                );
                process.force_stop();
                let exit = process.wait().await;
                debug!(run_id = %id, exit_code = ?exit.code, "killed process reaped");
                info!(run_id = %id, "run terminated");
                Ok(CancelOutcome::Killed(RunStatus::Terminated))
            }
        }
    }

    /// Kill every running process, mark those runs `terminated`, and join
    /// all log pump tasks.
    pub async fn shutdown(&self) {
        let active = self.registry.active_runs();
        info!(active = active.len(), "supervisor shutting down");

        // Finalize first so the pumps can't record the kill as `error`.
        for (id, _) in &active {
            self.finalize_terminated(*id);
        }
        for (_, process) in &active {
            if let Some(process) = process {
                process.force_stop();
            }
        }
        for (_, process) in &active {
            if let Some(process) = process {
                process.wait().await;
            }
        }

        for (id, pump) in self.registry.take_pumps() {
            if let Err(e) = pump.await {
                warn!(run_id = %id, error = %e, "log pump task failed");
            }
        }
        debug!("supervisor shutdown complete");
    }

    fn finalize_terminated(&self, id: RunId) -> RunStatus {
        match self.registry.finalize(id, TerminalStatus::Terminated) {
            Finalize::Applied => {
                info!(run_id = %id, "run terminated");
                RunStatus::Terminated
            }
            Finalize::AlreadyTerminal(status) => status,
            // Evicted right after finishing.
            Finalize::NotFound => RunStatus::Terminated,
        }
    }
}
