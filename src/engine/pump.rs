// src/engine/pump.rs

//! Per-run task that drains process output into the run's log.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::exec::{OutputLines, ProcessControl, ReadLine};
use crate::types::RunId;

use super::registry::{Finalize, RunRegistry, TerminalStatus};

/// Drains one process's merged output into its run record and decides the
/// run's natural terminal status.
///
/// The pump is the only writer of its run's log once the process is
/// running. When output ends it reaps the process and finalizes the run as
/// `success` (exit code 0) or `error`. If a canceller finalized the run
/// first, the pump's finalize is a no-op.
#[derive(Debug)]
pub struct LogPump {
    id: RunId,
    output: OutputLines,
    process: ProcessControl,
    registry: Arc<RunRegistry>,
}

impl LogPump {
    pub fn new(
        id: RunId,
        output: OutputLines,
        process: ProcessControl,
        registry: Arc<RunRegistry>,
    ) -> Self {
        Self {
            id,
            output,
            process,
            registry,
        }
    }

    /// Run the pump on its own Tokio task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Drain output until end-of-stream, then finalize the run.
    ///
    /// Returns the status the registry holds afterwards, which may have been
    /// set by a canceller rather than by this pump.
    pub async fn run(self) -> TerminalStatus {
        let LogPump {
            id,
            mut output,
            process,
            registry,
        } = self;

        let mut read_failed = false;
        loop {
            match output.read_line().await {
                ReadLine::Line(mut line) => {
                    trace!(run_id = %id, "output: {}", line);
                    line.push('\n');
                    registry.append_log(id, &line);
                }
                ReadLine::EndOfStream => break,
                ReadLine::Failed(e) => {
                    warn!(run_id = %id, error = %e, "reading process output failed; treating as end of stream");
                    read_failed = true;
                    break;
                }
            }
        }
        // Closes our end of the pipe so a process still writing gets EPIPE
        // instead of blocking on a full buffer.
        drop(output);

        let exit = process.wait().await;
        let status = if read_failed || !exit.success() {
            TerminalStatus::Error
        } else {
            TerminalStatus::Success
        };

        match registry.finalize_with_exit_code(id, status, exit.code) {
            Finalize::Applied => {
                info!(run_id = %id, exit_code = ?exit.code, status = ?status, "run finished");
                status
            }
            Finalize::AlreadyTerminal(existing) => {
                trace!(run_id = %id, status = %existing, "run already finalized by canceller");
                TerminalStatus::try_from(existing).unwrap_or(status)
            }
            Finalize::NotFound => {
                trace!(run_id = %id, "run evicted before the pump finished");
                status
            }
        }
    }
}
