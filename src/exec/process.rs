// src/exec/process.rs

//! Ownership of one OS process and its output.
//!
//! stdout and stderr share the write end of a single pipe, so the log sees
//! lines in exactly the order the process wrote them. A spawned process is
//! then served by two Tokio tasks:
//! - one output reader that splits the pipe into lines,
//! - one reaper that owns the `Child`, waits for it, and is the only place
//!   stop signals are delivered from.
//!
//! Routing signals through the reaper means a signal is never sent after
//! the child has been reaped, so a recycled pid can't be hit by mistake.

use std::io::{self, PipeReader};

use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::command::CommandSpec;

/// Result of one [`ProcessHandle::read_line`] call.
#[derive(Debug)]
pub enum ReadLine {
    /// One line of output, without its trailing newline.
    Line(String),
    /// The output pipe closed normally.
    EndOfStream,
    /// Reading failed. Any partial content read before the failure has
    /// already been delivered as a `Line`.
    Failed(io::Error),
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, or `None` if the process was killed by a signal or its
    /// status could not be collected.
    pub code: Option<i32>,
}

impl ProcessExit {
    const UNKNOWN: ProcessExit = ProcessExit { code: None };

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Graceful,
    Force,
}

/// Handle to a running process: merged output plus lifecycle controls.
///
/// Use [`ProcessHandle::into_parts`] to give the output stream to one task
/// (the log pump) and the controls to whoever needs to stop or await the
/// process.
#[derive(Debug)]
pub struct ProcessHandle {
    output: OutputLines,
    control: ProcessControl,
}

impl ProcessHandle {
    /// Start the process described by `spec`.
    ///
    /// Must be called from within a Tokio runtime. Fails if the program or
    /// the working directory does not exist or cannot be executed.
    pub fn spawn(spec: &CommandSpec) -> io::Result<Self> {
        let (pipe_reader, pipe_writer) = io::pipe()?;
        let mut command = spec.to_command(pipe_writer)?;
        let mut child = command.spawn()?;
        // The command holds our copies of the write end; the reader only
        // sees end-of-stream once they are closed.
        drop(command);
        let pid = child.id();

        let (line_tx, line_rx) = mpsc::channel::<io::Result<String>>(256);
        let reader = spawn_reader(pipe_reader, line_tx)?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(reap(child, pid, signal_rx, exit_tx));

        debug!(
            program = %spec.program_display(),
            pid = ?pid,
            "process spawned"
        );

        Ok(Self {
            output: OutputLines {
                rx: line_rx,
                reader: Some(reader),
            },
            control: ProcessControl {
                pid,
                signals: signal_tx,
                exit: exit_rx,
            },
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.control.pid()
    }

    pub async fn read_line(&mut self) -> ReadLine {
        self.output.read_line().await
    }

    pub fn request_graceful_stop(&self) {
        self.control.request_graceful_stop();
    }

    pub fn force_stop(&self) {
        self.control.force_stop();
    }

    pub async fn wait(&self) -> ProcessExit {
        self.control.wait().await
    }

    /// A cloneable copy of the lifecycle controls.
    pub fn control(&self) -> ProcessControl {
        self.control.clone()
    }

    pub fn into_parts(self) -> (OutputLines, ProcessControl) {
        (self.output, self.control)
    }
}

/// Merged stdout + stderr of one process, one line at a time, in the
/// order the process wrote them.
#[derive(Debug)]
pub struct OutputLines {
    rx: mpsc::Receiver<io::Result<String>>,
    reader: Option<JoinHandle<()>>,
}

impl OutputLines {
    /// Output fed from a channel instead of a process pipe.
    ///
    /// Each `Ok` is delivered as a line; an `Err` is delivered as
    /// [`ReadLine::Failed`]; closing the sender ends the stream.
    pub fn from_channel(rx: mpsc::Receiver<io::Result<String>>) -> Self {
        Self { rx, reader: None }
    }

    /// Suspend until a line is available or the stream has closed.
    pub async fn read_line(&mut self) -> ReadLine {
        match self.rx.recv().await {
            Some(Ok(line)) => ReadLine::Line(line),
            Some(Err(e)) => ReadLine::Failed(e),
            None => ReadLine::EndOfStream,
        }
    }
}

impl Drop for OutputLines {
    fn drop(&mut self) {
        // A grandchild may still hold the pipe open; don't leave the reader behind.
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

/// Lifecycle controls for a process. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProcessControl {
    pid: Option<u32>,
    signals: mpsc::UnboundedSender<StopSignal>,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessControl {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the process to stop (SIGTERM to its process group on Unix).
    ///
    /// Non-blocking; a no-op once the process has exited.
    pub fn request_graceful_stop(&self) {
        if self.signals.send(StopSignal::Graceful).is_err() {
            trace!(pid = ?self.pid, "graceful stop after exit; ignoring");
        }
    }

    /// Kill the process unconditionally. Non-blocking; a no-op once the
    /// process has exited.
    pub fn force_stop(&self) {
        if self.signals.send(StopSignal::Force).is_err() {
            trace!(pid = ?self.pid, "force stop after exit; ignoring");
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Suspend until the process has been reaped.
    ///
    /// The process is reaped exactly once by its reaper task; every call
    /// returns the same cached result.
    pub async fn wait(&self) -> ProcessExit {
        let mut exit = self.exit.clone();
        if let Ok(state) = exit.wait_for(Option::is_some).await {
            return state.unwrap_or(ProcessExit::UNKNOWN);
        }
        // Reaper went away without reporting (runtime shutting down).
        let last = *exit.borrow();
        last.unwrap_or(ProcessExit::UNKNOWN)
    }
}

#[cfg(unix)]
fn spawn_reader(
    pipe: PipeReader,
    tx: mpsc::Sender<io::Result<String>>,
) -> io::Result<JoinHandle<()>> {
    use std::os::fd::OwnedFd;

    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::unix::pipe;

    let pipe = pipe::Receiver::from_owned_fd(OwnedFd::from(pipe))?;

    Ok(tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(decode_line(&buf))).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    forward_failure(&tx, &buf, e).await;
                    break;
                }
            }
        }

        trace!("output reader finished");
    }))
}

/// Without a pollable pipe type, read on the blocking pool.
#[cfg(not(unix))]
fn spawn_reader(
    pipe: PipeReader,
    tx: mpsc::Sender<io::Result<String>>,
) -> io::Result<JoinHandle<()>> {
    use std::io::{BufRead, BufReader};

    Ok(tokio::task::spawn_blocking(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.blocking_send(Ok(decode_line(&buf))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if !buf.is_empty() {
                        let _ = tx.blocking_send(Ok(decode_line(&buf)));
                    }
                    debug!(error = %e, "output read failed");
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }

        trace!("output reader finished");
    }))
}

/// Deliver whatever was read before `e`, then `e` itself.
#[cfg(unix)]
async fn forward_failure(tx: &mpsc::Sender<io::Result<String>>, partial: &[u8], e: io::Error) {
    // read_until keeps whatever it read before failing.
    if !partial.is_empty() {
        let _ = tx.send(Ok(decode_line(partial))).await;
    }
    debug!(error = %e, "output read failed");
    let _ = tx.send(Err(e)).await;
}

/// Lossy UTF-8 decode with the line terminator (`\n` or `\r\n`) removed.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

async fn reap(
    mut child: Child,
    pid: Option<u32>,
    mut signals: mpsc::UnboundedReceiver<StopSignal>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    let mut signals_open = true;

    loop {
        tokio::select! {
            status = child.wait() => {
                let exit = match status {
                    Ok(status) => ProcessExit { code: status.code() },
                    Err(e) => {
                        warn!(pid = ?pid, error = %e, "failed to collect process exit status");
                        ProcessExit::UNKNOWN
                    }
                };
                debug!(pid = ?pid, exit_code = ?exit.code, "process reaped");
                exit_tx.send_replace(Some(exit));
                break;
            }

            signal = signals.recv(), if signals_open => {
                match signal {
                    Some(StopSignal::Graceful) => deliver_graceful(&mut child),
                    Some(StopSignal::Force) => deliver_force(&mut child),
                    // Every controller is gone; keep waiting for the exit.
                    None => signals_open = false,
                }
            }
        }
    }
}

#[cfg(unix)]
fn deliver_graceful(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM delivery failed");
        }
    }
}

#[cfg(not(unix))]
fn deliver_graceful(child: &mut Child) {
    // No cooperative signal available; fall back to a hard stop.
    deliver_force(child);
}

fn deliver_force(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!(pid, error = %e, "SIGKILL delivery to process group failed");
            }
        }
    }

    if let Err(e) = child.start_kill() {
        debug!(pid = ?child.id(), error = %e, "kill of direct child failed");
    }
}
