// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for starting external commands with
//! `tokio::process::Command` and exposing them to the engine as a
//! [`ProcessHandle`]:
//!
//! - [`command`] describes what to run (`CommandSpec`, `CommandTemplate`).
//! - [`process`] owns a spawned child: merged output lines, graceful and
//!   forced stop, and a reap-once `wait`.

pub mod command;
pub mod process;

pub use command::{CommandSpec, CommandTemplate};
pub use process::{OutputLines, ProcessControl, ProcessExit, ProcessHandle, ReadLine};
