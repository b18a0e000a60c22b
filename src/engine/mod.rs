// src/engine/mod.rs

//! Run supervision engine.
//!
//! This module ties together:
//! - the run registry (single source of truth for run state),
//! - the per-run log pump (drains output, decides natural completion),
//! - the supervisor facade (start / get / cancel / shutdown).
//!
//! The registry is plain synchronous state behind fine-grained locks; the
//! pump and the cancellation protocol are the async parts.

pub mod pump;
pub mod registry;
pub mod supervisor;

pub use pump::LogPump;
pub use registry::{Activity, Finalize, RunRegistry, TerminalStatus};
pub use supervisor::{CancelOutcome, DEFAULT_GRACE_PERIOD, RunSupervisor, SupervisorOptions};
