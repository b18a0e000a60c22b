// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::RunId;

#[derive(Error, Debug)]
pub enum RunvisorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Failed to spawn '{program}' for run {run_id}: {source}")]
    Spawn {
        run_id: RunId,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunvisorError>;
