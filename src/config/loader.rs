// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawConfigFile`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] to
/// get typed, checked values.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks the grace period, the retention limit and every run template.
/// - Resolves relative `working_dir` values against the config file's
///   directory.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let mut config = ConfigFile::try_from(raw_config)?;

    let base = config_root_dir(path);
    for template in config.run.values_mut() {
        if let Some(dir) = template.working_dir.take() {
            template.working_dir = Some(if dir.is_relative() {
                base.join(dir)
            } else {
                dir
            });
        }
    }

    Ok(config)
}

/// Default config location: `Runvisor.toml` in the current directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Runvisor.toml")
}

/// Directory relative paths in a config file are resolved against.
///
/// A bare filename like "Runvisor.toml" has an empty parent, in which case
/// this falls back to the current working directory.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
