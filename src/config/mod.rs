// src/config/mod.rs

//! Configuration loading (`Runvisor.toml`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, RawConfigFile, RunTemplateConfig, SupervisorSection};
