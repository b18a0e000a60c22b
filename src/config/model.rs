// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{DEFAULT_GRACE_PERIOD, SupervisorOptions};
use crate::exec::CommandTemplate;
use crate::types::RetentionPolicy;

/// Configuration exactly as read from a TOML file.
///
/// ```toml
/// [supervisor]
/// grace_period = "5s"
/// max_finished_runs = 100
///
/// [run.build]
/// program = "bash"
/// args = ["scripts/build.sh"]
/// working_dir = "."
/// ```
///
/// All sections are optional. Convert to a [`ConfigFile`] with `try_from`
/// to get validated, typed values.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// Named command templates from `[run.<name>]`.
    #[serde(default)]
    pub run: BTreeMap<String, RunTemplateConfig>,
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorSection {
    /// Wait between graceful and forced stop when cancelling, e.g. `"5s"`.
    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    /// How many finished runs to keep. Absent means keep all of them.
    #[serde(default)]
    pub max_finished_runs: Option<usize>,
}

fn default_grace_period() -> String {
    format!("{}s", DEFAULT_GRACE_PERIOD.as_secs())
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            max_finished_runs: None,
        }
    }
}

/// `[run.<name>]` section: a reusable command.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunTemplateConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory; relative paths resolve against the config file's
    /// directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub grace_period: Duration,
    pub retention: RetentionPolicy,
    pub run: BTreeMap<String, CommandTemplate>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            retention: RetentionPolicy::Unbounded,
            run: BTreeMap::new(),
        }
    }
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        grace_period: Duration,
        retention: RetentionPolicy,
        run: BTreeMap<String, CommandTemplate>,
    ) -> Self {
        Self {
            grace_period,
            retention,
            run,
        }
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            grace_period: self.grace_period,
            retention: self.retention,
        }
    }

    pub fn template(&self, name: &str) -> Option<&CommandTemplate> {
        self.run.get(name)
    }
}
