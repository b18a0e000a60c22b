#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use runvisor::config::{ConfigFile, RawConfigFile, RunTemplateConfig, SupervisorSection};
use runvisor::exec::CommandSpec;
use runvisor::{RetentionPolicy, RunSupervisor, SupervisorOptions};

/// `sh -c <script>`.
pub fn script(script: &str) -> CommandSpec {
    CommandSpec::shell(script)
}

/// Builder for a [`RunSupervisor`] with test-friendly defaults
/// (short grace period, unbounded retention).
pub struct SupervisorBuilder {
    options: SupervisorOptions,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self {
            options: SupervisorOptions {
                grace_period: Duration::from_millis(500),
                retention: RetentionPolicy::Unbounded,
            },
        }
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.options.grace_period = grace;
        self
    }

    pub fn keep_finished(mut self, n: usize) -> Self {
        self.options.retention = RetentionPolicy::KeepFinished(n);
        self
    }

    pub fn build(self) -> RunSupervisor {
        RunSupervisor::new(self.options)
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                supervisor: SupervisorSection::default(),
                run: BTreeMap::new(),
            },
        }
    }

    pub fn grace_period(mut self, grace: &str) -> Self {
        self.config.supervisor.grace_period = grace.to_string();
        self
    }

    pub fn max_finished_runs(mut self, n: usize) -> Self {
        self.config.supervisor.max_finished_runs = Some(n);
        self
    }

    pub fn with_template(mut self, name: &str, program: &str, args: &[&str]) -> Self {
        self.config.run.insert(
            name.to_string(),
            RunTemplateConfig {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                working_dir: None,
            },
        );
        self
    }

    pub fn with_template_dir(mut self, name: &str, dir: impl Into<PathBuf>) -> Self {
        if let Some(template) = self.config.run.get_mut(name) {
            template.working_dir = Some(dir.into());
        }
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
