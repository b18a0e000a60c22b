// src/config/validate.rs

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile, RunTemplateConfig, SupervisorSection};
use crate::errors::{Result, RunvisorError};
use crate::exec::CommandTemplate;
use crate::types::RetentionPolicy;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunvisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let grace_period = validate_grace_period(&raw.supervisor)?;
        let retention = validate_retention(&raw.supervisor)?;
        let run = validate_templates(raw.run)?;
        Ok(ConfigFile::new_unchecked(grace_period, retention, run))
    }
}

fn validate_grace_period(section: &SupervisorSection) -> Result<Duration> {
    let grace = parse_duration(&section.grace_period).map_err(|e| {
        RunvisorError::ConfigError(format!("[supervisor].grace_period: {e}"))
    })?;
    if grace.is_zero() {
        return Err(RunvisorError::ConfigError(
            "[supervisor].grace_period must be greater than zero".to_string(),
        ));
    }
    Ok(grace)
}

fn validate_retention(section: &SupervisorSection) -> Result<RetentionPolicy> {
    match section.max_finished_runs {
        None => Ok(RetentionPolicy::Unbounded),
        Some(0) => Err(RunvisorError::ConfigError(
            "[supervisor].max_finished_runs must be >= 1 (got 0)".to_string(),
        )),
        Some(n) => Ok(RetentionPolicy::KeepFinished(n)),
    }
}

fn validate_templates(
    raw: BTreeMap<String, RunTemplateConfig>,
) -> Result<BTreeMap<String, CommandTemplate>> {
    raw.into_iter()
        .map(|(name, cfg)| {
            if cfg.program.trim().is_empty() {
                return Err(RunvisorError::ConfigError(format!(
                    "run '{name}' has an empty `program`"
                )));
            }
            let mut template = CommandTemplate::new(cfg.program).with_args(cfg.args);
            if let Some(dir) = cfg.working_dir {
                template = template.with_working_dir(dir);
            }
            Ok((name, template))
        })
        .collect()
}
