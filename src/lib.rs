// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, default_config_path, load_and_validate, parse_duration};
use crate::exec::CommandSpec;

pub use crate::engine::{CancelOutcome, RunRegistry, RunSupervisor, SupervisorOptions};
pub use crate::errors::RunvisorError;
pub use crate::types::{RetentionPolicy, RunId, RunSnapshot, RunStatus, RunSummary};

/// How often the CLI polls the run for new output.
const FOLLOW_INTERVAL: Duration = Duration::from_millis(100);

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the supervisor
/// - following the run's log on stdout
/// - Ctrl-C handling (cancels the run)
///
/// Returns the run's terminal status, or `None` for `--dry-run`.
pub async fn run(args: CliArgs) -> Result<Option<RunStatus>> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(grace) = args.grace_period.as_deref() {
        cfg.grace_period = parse_duration(grace)
            .map_err(|e| anyhow!(e))
            .context("invalid --grace-period")?;
    }

    let spec = resolve_command(&cfg, args.template.as_deref(), &args.command)?;

    if args.dry_run {
        print_dry_run(&cfg, &spec);
        return Ok(None);
    }

    let supervisor = RunSupervisor::new(cfg.supervisor_options());
    let id = supervisor.start(&spec)?;
    let status = follow_run(&supervisor, id).await?;

    // Joins the log pump, so the log is complete below.
    supervisor.shutdown().await;
    let snapshot = supervisor.get_run(id)?;
    info!(run_id = %id, status = %snapshot.status, exit_code = ?snapshot.exit_code, "run complete");

    Ok(Some(status))
}

fn load_config(explicit: Option<&str>) -> Result<ConfigFile> {
    if let Some(path) = explicit {
        return load_and_validate(path)
            .with_context(|| format!("loading config file '{path}'"));
    }

    let default_path = default_config_path();
    if default_path.exists() {
        return load_and_validate(&default_path)
            .with_context(|| format!("loading config file '{}'", default_path.display()));
    }

    debug!("no config file found; using defaults");
    Ok(ConfigFile::default())
}

fn resolve_command(
    cfg: &ConfigFile,
    template: Option<&str>,
    command: &[String],
) -> Result<CommandSpec> {
    if let Some(name) = template {
        let template = cfg
            .template(name)
            .ok_or_else(|| anyhow!("no [run.{name}] template in config"))?;
        return Ok(template.instantiate(command));
    }

    let Some((program, args)) = command.split_first() else {
        bail!("nothing to run: pass --template NAME or a command after `--`");
    };
    let mut spec = CommandSpec::new(program).args(args);
    if let Ok(cwd) = std::env::current_dir() {
        spec = spec.current_dir(cwd);
    }
    Ok(spec)
}

/// Stream new log text to stdout until the run finishes.
///
/// The first Ctrl-C cancels the run; following continues until the
/// cancellation has settled the run's status.
async fn follow_run(supervisor: &RunSupervisor, id: RunId) -> Result<RunStatus> {
    let mut printed = 0usize;
    let mut ticker = tokio::time::interval(FOLLOW_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut cancel_task = None;

    let status = loop {
        tokio::select! {
            _ = ticker.tick() => {}

            res = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                match res {
                    Ok(()) => {
                        info!(run_id = %id, "Ctrl-C received; cancelling run");
                        let supervisor = supervisor.clone();
                        cancel_task = Some(tokio::spawn(async move {
                            supervisor.cancel_run(id).await
                        }));
                    }
                    Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
                }
            }
        }

        let snapshot = supervisor.get_run(id)?;
        printed = write_new_output(&snapshot.log, printed)?;
        if snapshot.status.is_terminal() {
            break snapshot.status;
        }
    };

    if let Some(task) = cancel_task {
        let outcome = task.await.context("joining cancel task")??;
        debug!(run_id = %id, ?outcome, "cancellation settled");
    }

    // Output the pump drained after the status settled.
    let snapshot = supervisor.get_run(id)?;
    write_new_output(&snapshot.log, printed)?;

    Ok(status)
}

fn write_new_output(log: &str, printed: usize) -> Result<usize> {
    // Logs only grow, so `printed` is always a char boundary of `log`.
    if let Some(new) = log.get(printed..) {
        if !new.is_empty() {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(new.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(log.len())
}

/// Simple dry-run output: print supervisor settings and the command.
fn print_dry_run(cfg: &ConfigFile, spec: &CommandSpec) {
    println!("runvisor dry-run");
    println!("  supervisor.grace_period = {:?}", cfg.grace_period);
    println!("  supervisor.retention = {:?}", cfg.retention);
    println!();

    println!("templates ({}):", cfg.run.len());
    for (name, template) in cfg.run.iter() {
        println!("  - {name}");
        println!("      program: {}", template.program);
        if !template.args.is_empty() {
            println!("      args: {:?}", template.args);
        }
        if let Some(ref dir) = template.working_dir {
            println!("      working_dir: {}", dir.display());
        }
    }
    println!();

    println!("command:");
    println!("  program: {}", spec.program_display());
    println!("  args: {:?}", spec.args);
    let cwd = spec
        .working_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    println!("  working_dir: {}", cwd.display());

    debug!("dry-run complete (no execution)");
}
