// tests/cli.rs

mod common;
use crate::common::{TestResult, init_tracing};

use clap::Parser;
use tempfile::NamedTempFile;

use runvisor::cli::CliArgs;

fn args(argv: &[&str]) -> CliArgs {
    CliArgs::try_parse_from(std::iter::once("runvisor").chain(argv.iter().copied()))
        .expect("valid command line")
}

#[test]
fn trailing_command_keeps_its_own_flags() {
    let parsed = args(&["--grace-period", "1s", "--", "ls", "-la", "--color"]);

    assert_eq!(parsed.grace_period.as_deref(), Some("1s"));
    assert_eq!(parsed.command, vec!["ls", "-la", "--color"]);
    assert!(parsed.template.is_none());
    assert!(!parsed.dry_run);
}

#[tokio::test]
async fn dry_run_resolves_without_executing() -> TestResult {
    init_tracing();
    let parsed = args(&["--dry-run", "--", "definitely-not-a-real-program"]);

    let status = runvisor::run(parsed).await?;

    assert!(status.is_none());
    Ok(())
}

#[tokio::test]
async fn dry_run_with_template_from_config() -> TestResult {
    init_tracing();
    let config = NamedTempFile::new()?;
    std::fs::write(
        config.path(),
        "[run.greet]\nprogram = \"echo\"\nargs = [\"hello\"]\n",
    )?;
    let path = config.path().to_string_lossy().into_owned();

    let parsed = args(&["--config", &path, "--template", "greet", "--dry-run", "world"]);
    assert!(runvisor::run(parsed).await?.is_none());

    let unknown = args(&["--config", &path, "--template", "missing", "--dry-run"]);
    let err = runvisor::run(unknown).await.expect_err("unknown template");
    assert!(err.to_string().contains("run.missing"), "unexpected error: {err}");
    Ok(())
}

#[tokio::test]
async fn nothing_to_run_is_an_error() {
    init_tracing();
    let err = runvisor::run(args(&["--dry-run"]))
        .await
        .expect_err("no command given");
    assert!(err.to_string().contains("nothing to run"));
}

#[tokio::test]
async fn bad_grace_override_is_an_error() {
    init_tracing();
    let err = runvisor::run(args(&["--grace-period", "later", "--dry-run", "--", "true"]))
        .await
        .expect_err("invalid grace period");
    assert!(format!("{err:#}").contains("--grace-period"));
}

#[cfg(unix)]
#[tokio::test]
async fn runs_a_command_to_completion() -> TestResult {
    init_tracing();
    let status = runvisor::run(args(&["--", "sh", "-c", "exit 0"])).await?;
    assert_eq!(status, Some(runvisor::RunStatus::Success));

    let status = runvisor::run(args(&["--", "sh", "-c", "exit 7"])).await?;
    assert_eq!(status, Some(runvisor::RunStatus::Error));
    Ok(())
}
