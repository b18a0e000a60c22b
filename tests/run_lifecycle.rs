// tests/run_lifecycle.rs
#![cfg(unix)]

mod common;
use crate::common::builders::{SupervisorBuilder, script};
use crate::common::runs::{wait_for_log, wait_until_finished};
use crate::common::{TestResult, init_tracing};

use std::collections::HashSet;
use std::time::Duration;

use runvisor::exec::{CommandSpec, CommandTemplate};
use runvisor::{RunStatus, RunvisorError};

#[tokio::test]
async fn start_returns_fresh_id_and_run_is_running() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let mut ids = HashSet::new();
    for _ in 0..5 {
        let id = supervisor.start(&script("sleep 2"))?;
        assert!(ids.insert(id), "run id {id} was handed out twice");
        assert_eq!(supervisor.get_run(id)?.status, RunStatus::Running);
    }

    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn lines_are_logged_in_order_and_zero_exit_is_success() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let id = supervisor.start(&script("echo a; sleep 0.2; echo b"))?;
    let snapshot = wait_until_finished(&supervisor, id).await;

    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(snapshot.log, "a\nb\n");
    assert_eq!(snapshot.exit_code, Some(0));
    assert!(snapshot.finished_at.is_some());
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_is_error() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let id = supervisor.start(&script("echo failing; exit 3"))?;
    let snapshot = wait_until_finished(&supervisor, id).await;

    assert_eq!(snapshot.status, RunStatus::Error);
    assert_eq!(snapshot.exit_code, Some(3));
    assert_eq!(snapshot.log, "failing\n");
    Ok(())
}

#[tokio::test]
async fn stderr_is_merged_into_the_log() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let id = supervisor.start(&script("echo out; echo err 1>&2; echo out-again"))?;
    let snapshot = wait_until_finished(&supervisor, id).await;

    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(snapshot.log, "out\nerr\nout-again\n");
    Ok(())
}

#[tokio::test]
async fn interleaved_stdout_and_stderr_keep_write_order() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();
    let alternating = "i=0; while [ $i -lt 200 ]; do \
         if [ $((i % 2)) -eq 0 ]; then echo $i; else echo $i 1>&2; fi; \
         i=$((i + 1)); done";
    let expected: String = (0..200).map(|i| format!("{i}\n")).collect();

    for _ in 0..10 {
        let id = supervisor.start(&script(alternating))?;
        let snapshot = wait_until_finished(&supervisor, id).await;

        assert_eq!(snapshot.status, RunStatus::Success);
        assert_eq!(snapshot.log, expected);
    }
    Ok(())
}

#[tokio::test]
async fn final_line_without_newline_is_terminated() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let id = supervisor.start(&script("printf 'first\\nlast'"))?;
    let snapshot = wait_until_finished(&supervisor, id).await;

    assert_eq!(snapshot.log, "first\nlast\n");
    Ok(())
}

#[tokio::test]
async fn missing_executable_is_reported_and_run_is_error() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let program = "/definitely/not/a/real/binary-runvisor";
    let err = supervisor
        .start(&CommandSpec::new(program).arg("x"))
        .expect_err("spawning a missing binary must fail");

    let run_id = match err {
        RunvisorError::Spawn { run_id, ref program, .. } => {
            assert!(program.contains("binary-runvisor"));
            run_id
        }
        other => panic!("expected Spawn error, got {other:?}"),
    };

    let snapshot = supervisor.get_run(run_id)?;
    assert_eq!(snapshot.status, RunStatus::Error);
    assert!(
        snapshot.log.contains(program),
        "log should name the program: {:?}",
        snapshot.log
    );
    assert!(snapshot.log.contains("failed to start"));
    Ok(())
}

#[tokio::test]
async fn missing_working_directory_is_a_spawn_error() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let spec = script("echo never").current_dir("/definitely/not/a/dir/runvisor");
    match supervisor.start(&spec) {
        Err(RunvisorError::Spawn { run_id, .. }) => {
            assert_eq!(supervisor.get_run(run_id)?.status, RunStatus::Error);
        }
        other => panic!("expected Spawn error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn working_directory_is_applied() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("marker.txt"), "here\n")?;

    let id = supervisor.start(&script("cat marker.txt").current_dir(dir.path()))?;
    let snapshot = wait_until_finished(&supervisor, id).await;

    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(snapshot.log, "here\n");
    Ok(())
}

#[tokio::test]
async fn template_arguments_are_appended() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let template = CommandTemplate::new("sh").with_args(["-c", "echo \"$0 $1\""]);
    let id = supervisor.start_run(&template, ["model-x", "bugs.txt"])?;
    let snapshot = wait_until_finished(&supervisor, id).await;

    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(snapshot.log, "model-x bugs.txt\n");
    Ok(())
}

#[tokio::test]
async fn log_observations_only_ever_extend() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let id = supervisor.start(&script(
        "for i in 1 2 3 4 5 6 7 8; do echo line$i; sleep 0.03; done",
    ))?;

    let mut previous = String::new();
    loop {
        let snapshot = supervisor.get_run(id)?;
        assert!(
            snapshot.log.starts_with(&previous),
            "log shrank or was rewritten: {previous:?} -> {:?}",
            snapshot.log
        );
        previous = snapshot.log;
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let expected: String = (1..=8).map(|i| format!("line{i}\n")).collect();
    assert_eq!(previous, expected);
    Ok(())
}

#[tokio::test]
async fn partial_log_is_readable_while_running() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let id = supervisor.start(&script("echo started; sleep 5"))?;
    let snapshot = wait_for_log(&supervisor, id, "started").await;

    assert_eq!(snapshot.status, RunStatus::Running);
    assert_eq!(snapshot.log, "started\n");

    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failing_run_does_not_affect_others() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let bad = supervisor.start(&script("exit 7"))?;
    let good = supervisor.start(&script("sleep 0.1; echo fine"))?;
    let missing = supervisor.start(&CommandSpec::new("/no/such/runvisor-bin"));
    assert!(missing.is_err());

    assert_eq!(wait_until_finished(&supervisor, bad).await.status, RunStatus::Error);
    let good = wait_until_finished(&supervisor, good).await;
    assert_eq!(good.status, RunStatus::Success);
    assert_eq!(good.log, "fine\n");
    Ok(())
}

#[tokio::test]
async fn unknown_run_is_not_found() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();
    let id = supervisor.start(&script("true"))?;
    let before = supervisor.registry().len();

    let unknown = runvisor::RunId::new();
    assert!(matches!(
        supervisor.get_run(unknown),
        Err(RunvisorError::RunNotFound(got)) if got == unknown
    ));
    assert!(matches!(
        supervisor.wait_for_completion(unknown).await,
        Err(RunvisorError::RunNotFound(_))
    ));
    assert_eq!(supervisor.registry().len(), before);

    wait_until_finished(&supervisor, id).await;
    Ok(())
}

#[tokio::test]
async fn list_runs_is_in_creation_order() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().build();

    let first = supervisor.start(&script("true"))?;
    let second = supervisor.start(&script("true"))?;
    let third = supervisor.start(&script("true"))?;
    for id in [first, second, third] {
        wait_until_finished(&supervisor, id).await;
    }

    let listed: Vec<_> = supervisor.list_runs().into_iter().map(|s| s.id).collect();
    assert_eq!(listed, vec![first, second, third]);
    Ok(())
}

#[tokio::test]
async fn retention_evicts_oldest_finished_runs() -> TestResult {
    init_tracing();
    let supervisor = SupervisorBuilder::new().keep_finished(2).build();

    let mut ids = Vec::new();
    for i in 0..4 {
        let id = supervisor.start(&script(&format!("echo {i}")))?;
        wait_until_finished(&supervisor, id).await;
        ids.push(id);
    }

    assert!(matches!(
        supervisor.get_run(ids[0]),
        Err(RunvisorError::RunNotFound(_))
    ));
    assert!(matches!(
        supervisor.get_run(ids[1]),
        Err(RunvisorError::RunNotFound(_))
    ));
    assert_eq!(supervisor.get_run(ids[2])?.log, "2\n");
    assert_eq!(supervisor.get_run(ids[3])?.log, "3\n");
    Ok(())
}
