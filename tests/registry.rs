// tests/registry.rs

mod common;
use crate::common::{TestResult, init_tracing, with_timeout};

use std::collections::HashSet;
use std::sync::Arc;

use runvisor::engine::{Activity, Finalize, RunRegistry, TerminalStatus};
use runvisor::{RetentionPolicy, RunId, RunStatus};

#[test]
fn created_run_is_running_with_empty_log() {
    init_tracing();
    let registry = RunRegistry::default();

    let id = registry.create();
    let snapshot = registry.get(id).expect("run exists");

    assert_eq!(snapshot.id, id);
    assert_eq!(snapshot.status, RunStatus::Running);
    assert!(snapshot.log.is_empty());
    assert_eq!(snapshot.exit_code, None);
    assert!(snapshot.finished_at.is_none());
    assert!(matches!(registry.activity(id), Some(Activity::Active(None))));
}

#[test]
fn finalize_is_one_way() {
    init_tracing();
    let registry = RunRegistry::default();
    let id = registry.create();

    assert_eq!(
        registry.finalize_with_exit_code(id, TerminalStatus::Success, Some(0)),
        Finalize::Applied
    );
    assert_eq!(
        registry.finalize(id, TerminalStatus::Terminated),
        Finalize::AlreadyTerminal(RunStatus::Success)
    );
    assert_eq!(
        registry.finalize(id, TerminalStatus::Error),
        Finalize::AlreadyTerminal(RunStatus::Success)
    );

    let snapshot = registry.get(id).expect("run exists");
    assert_eq!(snapshot.status, RunStatus::Success);
    assert_eq!(snapshot.exit_code, Some(0));
    assert!(snapshot.finished_at.is_some());
    assert!(matches!(
        registry.activity(id),
        Some(Activity::Terminal(RunStatus::Success))
    ));
}

#[test]
fn unknown_ids_are_harmless() {
    init_tracing();
    let registry = RunRegistry::default();
    let unknown = RunId::new();

    registry.append_log(unknown, "ignored\n");

    assert!(registry.get(unknown).is_none());
    assert!(registry.status(unknown).is_none());
    assert!(registry.activity(unknown).is_none());
    assert!(registry.subscribe(unknown).is_none());
    assert_eq!(
        registry.finalize(unknown, TerminalStatus::Error),
        Finalize::NotFound
    );
    assert!(registry.is_empty());
}

#[test]
fn log_appends_accumulate_in_order() {
    init_tracing();
    let registry = RunRegistry::default();
    let id = registry.create();

    registry.append_log(id, "one\n");
    let first = registry.get(id).expect("run exists");
    registry.append_log(id, "two\n");

    assert_eq!(first.log, "one\n");
    assert_eq!(registry.get(id).expect("run exists").log, "one\ntwo\n");
}

#[test]
fn concurrent_creates_never_collide() {
    init_tracing();
    let registry = Arc::new(RunRegistry::default());

    let ids: Vec<RunId> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                scope.spawn(move || (0..200).map(|_| registry.create()).collect::<Vec<_>>())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().expect("creator thread panicked"))
            .collect()
    });

    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), 8 * 200);
    assert_eq!(registry.len(), 8 * 200);
}

#[test]
fn concurrent_appends_to_one_run_do_not_interleave() {
    init_tracing();
    let registry = Arc::new(RunRegistry::default());
    let id = registry.create();

    std::thread::scope(|scope| {
        for writer in 0..4 {
            let registry = Arc::clone(&registry);
            scope.spawn(move || {
                for n in 0..250 {
                    registry.append_log(id, &format!("writer{writer}-line{n:03}-payload\n"));
                }
            });
        }
    });

    let log = registry.get(id).expect("run exists").log;
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 4 * 250);
    for line in &lines {
        assert!(
            line.starts_with("writer") && line.ends_with("-payload"),
            "torn line: {line:?}"
        );
    }
    // Each writer's own lines stay in order.
    for writer in 0..4 {
        let prefix = format!("writer{writer}-");
        let own: Vec<&&str> = lines.iter().filter(|l| l.starts_with(&prefix)).collect();
        let mut sorted = own.clone();
        sorted.sort();
        assert_eq!(own, sorted);
    }
}

#[test]
fn retention_keeps_running_runs_and_newest_finished() {
    init_tracing();
    let registry = RunRegistry::new(RetentionPolicy::KeepFinished(1));

    let running = registry.create();
    let old = registry.create();
    let new = registry.create();

    registry.finalize(old, TerminalStatus::Success);
    assert!(registry.get(old).is_some());

    registry.finalize(new, TerminalStatus::Error);
    assert!(registry.get(old).is_none(), "oldest finished run should be evicted");
    assert!(registry.get(new).is_some());
    assert!(registry.get(running).is_some(), "running runs are never evicted");
    assert_eq!(registry.len(), 2);
}

#[test]
fn unbounded_retention_keeps_everything() {
    init_tracing();
    let registry = RunRegistry::default();
    assert_eq!(registry.retention(), RetentionPolicy::Unbounded);

    for _ in 0..50 {
        let id = registry.create();
        registry.finalize(id, TerminalStatus::Success);
    }
    assert_eq!(registry.len(), 50);
}

#[test]
fn list_is_oldest_first() {
    init_tracing();
    let registry = RunRegistry::default();
    let ids: Vec<RunId> = (0..10).map(|_| registry.create()).collect();
    registry.finalize(ids[3], TerminalStatus::Terminated);

    let listed = registry.list();
    assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), ids);
    assert_eq!(listed[3].status, RunStatus::Terminated);
    assert!(listed.iter().filter(|s| s.status == RunStatus::Running).count() == 9);
    assert_eq!(registry.active_runs().len(), 9);
}

#[tokio::test]
async fn subscribers_observe_finalization() -> TestResult {
    init_tracing();
    let registry = Arc::new(RunRegistry::default());
    let id = registry.create();
    let mut status_rx = registry.subscribe(id).expect("run exists");
    assert_eq!(*status_rx.borrow(), RunStatus::Running);

    let finisher = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            registry.finalize(id, TerminalStatus::Terminated)
        })
    };

    let status = with_timeout(status_rx.wait_for(|s| s.is_terminal())).await?;
    assert_eq!(*status, RunStatus::Terminated);
    drop(status);
    assert_eq!(finisher.await?, Finalize::Applied);
    Ok(())
}

#[test]
fn run_ids_round_trip_through_strings() -> TestResult {
    let id = RunId::new();
    let parsed: RunId = id.to_string().parse()?;
    assert_eq!(parsed, id);
    assert!("not-a-uuid".parse::<RunId>().is_err());
    Ok(())
}

#[test]
fn status_strings() {
    assert_eq!(RunStatus::Success.to_string(), "success");
    assert_eq!("Terminated".parse::<RunStatus>(), Ok(RunStatus::Terminated));
    assert!("finished".parse::<RunStatus>().is_err());
    assert!(!RunStatus::Running.is_terminal());
}
