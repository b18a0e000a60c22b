use std::time::Duration;

use runvisor::{RunId, RunSnapshot, RunSupervisor};

use crate::with_timeout;

/// Wait for the run to reach a terminal status and return its final
/// snapshot.
pub async fn wait_until_finished(supervisor: &RunSupervisor, id: RunId) -> RunSnapshot {
    with_timeout(async {
        supervisor
            .wait_for_completion(id)
            .await
            .expect("run should exist while waiting for it");
        supervisor
            .get_run(id)
            .expect("run should exist after finishing")
    })
    .await
}

/// Poll the run until its log contains `needle`.
pub async fn wait_for_log(supervisor: &RunSupervisor, id: RunId, needle: &str) -> RunSnapshot {
    with_timeout(async {
        loop {
            let snapshot = supervisor.get_run(id).expect("run should exist");
            if snapshot.log.contains(needle) {
                return snapshot;
            }
            if snapshot.status.is_terminal() {
                panic!(
                    "run finished as {} without logging {needle:?}; log: {:?}",
                    snapshot.status, snapshot.log
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// Whether a process with this pid still exists (Unix only).
///
/// A reaped process no longer exists; a zombie still does.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}
