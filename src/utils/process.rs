//! Bounded process termination and script execution
//!
//! Every wait in this crate carries an explicit upper bound; exceeding the
//! bound upgrades a graceful action to a forced one instead of blocking
//! indefinitely.

use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Gracefully terminate a child, escalating to SIGKILL after `grace`.
///
/// Sends SIGTERM, waits up to the bound, then forces termination. Always
/// reaps the child; returns its exit status.
pub async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        // Already reaped or racing with exit
        return child.wait().await;
    };

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!("SIGTERM to pid {} failed: {}", pid, e);
    }

    match timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("pid {} did not exit within {:?}, killing", pid, grace);
            let _ = child.start_kill();
            child.wait().await
        }
    }
}

/// Wait on an optional child handle; pends forever when there is none.
///
/// Lets reactors select over a child that may not be running.
pub async fn wait_child(child: Option<&mut Child>) -> std::io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

/// Spawn a command and wait for it with a bound.
///
/// Returns `Ok(Some(status))` on normal exit, `Ok(None)` when the bound was
/// exceeded and the process was killed.
pub async fn run_bounded(
    command: &mut Command,
    bound: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let mut child = command.spawn()?;
    match timeout(bound, child.wait()).await {
        Ok(status) => Ok(Some(status?)),
        Err(_) => {
            warn!("command did not finish within {:?}, killing", bound);
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_terminate_graceful_exit() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let start = Instant::now();
        let status = terminate(&mut child, Duration::from_secs(5)).await.unwrap();
        // sleep dies on SIGTERM well before the bound
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        // A shell that traps and ignores SIGTERM forces the escalation path
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 30")
            .spawn()
            .unwrap();
        // Give the shell a moment to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let start = Instant::now();
        let status = terminate(&mut child, Duration::from_millis(500))
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(!status.success());
        assert!(elapsed >= Duration::from_millis(500));
        // Bound plus a small scheduling margin
        assert!(elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_bounded_within_bound() {
        let mut cmd = Command::new("true");
        let status = run_bounded(&mut cmd, Duration::from_secs(5))
            .await
            .unwrap()
            .expect("true exits within the bound");
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_run_bounded_kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let result = run_bounded(&mut cmd, Duration::from_millis(200)).await.unwrap();
        assert!(result.is_none());
    }
}
