//! Display-server spawn, readiness detection, and session supervision
//!
//! Turns a [`HelperInvocation`] into a running, authenticated display plus a
//! launched session, and cleans up on exit. Any abort before the handshake
//! is reported kills the spawned display server so the supervisor observes
//! a plain process exit instead of a half-started session.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::protocol::{self, HelperMessage};
use crate::utils::process::{run_bounded, terminate, wait_child};

/// Well-known directory of X display sockets.
pub const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

/// Lowest display number considered in test mode.
const TEST_DISPLAY_BASE: u32 = 100;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(2500);
const DISPLAY_READ_TIMEOUT: Duration = Duration::from_secs(1);
const CURSOR_TIMEOUT: Duration = Duration::from_secs(1);
const DISPLAY_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const SESSION_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Arguments fixed at helper invocation, all mandatory except the session
/// command and test-mode flag.
#[derive(Debug, Clone)]
pub struct HelperInvocation {
    /// Seat the display server runs on
    pub seat_name: String,

    /// Virtual terminal identifier
    pub terminal_id: u32,

    /// X authority file the server is pointed at
    pub auth_file_path: PathBuf,

    /// Session command to launch once the display is up
    pub session_command: Option<String>,

    /// Spawn a nested display server instead of real hardware
    pub test_mode: bool,
}

/// Connect the handshake channel back to the daemon, bounded.
pub async fn connect(endpoint: &Path) -> Result<UnixStream> {
    tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(endpoint))
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Timed out connecting to the daemon at {}",
                endpoint.display()
            )
        })?
        .with_context(|| format!("Failed to connect to the daemon at {}", endpoint.display()))
}

/// Helper-side session runner.
pub struct Runner {
    config: Arc<Config>,
    invocation: HelperInvocation,
    channel: UnixStream,
    display_name: String,
    server: Option<Child>,
    session: Option<Child>,
}

impl Runner {
    /// Create a runner over an established handshake channel.
    pub fn new(config: Arc<Config>, invocation: HelperInvocation, channel: UnixStream) -> Self {
        Self {
            config,
            invocation,
            channel,
            display_name: String::new(),
            server: None,
            session: None,
        }
    }

    /// Negotiated display name, empty until the server is up
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Bring the display up and launch the session.
    ///
    /// Spawns the display server, discovers its display name, reports
    /// `Started` to the daemon, runs the display setup script, and starts
    /// the session command. On any failure the spawned server is killed and
    /// the error is returned for the caller to turn into a failure exit.
    pub async fn start(&mut self) -> Result<()> {
        let spawned = if self.invocation.test_mode {
            self.spawn_nested_server()
        } else {
            self.spawn_server()
        };
        if let Err(e) = spawned {
            self.kill_server().await;
            return Err(e);
        }

        // Report the display back to the daemon
        let started = HelperMessage::Started {
            display_name: self.display_name.clone(),
        };
        if let Err(e) = protocol::write_message(&mut self.channel, &started).await {
            self.kill_server().await;
            return Err(e).context("Failed to report the display to the daemon");
        }

        self.setup_display().await;

        if let Some(command) = self.invocation.session_command.clone() {
            self.spawn_session(&command)?;
        }

        Ok(())
    }

    /// Test mode: lowest free display number at or above the base, nested
    /// server bound to it. The display name is known immediately.
    fn spawn_nested_server(&mut self) -> Result<()> {
        let number = allocate_test_display(Path::new(X11_SOCKET_DIR));
        self.display_name = format!(":{}", number);

        let mut cmd = Command::new(&self.config.x11.xephyr_path);
        cmd.arg(&self.display_name)
            .args(["-ac", "-br", "-noreset", "-screen", "800x600"])
            .kill_on_drop(true);

        debug!(
            "Running: {} {}",
            self.config.x11.xephyr_path.display(),
            self.display_name
        );
        let child = cmd.spawn().with_context(|| {
            format!(
                "Failed to start nested X server {}",
                self.config.x11.xephyr_path.display()
            )
        })?;
        self.server = Some(child);
        Ok(())
    }

    /// Normal mode: real server with a pipe to report its display number.
    fn spawn_server(&mut self) -> Result<()> {
        let (read_fd, write_fd) =
            nix::unistd::pipe().context("Failed to create display number pipe")?;

        let mut cmd = Command::new(&self.config.x11.server_path);
        for arg in self.config.x11.server_arguments.split_whitespace() {
            cmd.arg(arg);
        }
        cmd.arg("-auth")
            .arg(&self.invocation.auth_file_path)
            .args(["-background", "none", "-noreset", "-keeptty"])
            .arg("-displayfd")
            .arg(write_fd.as_raw_fd().to_string())
            .arg("-seat")
            .arg(&self.invocation.seat_name);
        if self.invocation.seat_name == "seat0" {
            cmd.arg(format!("vt{}", self.invocation.terminal_id));
        }
        cmd.env("XCURSOR_THEME", &self.config.theme.cursor_theme)
            .env("XORG_RUN_AS_USER_OK", "1")
            .kill_on_drop(true);

        debug!("Running: {}", self.config.x11.server_path.display());
        let child = cmd.spawn().with_context(|| {
            format!(
                "Failed to start X server {}",
                self.config.x11.server_path.display()
            )
        })?;
        self.server = Some(child);

        // Close our copy of the write end, otherwise the read below can
        // outlive a dead server
        drop(write_fd);

        let number = read_display_number(&read_fd, DISPLAY_READ_TIMEOUT)?;
        self.display_name = format!(":{}", number);
        info!("X server reported display {}", self.display_name);
        Ok(())
    }

    /// Cursor default plus the display setup script, both bounded.
    async fn setup_display(&mut self) {
        let mut cursor = Command::new("xsetroot");
        cursor
            .args(["-cursor_name", "left_ptr"])
            .env_clear()
            .envs(self.session_env())
            .kill_on_drop(true);
        match run_bounded(&mut cursor, CURSOR_TIMEOUT).await {
            Ok(Some(status)) if status.success() => {}
            Ok(_) => warn!("Could not set default cursor"),
            Err(e) => warn!("Could not set default cursor: {}", e),
        }

        let script = self.config.x11.display_command.clone();
        self.run_script(&script, self.session_env(), DISPLAY_SCRIPT_TIMEOUT, "display setup")
            .await;
    }

    fn spawn_session(&mut self, command: &str) -> Result<()> {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("Session command is empty");
        };

        info!("Starting session: {}", command);
        let mut cmd = Command::new(program);
        cmd.args(parts)
            .env_clear()
            .envs(self.session_env())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start session {}", command))?;
        self.session = Some(child);
        Ok(())
    }

    /// Supervise the running display and session until one of them ends or
    /// a termination request arrives.
    pub async fn supervise(&mut self) -> Result<()> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        loop {
            tokio::select! {
                status = wait_child(self.session.as_mut()) => {
                    let status = status.context("Failed to wait for the session")?;
                    info!("Session exited with status {:?}", status.code());
                    self.session = None;
                    self.run_stop_script().await;
                    self.stop_server().await;
                    return Ok(());
                }
                status = wait_child(self.server.as_mut()) => {
                    self.server = None;
                    self.terminate_session().await;
                    self.run_stop_script().await;
                    bail!(
                        "Display server exited unexpectedly with status {:?}",
                        status.ok().and_then(|s| s.code())
                    );
                }
                _ = sigterm.recv() => {
                    info!("Received termination request");
                    self.shutdown().await;
                    return Ok(());
                }
                _ = sigint.recv() => {
                    info!("Interrupted");
                    self.shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    /// Orderly teardown: session first, stop script, then the server.
    pub async fn shutdown(&mut self) {
        self.terminate_session().await;
        self.run_stop_script().await;
        self.stop_server().await;
    }

    /// Abort path: release whatever was spawned, no scripts.
    pub async fn stop(&mut self) {
        self.terminate_session().await;
        self.kill_server().await;
    }

    async fn terminate_session(&mut self) {
        if let Some(mut child) = self.session.take() {
            if let Err(e) = terminate(&mut child, SESSION_STOP_TIMEOUT).await {
                warn!("Failed to stop the session: {}", e);
            }
        }
    }

    async fn stop_server(&mut self) {
        if let Some(mut child) = self.server.take() {
            if let Err(e) = terminate(&mut child, SERVER_STOP_TIMEOUT).await {
                warn!("Failed to stop the display server: {}", e);
            }
        }
    }

    async fn kill_server(&mut self) {
        if let Some(mut child) = self.server.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    async fn run_stop_script(&self) {
        // Nothing to tear down before a display existed
        if self.display_name.is_empty() {
            return;
        }
        let script = self.config.x11.display_stop_command.clone();
        self.run_script(&script, self.teardown_env(), STOP_SCRIPT_TIMEOUT, "display stop")
            .await;
    }

    async fn run_script(
        &self,
        script: &str,
        env: Vec<(String, String)>,
        bound: Duration,
        label: &str,
    ) {
        let mut parts = script.split_whitespace();
        let Some(program) = parts.next() else {
            debug!("No {} script configured", label);
            return;
        };

        info!("Running {} script: {}", label, script);
        let mut cmd = Command::new(program);
        cmd.args(parts).env_clear().envs(env).kill_on_drop(true);

        match run_bounded(&mut cmd, bound).await {
            Ok(Some(status)) if status.success() => {}
            Ok(Some(status)) => {
                warn!("{} script exited with status {:?}", label, status.code())
            }
            Ok(None) => warn!("{} script did not finish within {:?}", label, bound),
            Err(e) => warn!("Failed to run {} script: {}", label, e),
        }
    }

    /// Environment for the setup script, cursor command, and session.
    fn session_env(&self) -> Vec<(String, String)> {
        vec![
            ("DISPLAY".to_string(), self.display_name.clone()),
            ("HOME".to_string(), "/".to_string()),
            ("PATH".to_string(), self.config.users.default_path.clone()),
            (
                "XAUTHORITY".to_string(),
                self.invocation.auth_file_path.display().to_string(),
            ),
            ("SHELL".to_string(), "/bin/sh".to_string()),
            (
                "XCURSOR_THEME".to_string(),
                self.config.theme.cursor_theme.clone(),
            ),
        ]
    }

    /// Environment for the teardown script: no credential, no cursor theme.
    fn teardown_env(&self) -> Vec<(String, String)> {
        vec![
            ("DISPLAY".to_string(), self.display_name.clone()),
            ("HOME".to_string(), "/".to_string()),
            ("PATH".to_string(), self.config.users.default_path.clone()),
            ("SHELL".to_string(), "/bin/sh".to_string()),
        ]
    }
}

/// Smallest display number >= the base with no `X<number>` socket present.
pub(crate) fn allocate_test_display(socket_dir: &Path) -> u32 {
    let mut number = TEST_DISPLAY_BASE;
    while socket_dir.join(format!("X{}", number)).exists() {
        number += 1;
    }
    number
}

/// Read the display number line from the server's report pipe, bounded.
///
/// Fewer than 2 bytes means the server produced no usable number and the
/// startup attempt is aborted.
fn read_display_number(fd: &OwnedFd, bound: Duration) -> Result<String> {
    let deadline = Instant::now() + bound;
    let mut line: Vec<u8> = Vec::new();
    let mut buf = [0u8; 64];

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let millis = (deadline - now).as_millis().min(u128::from(u16::MAX)) as u16;

        let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) => break,
            Ok(_) => {
                let n = nix::unistd::read(fd.as_raw_fd(), &mut buf)
                    .context("Failed to read the display number pipe")?;
                if n == 0 {
                    break;
                }
                line.extend_from_slice(&buf[..n]);
                if line.contains(&b'\n') {
                    break;
                }
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e).context("Failed to poll the display number pipe"),
        }
    }

    if line.len() < 2 {
        bail!(
            "Display server reported no display number ({} bytes read)",
            line.len()
        );
    }

    let text = std::str::from_utf8(&line).context("Display number is not valid text")?;
    let number = text.trim_end();
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        bail!("Display server reported a malformed display number {:?}", text);
    }
    Ok(number.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_test_display_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(allocate_test_display(dir.path()), 100);
    }

    #[test]
    fn test_allocate_test_display_skips_taken_sockets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("X100"), b"").unwrap();
        std::fs::write(dir.path().join("X101"), b"").unwrap();
        // A hole below the base does not matter
        std::fs::write(dir.path().join("X1"), b"").unwrap();
        assert_eq!(allocate_test_display(dir.path()), 102);
    }

    #[test]
    fn test_read_display_number_reads_line() {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        nix::unistd::write(&write_fd, b"7\n").unwrap();
        drop(write_fd);

        let number = read_display_number(&read_fd, Duration::from_secs(1)).unwrap();
        assert_eq!(number, "7");
    }

    #[test]
    fn test_read_display_number_trims_trailing_whitespace() {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        nix::unistd::write(&write_fd, b"104\n").unwrap();
        drop(write_fd);

        let number = read_display_number(&read_fd, Duration::from_secs(1)).unwrap();
        assert_eq!(number, "104");
    }

    #[test]
    fn test_read_display_number_rejects_empty_report() {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        drop(write_fd);

        assert!(read_display_number(&read_fd, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_read_display_number_times_out() {
        let (read_fd, _write_fd) = nix::unistd::pipe().unwrap();

        let start = Instant::now();
        let result = read_display_number(&read_fd, Duration::from_millis(100));
        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_read_display_number_rejects_garbage() {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        nix::unistd::write(&write_fd, b"abc\n").unwrap();
        drop(write_fd);

        assert!(read_display_number(&read_fd, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_session_env_contract() {
        let (channel, _peer) = UnixStream::pair().unwrap();
        let config = Arc::new(Config::default_config());
        let invocation = HelperInvocation {
            seat_name: "seat0".to_string(),
            terminal_id: 7,
            auth_file_path: PathBuf::from("/run/seatdm/auth"),
            session_command: None,
            test_mode: false,
        };
        let mut runner = Runner::new(config, invocation, channel);
        runner.display_name = ":100".to_string();

        let env = runner.session_env();
        let keys: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["DISPLAY", "HOME", "PATH", "XAUTHORITY", "SHELL", "XCURSOR_THEME"]
        );
        assert!(env.contains(&("DISPLAY".to_string(), ":100".to_string())));
        assert!(env.contains(&("HOME".to_string(), "/".to_string())));
        assert!(env.contains(&("SHELL".to_string(), "/bin/sh".to_string())));

        // Teardown drops the credential and cursor variables
        let teardown_env = runner.teardown_env();
        let teardown_keys: Vec<&str> = teardown_env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(teardown_keys, ["DISPLAY", "HOME", "PATH", "SHELL"]);
    }
}
