//! X authority credential management
//!
//! Generates the per-display shared secret and installs/revokes it in the X
//! authority database. The database format is never parsed in-process; all
//! entry manipulation goes through the external `xauth` tool driven over a
//! piped stdin, the same way a shell user would.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use zeroize::Zeroize;

/// Bound on a single xauth tool invocation.
const XAUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Result type for credential operations
pub type Result<T> = std::result::Result<T, XauthError>;

/// Credential manager error types
#[derive(Error, Debug)]
pub enum XauthError {
    /// The xauth tool could not be launched
    #[error("failed to launch xauth tool: {0}")]
    Launch(std::io::Error),

    /// The xauth tool exited with a non-zero status
    #[error("xauth tool failed with status {0:?}")]
    ToolFailed(Option<i32>),

    /// The xauth tool did not exit within the bound
    #[error("xauth tool did not exit within {XAUTH_TIMEOUT:?}")]
    Timeout,

    /// Auth file or pipe I/O error
    #[error("auth file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A per-display shared secret: 128 bits as 32 lowercase hex characters.
///
/// Generated from the OS CSPRNG so it is unpredictable to other local
/// users. The backing string is zeroized when the cookie is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Cookie(String);

impl Cookie {
    /// Generate a fresh cookie. Cannot fail.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let cookie = Cookie(hex::encode(bytes));
        bytes.zeroize();
        cookie
    }

    /// Hex representation, as written into the authority database
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Drop for Cookie {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never leak the secret into logs
        f.write_str("Cookie(..)")
    }
}

/// Install `cookie` for `display_name` into the authority file.
///
/// Ensures the file exists, then drives the tool with three ordered
/// commands: remove any existing entry for the display, add the new one,
/// exit. A failure here leaves the display's access control degraded but is
/// not fatal to the session; callers decide whether to abort.
pub async fn install(
    xauth_tool: &Path,
    auth_file: &Path,
    display_name: &str,
    cookie: &Cookie,
) -> Result<()> {
    debug!("Adding cookie to {} for {}", auth_file.display(), display_name);

    // Touch the file so xauth has something to lock
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(auth_file)?;

    let mut child = Command::new(xauth_tool)
        .arg("-f")
        .arg(auth_file)
        .arg("-q")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(XauthError::Launch)?;

    let commands = format!(
        "remove {display}\nadd {display} . {cookie}\nexit\n",
        display = display_name,
        cookie = cookie.as_str(),
    );

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(commands.as_bytes()).await?;
        // Drop closes the pipe so the tool sees EOF after `exit`
    }

    let status = tokio::time::timeout(XAUTH_TIMEOUT, child.wait())
        .await
        .map_err(|_| XauthError::Timeout)??;

    if status.success() {
        Ok(())
    } else {
        Err(XauthError::ToolFailed(status.code()))
    }
}

/// Delete the authority file. Idempotent; a missing file is not an error.
pub fn revoke(auth_file: &Path) -> Result<()> {
    match std::fs::remove_file(auth_file) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Change ownership of `path` to the service account, best-effort.
///
/// A session with the wrong auth-file owner is still usable by the owning
/// process, so failures are logged and ignored.
pub fn change_owner(path: &Path, service_user: &str) {
    match nix::unistd::User::from_name(service_user) {
        Ok(Some(user)) => {
            if let Err(e) = nix::unistd::chown(path, Some(user.uid), Some(user.gid)) {
                warn!("Failed to change owner of {}: {}", path.display(), e);
            }
        }
        Ok(None) => {
            warn!(
                "Service user {} not found, owner of {} left unchanged",
                service_user,
                path.display()
            );
        }
        Err(e) => {
            warn!("Failed to look up service user {}: {}", service_user, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_cookie_length_and_alphabet() {
        let cookie = Cookie::generate();
        assert_eq!(cookie.as_str().len(), 32);
        assert!(cookie
            .as_str()
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }

    #[test]
    fn test_cookies_are_distinct() {
        let a = Cookie::generate();
        let b = Cookie::generate();
        assert_ne!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_cookie_debug_is_redacted() {
        let cookie = Cookie::generate();
        let dbg = format!("{:?}", cookie);
        assert!(!dbg.contains(cookie.as_str()));
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth");
        std::fs::write(&path, b"x").unwrap();

        revoke(&path).unwrap();
        assert!(!path.exists());
        // Second revoke of the now-missing file is still Ok
        revoke(&path).unwrap();
    }

    /// Stub tool that records its stdin, standing in for xauth.
    fn write_stub_tool(dir: &Path, capture: &Path) -> std::path::PathBuf {
        let tool = dir.join("fake-xauth");
        std::fs::write(
            &tool,
            format!("#!/bin/sh\ncat > {}\nexit 0\n", capture.display()),
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        tool
    }

    #[tokio::test]
    async fn test_install_emits_remove_add_exit() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("commands");
        let tool = write_stub_tool(dir.path(), &capture);
        let auth_file = dir.path().join("auth");
        let cookie = Cookie::generate();

        install(&tool, &auth_file, ":100", &cookie).await.unwrap();

        assert!(auth_file.exists());
        let commands = std::fs::read_to_string(&capture).unwrap();
        let lines: Vec<&str> = commands.lines().collect();
        assert_eq!(lines[0], "remove :100");
        assert_eq!(lines[1], format!("add :100 . {}", cookie.as_str()));
        assert_eq!(lines[2], "exit");
    }

    #[tokio::test]
    async fn test_install_reports_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("failing-xauth");
        std::fs::write(&tool, "#!/bin/sh\ncat > /dev/null\nexit 3\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let auth_file = dir.path().join("auth");
        let cookie = Cookie::generate();

        match install(&tool, &auth_file, ":0", &cookie).await {
            Err(XauthError::ToolFailed(Some(3))) => {}
            other => panic!("expected ToolFailed(3), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_install_reports_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let auth_file = dir.path().join("auth");
        let cookie = Cookie::generate();

        assert!(matches!(
            install(Path::new("/nonexistent/xauth"), &auth_file, ":0", &cookie).await,
            Err(XauthError::Launch(_))
        ));
    }
}
