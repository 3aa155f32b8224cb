//! Display-server backend selection
//!
//! Capability interface over the per-seat display server so the surrounding
//! daemon stays independent of the concrete backend. Backends are tagged
//! variants selected at session-creation time; each carries only the state
//! it needs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Session, SessionRequest, SupervisorEvent, X11DisplayServer};
use crate::config::Config;

/// Session type a backend provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    /// X11 display server
    X11,
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionType::X11 => f.write_str("x11"),
        }
    }
}

/// Available backend implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Spawn an X server through the seatdm-x11-helper process
    X11,
}

/// Authentication material a backend exposes to collaborators such as the
/// session launcher.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    /// Negotiated display name, empty until the session is Running
    pub display_name: String,

    /// X authority file for the display
    pub auth_file_path: PathBuf,
}

/// Capabilities every display-server backend offers the daemon.
#[async_trait]
pub trait DisplayServer: Send {
    /// Session type this backend provides
    fn session_type(&self) -> SessionType;

    /// Snapshot of the session record
    fn session(&self) -> Session;

    /// Display identity and credential file for collaborators
    fn auth_info(&self) -> AuthInfo;

    /// Bring the display server up for the seat
    async fn start(&mut self) -> Result<()>;

    /// Tear the display server down and wait for cleanup
    async fn stop(&mut self) -> Result<()>;
}

#[async_trait]
impl DisplayServer for X11DisplayServer {
    fn session_type(&self) -> SessionType {
        SessionType::X11
    }

    fn session(&self) -> Session {
        X11DisplayServer::session(self)
    }

    fn auth_info(&self) -> AuthInfo {
        let session = X11DisplayServer::session(self);
        AuthInfo {
            display_name: session.display_name,
            auth_file_path: session.auth_file_path,
        }
    }

    async fn start(&mut self) -> Result<()> {
        X11DisplayServer::start(self).await
    }

    async fn stop(&mut self) -> Result<()> {
        X11DisplayServer::stop(self).await
    }
}

/// Create the display-server backend for a session, along with the event
/// channel it reports on.
pub fn create(
    kind: BackendKind,
    config: Arc<Config>,
    request: SessionRequest,
) -> (
    Box<dyn DisplayServer>,
    mpsc::UnboundedReceiver<SupervisorEvent>,
) {
    match kind {
        BackendKind::X11 => {
            let (server, events) = X11DisplayServer::new(config, request);
            (Box::new(server), events)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::SessionState;

    #[test]
    fn test_create_x11_backend_is_idle() {
        let config = Arc::new(Config::default_config());
        let request = SessionRequest {
            seat_name: "seat0".to_string(),
            terminal_id: 1,
            session_command: None,
            test_mode: true,
        };

        let (server, _events) = create(BackendKind::X11, config, request);

        assert_eq!(server.session_type(), SessionType::X11);
        assert_eq!(server.session().state, SessionState::Idle);
        assert!(server.auth_info().display_name.is_empty());
    }

    #[test]
    fn test_session_type_display() {
        assert_eq!(SessionType::X11.to_string(), "x11");
    }
}
