//! Display-server session supervision
//!
//! Owns one display-server session per seat: credential and auth-file
//! lifecycle, helper process spawning, the handshake accept loop, and
//! graceful-then-forced termination. One reactor task per session dispatches
//! on inbound channel connections, helper exit, and external stop requests.
//!
//! # Architecture
//!
//! ```text
//! X11DisplayServer
//!   ├─> Session state (seat, vt, display name, auth file, cookie)
//!   ├─> Reactor task (accept loop, exit handler, stop handling)
//!   ├─> seatdm-x11-helper process (spawns the real display server)
//!   └─> SupervisorEvent channel (Started / ProcessExited / Stopped)
//! ```
//!
//! The surrounding daemon consumes [`SupervisorEvent`]s instead of wiring
//! callbacks into the core, and selects a backend through
//! [`backend::create`] at session-creation time.

pub mod backend;
mod x11;

pub use backend::{create, AuthInfo, BackendKind, DisplayServer, SessionType};
pub use x11::X11DisplayServer;

use std::path::PathBuf;
use std::process::ExitStatus;

use crate::xauth::Cookie;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No helper process and no session resources exist
    Idle,

    /// Resources created, helper spawn in progress
    Starting,

    /// Helper running, display identity not yet reported
    AwaitingHandshake,

    /// Display identity negotiated, session underway
    Running,

    /// Graceful termination requested
    Stopping,
}

/// Parameters fixed when a session is created
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Seat hosting the session
    pub seat_name: String,

    /// Virtual terminal the display server is launched on
    pub terminal_id: u32,

    /// Command handed to the helper as the session to run, if any
    pub session_command: Option<String>,

    /// Use a nested display server instead of real hardware
    pub test_mode: bool,
}

/// Per-seat session record, owned by the supervisor.
///
/// `display_name` stays empty until a `Started` handshake is accepted and
/// matches `:<digits>` from then on. All per-run fields are cleared and the
/// auth file deleted when the helper terminates.
#[derive(Debug, Clone)]
pub struct Session {
    /// Seat hosting the session
    pub seat_name: String,

    /// Virtual terminal identifier
    pub terminal_id: u32,

    /// Negotiated display name, empty until Running
    pub display_name: String,

    /// X authority file backing this session
    pub auth_file_path: PathBuf,

    /// Shared secret bound to this display, present while started
    pub cookie: Option<Cookie>,

    /// Unix socket path the helper reports back on
    pub channel_endpoint: PathBuf,

    /// Lifecycle state
    pub state: SessionState,
}

impl Session {
    pub(crate) fn new(seat_name: &str, terminal_id: u32) -> Self {
        Self {
            seat_name: seat_name.to_string(),
            terminal_id,
            display_name: String::new(),
            auth_file_path: PathBuf::new(),
            cookie: None,
            channel_endpoint: PathBuf::new(),
            state: SessionState::Idle,
        }
    }

    pub(crate) fn clear_runtime_fields(&mut self) {
        self.display_name.clear();
        self.auth_file_path = PathBuf::new();
        self.cookie = None;
        self.channel_endpoint = PathBuf::new();
        self.state = SessionState::Idle;
    }
}

/// Notifications emitted by a session supervisor.
///
/// Delivered on the channel handed out at construction; the surrounding
/// daemon decides what restart or multi-seat policy to apply.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// The display server reported readiness under `display_name`
    Started {
        /// Negotiated display name
        display_name: String,
    },

    /// The helper process terminated; status is absent when it could not
    /// be collected
    ProcessExited {
        /// Helper exit status, if collected
        status: Option<ExitStatus>,
    },

    /// Session cleanup finished, state is back to Idle
    Stopped,
}

/// A display name as negotiated over the handshake: `:` followed by digits.
pub(crate) fn is_valid_display_name(name: &str) -> bool {
    match name.strip_prefix(':') {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle_with_empty_display() {
        let session = Session::new("seat0", 7);
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.display_name.is_empty());
        assert!(session.cookie.is_none());
    }

    #[test]
    fn test_clear_runtime_fields_resets_to_idle() {
        let mut session = Session::new("seat0", 7);
        session.state = SessionState::Running;
        session.display_name = ":100".to_string();
        session.auth_file_path = PathBuf::from("/run/seatdm/auth");
        session.cookie = Some(Cookie::generate());

        session.clear_runtime_fields();

        assert_eq!(session.state, SessionState::Idle);
        assert!(session.display_name.is_empty());
        assert!(session.auth_file_path.as_os_str().is_empty());
        assert!(session.cookie.is_none());
        // Construction parameters survive teardown
        assert_eq!(session.seat_name, "seat0");
        assert_eq!(session.terminal_id, 7);
    }

    #[test]
    fn test_display_name_validation() {
        assert!(is_valid_display_name(":0"));
        assert!(is_valid_display_name(":100"));
        assert!(!is_valid_display_name(""));
        assert!(!is_valid_display_name(":"));
        assert!(!is_valid_display_name("100"));
        assert!(!is_valid_display_name(":10a"));
        assert!(!is_valid_display_name("display:1"));
    }
}
