//! # seatdm
//!
//! Display-server lifecycle supervisor for a Linux login manager.
//!
//! The crate brings up an X display server for a seat, negotiates an
//! authenticated display identity for it over a private handshake channel,
//! and hands control to a session runner, surviving process crashes,
//! malformed peer frames, and explicit shutdown requests.
//!
//! # Architecture
//!
//! ```text
//! seatdm daemon
//!   └─> supervisor::X11DisplayServer (one per seat)
//!         ├─> xauth (cookie + authority database via the external tool)
//!         ├─> Unix socket listener (handshake channel)
//!         └─> seatdm-x11-helper process
//!               ├─> X server / Xephyr (test mode)
//!               ├─> display setup / teardown scripts
//!               └─> session command (greeter or user shell)
//! ```
//!
//! # Control Flow
//!
//! Supervisor creates credentials, spawns the helper, and waits; the helper
//! spawns the display server and discovers its display number, then reports
//! `Started{display}` over the [`protocol`] channel; the supervisor installs
//! the cookie for the final display name and transitions to Running. An
//! explicit `stop()` and a spontaneous helper exit converge on the same
//! exit-handler cleanup.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Daemon and helper configuration
pub mod config;

/// Helper process internals (display-server spawn and session execution)
pub mod helper;

/// Handshake protocol between supervisor and helper
pub mod protocol;

/// Session supervision and display-server backends
pub mod supervisor;

/// Shared process utilities
pub mod utils;

/// X authority credential management
pub mod xauth;
