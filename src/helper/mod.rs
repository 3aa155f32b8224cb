//! X11 helper process internals
//!
//! The helper is spawned by the supervisor as a separate process, isolated
//! from the daemon's address space. It owns the display-server lifecycle on
//! its side: spawning the server (real or nested test-mode stand-in),
//! discovering the assigned display number, reporting it back over the
//! handshake channel, driving the display setup/teardown scripts, and
//! running the session command.

pub mod runner;

pub use runner::{connect, HelperInvocation, Runner};
