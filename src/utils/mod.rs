//! Utility functions
//!
//! Small helpers shared by the supervisor and the helper runner.

pub mod process;

pub use process::{run_bounded, terminate, wait_child};
