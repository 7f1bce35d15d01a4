//! Long-lived worker
//!
//! - [`harness`]: JSON-lines job loop over any reader/writer pair
//! - [`signal`]: async-safe SIGINT/SIGTERM/SIGHUP shutdown flag

pub mod harness;
pub mod signal;

pub use harness::{Harness, HarnessStats, JobRunner};
pub use signal::SignalHandler;
