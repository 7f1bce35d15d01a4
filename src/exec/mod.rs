//! Execution control
//!
//! Runs validated snippets in separate child processes with a typestate
//! enforced lifecycle.
//!
//! - [`runner`]: `Runner::execute`, the public entry point
//! - [`lifecycle`]: `Execution<S>` state machine
//! - [`supervisor`]: spawn, poll, SIGTERM/SIGKILL escalation, reap
//! - [`child`]: the child role that evaluates inside the new process
//! - [`protocol`], [`output`]: status pipe messages and bounded output capture

pub mod child;
pub mod lifecycle;
pub mod output;
pub mod protocol;
pub mod runner;
pub mod supervisor;

pub use runner::Runner;
