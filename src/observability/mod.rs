//! Observability
//!
//! Structured security audit events, mirrored to the process log.

pub mod audit;
