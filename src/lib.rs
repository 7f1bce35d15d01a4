//! snipbox: sandboxed execution of short untrusted snippets
//!
//! A submission passes three independent layers before its output is
//! returned: a static check of the source, a restricted runtime surface, and
//! a separate child process with hard wall-clock and memory bounds.
//!
//! # Architecture
//!
//! ## Language ([`lang`])
//! - [`lang::lexer`], [`lang::parser`]: source text to syntax tree
//! - [`lang::visit`]: read-only tree walking
//!
//! ## Static Validation ([`validator`])
//! - Disallowed imports, calls and attribute access, reported with positions
//!
//! ## Restricted Runtime ([`runtime`])
//! - [`runtime::interp`]: tree-walking evaluator with recursion and size bounds
//! - [`runtime::surface`]: allow-list driven namespace, import hook, attribute guard
//! - [`runtime::proxy`]: bounded adapters over a few host modules
//!
//! ## Execution Control ([`exec`])
//! - [`exec::runner`]: `Runner::execute`, one snippet in, one outcome out
//! - [`exec::lifecycle`]: type-state enforced execution lifecycle
//! - [`exec::supervisor`]: child spawn, rlimits, deadline, SIGTERM/SIGKILL escalation
//!
//! ## Worker ([`worker`])
//! - [`worker::harness`]: JSON-lines job loop
//! - [`worker::signal`]: shutdown on SIGINT/SIGTERM/SIGHUP
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: structured security audit events
//!
//! ## Configuration ([`config`])
//! - [`config::allowlist`]: allow-list, host catalog and proxy ceilings
//! - [`config::presets`]: the standard preset
//! - [`config::validator`]: start-up validation of limits and ceilings
//!
//! # Design Principles
//!
//! 1. **Layers are independent** - each one stops a disallowed snippet on its own
//! 2. **The host never runs snippet code** - evaluation happens in a child process
//! 3. **Types prevent errors** - an unvalidated snippet cannot be spawned
//! 4. **Every submission gets an outcome** - failures are data, not panics

// Snippet language front end
pub mod lang;

// Static Validation
pub mod validator;

// Restricted Runtime
pub mod runtime;

// Execution Control
pub mod exec;

// Worker
pub mod worker;

// Observability
pub mod observability;

// Configuration & Policy
pub mod config;

// CLI entrypoint wiring for the snipbox binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use exec::Runner;
