//! Configuration and policy
//!
//! Allow-list, limits, presets, loading and start-up validation.

pub mod allowlist;
pub mod loader;
pub mod presets;
pub mod types;
pub mod validator;

pub use allowlist::{AllowList, HostCatalog, ProxyCeilings};
pub use loader::CONFIG_ENV_VAR;
pub use types::{
    ErrorKind, ExecutionOutcome, Job, JobOutcome, Limits, Result, SandboxConfig, SandboxError,
    Violation,
};
