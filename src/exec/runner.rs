//! Isolated runner: one snippet, one child process, one outcome.

use crate::config::allowlist::AllowList;
use crate::config::types::{ExecutionOutcome, Result, SandboxConfig, SandboxError};
use crate::exec::lifecycle::Execution;
use crate::observability::audit;
use crate::validator::Validator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Runner {
    config: SandboxConfig,
    allowlist: Arc<AllowList>,
    validator: Validator,
    program: PathBuf,
}

impl Runner {
    /// Runner whose children re-exec the current binary
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| SandboxError::Process(format!("cannot locate own executable: {}", e)))?;
        Self::with_program(config, program)
    }

    /// Runner whose children run `program --internal-role child`
    pub fn with_program(config: SandboxConfig, program: PathBuf) -> Result<Self> {
        if let Err(err) = config.prepare() {
            audit::configuration_violation(&err.to_string());
            return Err(err);
        }
        let allowlist = Arc::new(config.allowlist.clone());
        Ok(Self {
            validator: Validator::new(allowlist.clone()),
            allowlist,
            config,
            program,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn execute(&self, source: &str, timeout_seconds: f64) -> ExecutionOutcome {
        self.execute_job("", source, timeout_seconds)
    }

    /// Run `source`, correlating audit events with `job_id`
    pub fn execute_job(&self, job_id: &str, source: &str, timeout_seconds: f64) -> ExecutionOutcome {
        let limits = &self.config.limits;
        let execution = Execution::new(job_id, source, timeout_seconds);
        let correlation = execution.correlation().clone();

        let outcome = match execution.validate(&self.validator, limits) {
            Err(rejected) => rejected.into_outcome(),
            Ok(validated) => match validated.spawn(&self.program, &self.allowlist, limits) {
                Err(failed) => failed.into_outcome(),
                Ok(running) => running.wait(limits).into_outcome(),
            },
        };

        audit::execution_end(&correlation, &outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::standard_config;
    use crate::config::types::ErrorKind;

    fn runner() -> Runner {
        Runner::with_program(standard_config(), PathBuf::from("/nonexistent/snipbox")).unwrap()
    }

    #[test]
    fn test_rejections_never_reach_the_program() {
        let runner = runner();
        let outcome = runner.execute("import socket\n", 1.0);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Security));
        assert_eq!(outcome.elapsed_ms, 0.0);

        let outcome = runner.execute("print(1)\n", 0.0);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Validation));
    }

    #[test]
    fn test_spawn_failure_is_answered() {
        let outcome = runner().execute_job("job-9", "print(1)\n", 1.0);
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Internal));
        assert!(outcome.error.unwrap().contains("failed to start execution"));
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let mut config = standard_config();
        config.limits.default_timeout_seconds = 100.0;
        assert!(Runner::with_program(config, PathBuf::from("snipbox")).is_err());

        let mut config = standard_config();
        config.allowlist.allowed_builtins.insert("no_such_builtin".to_string());
        assert!(Runner::with_program(config, PathBuf::from("snipbox")).is_err());
    }
}
