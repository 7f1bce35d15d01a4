//! Per-execution state machine.
//!
//! A job can only reach a child process through [`Execution::validate`]:
//!
//! ```compile_fail
//! use snipbox::exec::lifecycle::Execution;
//! use snipbox::config::presets::standard_config;
//! use std::path::Path;
//!
//! let config = standard_config();
//! let execution = Execution::new("job", "print(1)\n", 1.0);
//! // no spawn() on an unvalidated execution
//! let _ = execution.spawn(Path::new("snipbox"), &config.allowlist, &config.limits);
//! ```
//!
//! A consumed state cannot be reused:
//!
//! ```compile_fail
//! use snipbox::exec::lifecycle::Execution;
//! use snipbox::config::presets::standard_config;
//! use snipbox::validator::Validator;
//! use std::sync::Arc;
//!
//! let config = standard_config();
//! let validator = Validator::new(Arc::new(config.allowlist.clone()));
//! let execution = Execution::new("job", "print(1)\n", 1.0);
//! let _first = execution.validate(&validator, &config.limits);
//! let _second = execution.validate(&validator, &config.limits);
//! ```
//!
//! Outcomes come only from terminal states:
//!
//! ```compile_fail
//! use snipbox::exec::lifecycle::Execution;
//!
//! let outcome = Execution::new("job", "print(1)\n", 1.0).into_outcome();
//! ```

use crate::config::allowlist::AllowList;
use crate::config::types::{ErrorKind, ExecutionOutcome, Limits};
use crate::exec::protocol::ChildRequest;
use crate::exec::supervisor::{self, describe_exit, ChildExit, SpawnedChild, Supervision};
use crate::observability::audit::{self, CorrelationIds};
use crate::validator::Validator;
use std::path::Path;

// ============================================================================
// Type-State Execution Lifecycle
// ============================================================================
//
// Unvalidated -> Validated -> Running -> {Completed | Failed | TimedOut}
// Unvalidated -> Rejected
//
// Each transition consumes the prior state. Only Execution<Validated> can
// spawn a child, and only terminal states yield an ExecutionOutcome.

/// Type-state marker: submission received, nothing checked yet
pub struct Unvalidated;

/// Type-state marker: size, timeout and static checks passed
pub struct Validated;

/// Child process started
pub struct Running {
    child: SpawnedChild,
}

/// Terminal: the child delivered a report
pub struct Completed {
    outcome: ExecutionOutcome,
}

/// Terminal: spawn failure, lost child or missing report
pub struct Failed {
    outcome: ExecutionOutcome,
}

/// Terminal: deadline passed, child killed
pub struct TimedOut {
    outcome: ExecutionOutcome,
}

/// Terminal: never spawned
pub struct Rejected {
    outcome: ExecutionOutcome,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Completed {}
    impl Sealed for super::Failed {}
    impl Sealed for super::TimedOut {}
    impl Sealed for super::Rejected {}
}

/// States that carry a final outcome
pub trait Terminal: sealed::Sealed {
    fn outcome(&self) -> &ExecutionOutcome;
    fn into_outcome(self) -> ExecutionOutcome;
}

macro_rules! terminal {
    ($($state:ident),*) => {
        $(
            impl Terminal for $state {
                fn outcome(&self) -> &ExecutionOutcome {
                    &self.outcome
                }
                fn into_outcome(self) -> ExecutionOutcome {
                    self.outcome
                }
            }
        )*
    };
}

terminal!(Completed, Failed, TimedOut, Rejected);

/// One execution attempt with type-state tracking
pub struct Execution<S> {
    correlation: CorrelationIds,
    source: String,
    timeout_seconds: f64,
    state: S,
}

impl<S> Execution<S> {
    fn advance<T>(self, state: T) -> Execution<T> {
        Execution {
            correlation: self.correlation,
            source: self.source,
            timeout_seconds: self.timeout_seconds,
            state,
        }
    }

    pub fn correlation(&self) -> &CorrelationIds {
        &self.correlation
    }

    pub fn timeout_seconds(&self) -> f64 {
        self.timeout_seconds
    }
}

impl Execution<Unvalidated> {
    pub fn new(job_id: &str, source: impl Into<String>, timeout_seconds: f64) -> Self {
        Self {
            correlation: CorrelationIds::new(job_id),
            source: source.into(),
            timeout_seconds,
            state: Unvalidated,
        }
    }

    /// Size and timeout checks, then the static validator
    pub fn validate(
        self,
        validator: &Validator,
        limits: &Limits,
    ) -> Result<Execution<Validated>, Execution<Rejected>> {
        if let Some(problem) = submission_problem(&self.source, self.timeout_seconds, limits) {
            let outcome = ExecutionOutcome::failed(ErrorKind::Validation, problem);
            return Err(self.advance(Rejected { outcome }));
        }

        let report = validator.check_report(&self.source);
        if report.is_clean() {
            return Ok(self.advance(Validated));
        }

        audit::violation_rejected(&self.correlation, &report.violations);
        let kind = if report.syntax_error {
            ErrorKind::Syntax
        } else {
            ErrorKind::Security
        };
        let outcome = ExecutionOutcome::rejected(kind, report.violations);
        Err(self.advance(Rejected { outcome }))
    }
}

/// Why a submission cannot even be validated
fn submission_problem(source: &str, timeout_seconds: f64, limits: &Limits) -> Option<String> {
    if source.len() > limits.max_source_bytes {
        return Some(format!(
            "source is {} bytes, above the limit of {}",
            source.len(),
            limits.max_source_bytes
        ));
    }
    if !timeout_seconds.is_finite() || timeout_seconds <= 0.0 {
        return Some(format!(
            "timeout_seconds must be a positive number, got {}",
            timeout_seconds
        ));
    }
    if timeout_seconds > limits.max_timeout_seconds {
        return Some(format!(
            "timeout_seconds {} is above the limit of {}",
            timeout_seconds, limits.max_timeout_seconds
        ));
    }
    None
}

impl Execution<Validated> {
    /// Start the child process; the only way into `Running`
    pub fn spawn(
        self,
        program: &Path,
        allowlist: &AllowList,
        limits: &Limits,
    ) -> Result<Execution<Running>, Execution<Failed>> {
        let request = ChildRequest {
            source: self.source.clone(),
            allowlist: allowlist.clone(),
            limits: limits.clone(),
        };
        match supervisor::spawn_child(program, &request, self.timeout_seconds) {
            Ok(child) => {
                let mut execution = self.advance(Running { child });
                execution.correlation.child_pid = Some(execution.state.child.id());
                audit::execution_start(
                    &execution.correlation,
                    execution.source.len(),
                    execution.timeout_seconds,
                );
                Ok(execution)
            }
            Err(err) => {
                log::error!("failed to spawn child: {}", err);
                let outcome = ExecutionOutcome::failed(
                    ErrorKind::Internal,
                    format!("failed to start execution: {}", err),
                );
                Err(self.advance(Failed { outcome }))
            }
        }
    }
}

/// Where a running execution ended up
pub enum Finished {
    Completed(Execution<Completed>),
    Failed(Execution<Failed>),
    TimedOut(Execution<TimedOut>),
}

impl Finished {
    pub fn outcome(&self) -> &ExecutionOutcome {
        match self {
            Finished::Completed(e) => e.outcome(),
            Finished::Failed(e) => e.outcome(),
            Finished::TimedOut(e) => e.outcome(),
        }
    }

    pub fn into_outcome(self) -> ExecutionOutcome {
        match self {
            Finished::Completed(e) => e.into_outcome(),
            Finished::Failed(e) => e.into_outcome(),
            Finished::TimedOut(e) => e.into_outcome(),
        }
    }
}

impl Execution<Running> {
    pub fn child_pid(&self) -> u32 {
        self.state.child.id()
    }

    /// Supervise the child to the end and classify the result
    pub fn wait(self, limits: &Limits) -> Finished {
        let (timeout, grace) = supervisor::timing_for(limits, self.timeout_seconds);
        let Execution {
            correlation,
            source,
            timeout_seconds,
            state,
            ..
        } = self;
        let supervision = state.child.supervise(timeout, grace);
        let parent = Execution {
            correlation,
            source,
            timeout_seconds,
            state: (),
        };
        classify(parent, supervision)
    }
}

fn classify(execution: Execution<()>, supervision: Supervision) -> Finished {
    let Supervision {
        exit,
        elapsed,
        stdout,
        stderr,
        report,
    } = supervision;
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let stdout = stdout.into_text();
    let stderr = stderr.into_text();
    let correlation = &execution.correlation;

    match exit {
        ChildExit::TimedOut(kill) => {
            audit::wall_time_limit_violation(
                correlation,
                elapsed.as_millis() as u64,
                (execution.timeout_seconds * 1000.0) as u64,
            );
            if kill.kill_sent {
                audit::signal_escalation(correlation, "SIGTERM", "SIGKILL", kill.waited_ms);
                audit::forced_kill(correlation, "child ignored SIGTERM past the grace window");
            }
            for note in &kill.notes {
                log::warn!("termination of job '{}': {}", correlation.job_id, note);
            }
            let outcome =
                ExecutionOutcome::timed_out(stdout, stderr, elapsed_ms, execution.timeout_seconds);
            Finished::TimedOut(execution.advance(TimedOut { outcome }))
        }
        ChildExit::Lost(reason) => {
            audit::child_lost(correlation, &reason);
            let outcome = ExecutionOutcome::failed(
                ErrorKind::Internal,
                format!("lost track of the child process: {}", reason),
            )
            .with_output(stdout, stderr)
            .with_elapsed(elapsed_ms);
            Finished::Failed(execution.advance(Failed { outcome }))
        }
        ChildExit::Exited(status) => match report {
            Some(Ok(report)) => {
                if !report.violations.is_empty() {
                    audit::runtime_security_error(correlation, &report.violations);
                }
                let outcome = report.into_outcome(stdout, stderr);
                Finished::Completed(execution.advance(Completed { outcome }))
            }
            problem => {
                let detail = match problem {
                    Some(Err(err)) => format!("unreadable child report ({}); {}", err, describe_exit(&status)),
                    _ => format!("child exited without a report ({})", describe_exit(&status)),
                };
                audit::child_lost(correlation, &detail);
                let outcome = ExecutionOutcome::failed(ErrorKind::Internal, detail)
                    .with_output(stdout, stderr)
                    .with_elapsed(elapsed_ms);
                Finished::Failed(execution.advance(Failed { outcome }))
            }
        },
    }
}

impl<S: Terminal> Execution<S> {
    pub fn outcome(&self) -> &ExecutionOutcome {
        self.state.outcome()
    }

    pub fn into_outcome(self) -> ExecutionOutcome {
        self.state.into_outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::{standard_allowlist, standard_limits};
    use std::sync::Arc;

    fn validator() -> Validator {
        Validator::new(Arc::new(standard_allowlist()))
    }

    fn rejected(source: &str, timeout: f64) -> ExecutionOutcome {
        match Execution::new("t", source, timeout).validate(&validator(), &standard_limits()) {
            Ok(_) => panic!("expected rejection of {:?}", source),
            Err(execution) => execution.into_outcome(),
        }
    }

    #[test]
    fn test_clean_source_validates() {
        let execution = Execution::new("t", "print(1 + 2)\n", 1.0);
        assert!(execution.validate(&validator(), &standard_limits()).is_ok());
    }

    #[test]
    fn test_disallowed_import_is_rejected_without_spawn() {
        let outcome = rejected("import socket\n", 1.0);
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Security));
        assert_eq!(outcome.violations.len(), 1);
        assert!(outcome.violations[0].message.contains("socket"));
        assert_eq!(outcome.elapsed_ms, 0.0);
    }

    #[test]
    fn test_syntax_error_is_rejected_as_syntax() {
        let outcome = rejected("def f(:\n", 1.0);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Syntax));
        assert_eq!(outcome.violations.len(), 1);
    }

    #[test]
    fn test_oversized_source_is_a_validation_error() {
        let limits = standard_limits();
        let source = "#".repeat(limits.max_source_bytes + 1);
        let outcome = rejected(&source, 1.0);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Validation));
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn test_bad_timeouts_are_validation_errors() {
        for timeout in [0.0, -1.0, f64::NAN, f64::INFINITY, 31.0] {
            let outcome = rejected("print(1)\n", timeout);
            assert_eq!(outcome.error_kind, Some(ErrorKind::Validation), "timeout {}", timeout);
        }
    }

    #[test]
    fn test_spawn_failure_is_internal_error() {
        let validated = match Execution::new("t", "print(1)\n", 1.0)
            .validate(&validator(), &standard_limits())
        {
            Ok(validated) => validated,
            Err(_) => panic!("clean source rejected"),
        };
        let failed = match validated.spawn(
            Path::new("/nonexistent/snipbox"),
            &standard_allowlist(),
            &standard_limits(),
        ) {
            Ok(_) => panic!("spawn of a missing program succeeded"),
            Err(failed) => failed,
        };
        assert_eq!(failed.outcome().error_kind, Some(ErrorKind::Internal));
        assert!(!failed.outcome().success);
    }
}
