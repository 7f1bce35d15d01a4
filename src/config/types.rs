//! Core types shared by the validator, runner and worker harness
use crate::config::allowlist::AllowList;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One detected policy breach, located by line/column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// 1-based source line
    pub line: u32,
    /// 0-based character offset within the line
    pub column: u32,
    pub message: String,
}

impl Violation {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line: line.max(1),
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Error classification attached to every failed outcome.
///
/// The engine's own kinds are a closed set; errors raised by the submitted
/// code are carried through verbatim as `Runtime(<class name>)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Submission rejected before validation (too large, bad timeout, malformed job)
    Validation,
    /// Static or run-time capability violation
    Security,
    /// Source does not parse
    Syntax,
    /// Wall-clock budget exceeded
    TimedOut,
    /// Engine failure (lost child result, spawn failure)
    Internal,
    /// Error class raised by the submitted code, e.g. `ZeroDivisionError`
    Runtime(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Security => "SecurityError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::Internal => "InternalError",
            ErrorKind::Runtime(name) => name.as_str(),
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "ValidationError" => ErrorKind::Validation,
            "SecurityError" => ErrorKind::Security,
            "SyntaxError" => ErrorKind::Syntax,
            "TimedOut" => ErrorKind::TimedOut,
            "InternalError" => ErrorKind::Internal,
            other => ErrorKind::Runtime(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ErrorKind::from_name(&name))
    }
}

/// Structured result returned for every job, successful or not.
///
/// Built only through the constructors below so that `success` and
/// `error_kind` can never disagree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub elapsed_ms: f64,
    pub timed_out: bool,
    pub violations: Vec<Violation>,
}

impl ExecutionOutcome {
    pub fn completed(stdout: String, stderr: String, elapsed_ms: f64) -> Self {
        Self {
            success: true,
            stdout,
            stderr,
            error: None,
            error_kind: None,
            elapsed_ms: elapsed_ms.max(0.0),
            timed_out: false,
            violations: Vec::new(),
        }
    }

    pub fn failed(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error.into()),
            error_kind: Some(kind),
            elapsed_ms: 0.0,
            timed_out: false,
            violations: Vec::new(),
        }
    }

    pub fn rejected(kind: ErrorKind, violations: Vec<Violation>) -> Self {
        let error = match violations.first() {
            Some(first) if violations.len() == 1 => first.message.clone(),
            Some(first) => format!("{} (and {} more)", first.message, violations.len() - 1),
            None => kind.as_str().to_string(),
        };
        Self {
            violations,
            ..Self::failed(kind, error)
        }
    }

    pub fn timed_out(stdout: String, stderr: String, elapsed_ms: f64, timeout_seconds: f64) -> Self {
        Self {
            stdout,
            stderr,
            elapsed_ms: elapsed_ms.max(0.0),
            timed_out: true,
            ..Self::failed(
                ErrorKind::TimedOut,
                format!("execution exceeded the {}s time limit", timeout_seconds),
            )
        }
    }

    pub fn with_output(mut self, stdout: String, stderr: String) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn with_elapsed(mut self, elapsed_ms: f64) -> Self {
        self.elapsed_ms = elapsed_ms.max(0.0);
        self
    }

    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }
}

/// Job description accepted by the worker harness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

/// Outcome emitted by the worker harness, one per job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub id: String,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
}

/// Engine-wide numeric limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Timeout applied when a job does not carry one
    pub default_timeout_seconds: f64,
    /// Largest timeout a job may request
    pub max_timeout_seconds: f64,
    /// Ceiling on the UTF-8 byte length of a submission
    pub max_source_bytes: usize,
    /// Per-stream ceiling on captured stdout/stderr
    pub max_output_bytes: usize,
    /// Address-space limit applied to the child process
    pub memory_limit_bytes: u64,
    /// Interpreter call depth before RecursionError
    pub max_recursion_depth: usize,
    /// Longest string/list the interpreter will materialize
    pub max_sequence_len: usize,
    /// Grace window between SIGTERM and SIGKILL on timeout
    pub kill_grace_ms: u64,
}

/// Complete engine configuration, read once at start-up.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    pub allowlist: AllowList,
    pub limits: Limits,
    /// Optional JSON-lines security audit file
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
}

/// Custom error types for snipbox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Allow-list error: {0}")]
    AllowList(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_as_plain_string() {
        let json = serde_json::to_string(&ErrorKind::Security).unwrap();
        assert_eq!(json, "\"SecurityError\"");
        let runtime: ErrorKind = serde_json::from_str("\"ZeroDivisionError\"").unwrap();
        assert_eq!(runtime, ErrorKind::Runtime("ZeroDivisionError".to_string()));
        let timed: ErrorKind = serde_json::from_str("\"TimedOut\"").unwrap();
        assert_eq!(timed, ErrorKind::TimedOut);
    }

    #[test]
    fn test_timed_out_outcome_holds_invariant() {
        let outcome = ExecutionOutcome::timed_out("partial".into(), String::new(), 1003.0, 1.0);
        assert!(outcome.timed_out);
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::TimedOut));
        assert_eq!(outcome.stdout, "partial");
    }

    #[test]
    fn test_completed_outcome_has_no_error() {
        let outcome = ExecutionOutcome::completed("3\n".into(), String::new(), 1.5);
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert!(outcome.error_kind.is_none());
    }

    #[test]
    fn test_job_outcome_flattens_fields_next_to_id() {
        let outcome = JobOutcome {
            id: "job-1".to_string(),
            outcome: ExecutionOutcome::rejected(
                ErrorKind::Security,
                vec![Violation::new(1, 0, "Import of module 'socket' is not allowed")],
            ),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["id"], "job-1");
        assert_eq!(value["error_kind"], "SecurityError");
        assert_eq!(value["violations"][0]["line"], 1);
        assert_eq!(value["timed_out"], false);

        let back: JobOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_job_timeout_is_optional() {
        let job: Job = serde_json::from_str(r#"{"id":"a","source":"print(1)"}"#).unwrap();
        assert!(job.timeout_seconds.is_none());
    }
}
