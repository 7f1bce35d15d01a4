//! Parent/child wire format.
//!
//! The parent writes one [`ChildRequest`] as JSON to the child's stdin and
//! closes it; the child answers with one [`ChildReport`] on its status fd.
//! Snippet output never travels over these channels.

use crate::config::allowlist::AllowList;
use crate::config::types::{
    ErrorKind, ExecutionOutcome, Limits, Result, SandboxError, Violation,
};
use nix::fcntl::{fcntl, FcntlArg};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::FromRawFd;
use std::os::unix::io::RawFd;

/// Fd the child role expects its status pipe on
pub const STATUS_FD: RawFd = 3;

/// Everything the child needs to build its surface and run one snippet
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChildRequest {
    pub source: String,
    pub allowlist: AllowList,
    pub limits: Limits,
}

/// Result of one evaluation as seen from inside the child
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildReport {
    pub success: bool,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub elapsed_ms: f64,
    #[serde(default)]
    pub violations: Vec<Violation>,
}

impl ChildReport {
    pub fn succeeded(elapsed_ms: f64) -> Self {
        Self {
            success: true,
            elapsed_ms,
            ..Self::default()
        }
    }

    /// A run that tripped at least one runtime bound, however it ended
    pub fn breached(violations: Vec<Violation>, elapsed_ms: f64) -> Self {
        let message = violations
            .first()
            .map(|v| v.message.clone())
            .unwrap_or_else(|| ErrorKind::Security.as_str().to_string());
        Self::failed(ErrorKind::Security, message, elapsed_ms).with_violations(violations)
    }

    pub fn failed(kind: ErrorKind, error: impl Into<String>, elapsed_ms: f64) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_kind: Some(kind),
            elapsed_ms,
            violations: Vec::new(),
        }
    }

    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }

    /// Merge with the output the parent captured
    ///
    /// A report with violations is never a success.
    pub fn into_outcome(self, stdout: String, stderr: String) -> ExecutionOutcome {
        if self.success && !self.violations.is_empty() {
            return Self::breached(self.violations, self.elapsed_ms).into_outcome(stdout, stderr);
        }
        let outcome = match (self.success, self.error_kind) {
            (true, _) => ExecutionOutcome::completed(stdout, stderr, self.elapsed_ms),
            (false, Some(kind)) => ExecutionOutcome::failed(
                kind.clone(),
                self.error.unwrap_or_else(|| kind.as_str().to_string()),
            )
            .with_output(stdout, stderr)
            .with_elapsed(self.elapsed_ms),
            (false, None) => ExecutionOutcome::failed(
                ErrorKind::Internal,
                "child reported a failure without an error kind",
            )
            .with_output(stdout, stderr)
            .with_elapsed(self.elapsed_ms),
        };
        outcome.with_violations(self.violations)
    }
}

pub fn read_json<T: DeserializeOwned, R: Read>(mut reader: R) -> Result<T> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    serde_json::from_slice(&data)
        .map_err(|e| SandboxError::Protocol(format!("failed to decode message: {}", e)))
}

pub fn write_json<T: Serialize, W: Write>(mut writer: W, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| SandboxError::Protocol(format!("failed to encode message: {}", e)))?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Take ownership of an inherited fd, failing if it was never opened
pub fn adopt_fd(fd: RawFd) -> Result<File> {
    fcntl(fd, FcntlArg::F_GETFD)
        .map_err(|e| SandboxError::Protocol(format!("fd {} is not open: {}", fd, e)))?;
    // SAFETY: the fd is open and nothing else in this process owns it
    Ok(unsafe { File::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::{standard_allowlist, standard_limits};

    #[test]
    fn test_request_survives_the_pipe() {
        let request = ChildRequest {
            source: "print('hi')\n".to_string(),
            allowlist: standard_allowlist(),
            limits: standard_limits(),
        };
        let mut wire = Vec::new();
        write_json(&mut wire, &request).unwrap();
        let back: ChildRequest = read_json(wire.as_slice()).unwrap();
        assert_eq!(back.source, request.source);
        assert_eq!(back.allowlist, request.allowlist);
        assert_eq!(back.limits, request.limits);
    }

    #[test]
    fn test_truncated_report_is_a_protocol_error() {
        let err = read_json::<ChildReport, _>(&b"{\"success\": tr"[..]).unwrap_err();
        assert!(matches!(err, SandboxError::Protocol(_)));
    }

    #[test]
    fn test_failed_report_keeps_runtime_class() {
        let report = ChildReport::failed(
            ErrorKind::Runtime("ZeroDivisionError".to_string()),
            "division by zero",
            2.5,
        );
        let outcome = report.into_outcome(String::new(), "Traceback...".to_string());
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("division by zero"));
        assert_eq!(outcome.error_kind.unwrap().as_str(), "ZeroDivisionError");
        assert_eq!(outcome.stderr, "Traceback...");
        assert_eq!(outcome.elapsed_ms, 2.5);
    }

    #[test]
    fn test_violations_turn_success_into_security_error() {
        let caught = vec![Violation::new(2, 4, "time.sleep() is not allowed")];
        let report = ChildReport {
            violations: caught.clone(),
            ..ChildReport::succeeded(1.0)
        };
        let outcome = report.into_outcome("ok\n".into(), String::new());
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::Security));
        assert_eq!(outcome.error.as_deref(), Some("time.sleep() is not allowed"));
        assert_eq!(outcome.stdout, "ok\n");
        assert_eq!(outcome.violations, caught);
    }

    #[test]
    fn test_failure_without_kind_becomes_internal() {
        let report = ChildReport {
            success: false,
            ..ChildReport::default()
        };
        let outcome = report.into_outcome(String::new(), String::new());
        assert_eq!(outcome.error_kind, Some(ErrorKind::Internal));
    }

    #[test]
    fn test_adopt_fd_rejects_closed_descriptor() {
        assert!(adopt_fd(987_654).is_err());
    }
}
