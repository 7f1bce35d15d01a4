/// Security event logging for snipbox
/// Structured record of every execution attempt and every capability breach,
/// correlated by job id and a per-run id.
///
/// Events are always mirrored to the `log` facade; when an audit file is
/// configured they are also appended to it as JSON lines.
use crate::config::types::{ExecutionOutcome, Result, SandboxError, Violation};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use uuid::Uuid;

/// Security event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Types of security events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    // Lifecycle events
    ExecutionStart,
    ExecutionEnd,

    // Capability events
    ViolationRejected,
    RuntimeSecurityError,

    // Limit and termination events
    WallTimeLimitViolation,
    SignalEscalation,
    ForcedKill,
    ChildLost,

    // Harness events
    ConfigurationViolation,
    MalformedJob,
}

impl SecurityEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::ExecutionStart => SecuritySeverity::Low,
            SecurityEventType::ExecutionEnd => SecuritySeverity::Low,

            SecurityEventType::ViolationRejected => SecuritySeverity::Medium,
            SecurityEventType::RuntimeSecurityError => SecuritySeverity::High,

            SecurityEventType::WallTimeLimitViolation => SecuritySeverity::Medium,
            SecurityEventType::SignalEscalation => SecuritySeverity::Medium,
            SecurityEventType::ForcedKill => SecuritySeverity::High,
            SecurityEventType::ChildLost => SecuritySeverity::Critical,

            SecurityEventType::ConfigurationViolation => SecuritySeverity::Critical,
            SecurityEventType::MalformedJob => SecuritySeverity::Low,
        }
    }
}

/// Correlation identifiers for event tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    /// Job identifier supplied by the caller (empty for one-shot runs)
    pub job_id: String,
    /// Unique identifier of this execution attempt
    pub run_id: String,
    /// Child process id once spawned
    pub child_pid: Option<u32>,
}

impl CorrelationIds {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            run_id: Uuid::new_v4().to_string(),
            child_pid: None,
        }
    }

    /// Set child PID after spawn
    pub fn with_child_pid(mut self, pid: u32) -> Self {
        self.child_pid = Some(pid);
        self
    }
}

/// Individual security event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

impl SecurityEvent {
    /// Create a new security event with default severity
    pub fn new(event_type: SecurityEventType, details: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details: details.into(),
            correlation: None,
            violations: Vec::new(),
        }
    }

    pub fn with_correlation(mut self, correlation: &CorrelationIds) -> Self {
        self.correlation = Some(correlation.clone());
        self
    }

    pub fn with_violations(mut self, violations: &[Violation]) -> Self {
        self.violations = violations.to_vec();
        self
    }

    pub fn with_severity(mut self, severity: SecuritySeverity) -> Self {
        self.severity = severity;
        self
    }

    fn mirror_to_log(&self) {
        let job = self
            .correlation
            .as_ref()
            .map(|c| c.job_id.as_str())
            .unwrap_or("-");
        match self.severity {
            SecuritySeverity::Critical | SecuritySeverity::High => {
                error!("SECURITY {:?} [{}]: {}", self.event_type, job, self.details)
            }
            SecuritySeverity::Medium => {
                warn!("SECURITY {:?} [{}]: {}", self.event_type, job, self.details)
            }
            SecuritySeverity::Low => {
                info!("SECURITY {:?} [{}]: {}", self.event_type, job, self.details)
            }
        }
    }
}

/// Append-only JSON-lines audit trail
pub struct SecurityLogger {
    audit_file: Mutex<File>,
    audit_path: PathBuf,
}

impl SecurityLogger {
    pub fn new(audit_path: &Path) -> Result<Self> {
        if let Some(parent) = audit_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SandboxError::Config(format!("Failed to create audit log directory: {}", e))
                })?;
            }
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(audit_path)
            .map_err(|e| SandboxError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Mutex::new(audit_file),
            audit_path: audit_path.to_path_buf(),
        })
    }

    /// Mirror `event` to the log facade and append it to the audit file
    pub fn log_security_event(&self, event: &SecurityEvent) {
        event.mirror_to_log();

        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode audit event: {}", e);
                return;
            }
        };
        match self.audit_file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write to audit log: {}", e);
                }
            }
            Err(_) => error!("Failed to acquire lock on audit log"),
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

static SECURITY_LOGGER: OnceLock<SecurityLogger> = OnceLock::new();

/// Install the process-wide audit file
pub fn init_security_logger(audit_path: &Path) -> Result<()> {
    let logger = SecurityLogger::new(audit_path)?;
    if SECURITY_LOGGER.set(logger).is_err() {
        warn!("Security logger already initialized");
    } else {
        info!("Security audit log at {}", audit_path.display());
    }
    Ok(())
}

/// Log a security event using the global logger, or only the log facade
/// when no audit file was configured
pub fn log_security_event(event: SecurityEvent) {
    match SECURITY_LOGGER.get() {
        Some(logger) => logger.log_security_event(&event),
        None => event.mirror_to_log(),
    }
}

pub fn execution_start(correlation: &CorrelationIds, source_bytes: usize, timeout_seconds: f64) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::ExecutionStart,
            format!(
                "Execution started: run_id={}, source_bytes={}, timeout={}s",
                correlation.run_id, source_bytes, timeout_seconds
            ),
        )
        .with_correlation(correlation),
    );
}

pub fn execution_end(correlation: &CorrelationIds, outcome: &ExecutionOutcome) {
    let status = match &outcome.error_kind {
        Some(kind) => kind.as_str().to_string(),
        None => "success".to_string(),
    };
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::ExecutionEnd,
            format!(
                "Execution finished: status={}, elapsed_ms={:.1}",
                status, outcome.elapsed_ms
            ),
        )
        .with_correlation(correlation),
    );
}

pub fn violation_rejected(correlation: &CorrelationIds, violations: &[Violation]) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::ViolationRejected,
            format!("Submission rejected with {} violation(s)", violations.len()),
        )
        .with_correlation(correlation)
        .with_violations(violations),
    );
}

pub fn runtime_security_error(correlation: &CorrelationIds, violations: &[Violation]) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::RuntimeSecurityError,
            format!("Run-time capability breach trapped ({} event(s))", violations.len()),
        )
        .with_correlation(correlation)
        .with_violations(violations),
    );
}

pub fn wall_time_limit_violation(correlation: &CorrelationIds, used_ms: u64, limit_ms: u64) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::WallTimeLimitViolation,
            format!("Wall time limit exceeded: {}ms > {}ms", used_ms, limit_ms),
        )
        .with_correlation(correlation),
    );
}

pub fn signal_escalation(correlation: &CorrelationIds, from_signal: &str, to_signal: &str, waited_ms: u64) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::SignalEscalation,
            format!(
                "Signal escalation: {} -> {} after {}ms grace",
                from_signal, to_signal, waited_ms
            ),
        )
        .with_correlation(correlation),
    );
}

pub fn forced_kill(correlation: &CorrelationIds, reason: &str) {
    log_security_event(
        SecurityEvent::new(SecurityEventType::ForcedKill, format!("Forced kill: {}", reason))
            .with_correlation(correlation),
    );
}

pub fn child_lost(correlation: &CorrelationIds, details: &str) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::ChildLost,
            format!("Child result lost: {}", details),
        )
        .with_correlation(correlation),
    );
}

pub fn configuration_violation(details: &str) {
    log_security_event(SecurityEvent::new(
        SecurityEventType::ConfigurationViolation,
        details,
    ));
}

pub fn malformed_job(job_id: &str, reason: &str) {
    log_security_event(
        SecurityEvent::new(
            SecurityEventType::MalformedJob,
            format!("Malformed job line: {}", reason),
        )
        .with_correlation(&CorrelationIds::new(job_id)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_creation() {
        let correlation = CorrelationIds::new("job-7");
        assert_eq!(correlation.job_id, "job-7");
        assert!(correlation.child_pid.is_none());
        assert!(Uuid::parse_str(&correlation.run_id).is_ok());
        assert_ne!(correlation.run_id, CorrelationIds::new("job-7").run_id);
    }

    #[test]
    fn test_correlation_ids_with_pid() {
        let correlation = CorrelationIds::new("job-7").with_child_pid(1234);
        assert_eq!(correlation.child_pid, Some(1234));
    }

    #[test]
    fn test_event_type_severity() {
        assert_eq!(
            SecurityEventType::ExecutionStart.default_severity(),
            SecuritySeverity::Low
        );
        assert_eq!(
            SecurityEventType::ChildLost.default_severity(),
            SecuritySeverity::Critical
        );
        assert_eq!(
            SecurityEventType::RuntimeSecurityError.default_severity(),
            SecuritySeverity::High
        );
    }

    #[test]
    fn test_security_logger_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("events.log");
        let logger = SecurityLogger::new(&path).unwrap();
        assert_eq!(logger.audit_path(), path.as_path());

        let correlation = CorrelationIds::new("job-1");
        let violations = vec![Violation::new(1, 0, "Import of module 'socket' is not allowed")];
        logger.log_security_event(
            &SecurityEvent::new(SecurityEventType::ViolationRejected, "rejected")
                .with_correlation(&correlation)
                .with_violations(&violations),
        );
        logger.log_security_event(&SecurityEvent::new(SecurityEventType::ExecutionEnd, "done"));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "ViolationRejected");
        assert_eq!(first["severity"], "Medium");
        assert_eq!(first["correlation"]["job_id"], "job-1");
        assert_eq!(first["violations"][0]["line"], 1);

        let second: SecurityEvent = serde_json::from_str(lines[1]).unwrap();
        assert!(second.violations.is_empty());
        assert!(second.correlation.is_none());
    }
}
