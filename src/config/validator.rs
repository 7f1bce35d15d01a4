// Config validation
// Start-up validation of limits and ceilings; every error is fatal.

use crate::config::allowlist::ProxyCeilings;
use crate::config::types::{Limits, Result, SandboxConfig, SandboxError};

/// Largest precision the decimal engine can represent
pub const DECIMAL_PRECISION_LIMIT: u32 = 28;

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate config at startup.
///
/// Returns `Err` when any error was found; warnings are returned for the
/// caller to log.
pub fn validate_config(config: &SandboxConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_limits(&config.limits, &mut result);
    validate_ceilings(&config.allowlist.ceilings, &mut result);
    validate_lists(config, &mut result);

    if !result.is_valid() {
        let error_msg = format!("Config validation failed:\n{}", result.errors.join("\n"));
        return Err(SandboxError::Config(error_msg));
    }

    Ok(result)
}

fn validate_limits(limits: &Limits, result: &mut ValidationResult) {
    for (name, value) in [
        ("default_timeout_seconds", limits.default_timeout_seconds),
        ("max_timeout_seconds", limits.max_timeout_seconds),
    ] {
        if !value.is_finite() || value <= 0.0 {
            result.add_error(format!("{} must be a positive number, got {}", name, value));
        }
    }

    if limits.default_timeout_seconds > limits.max_timeout_seconds {
        result.add_error(format!(
            "default_timeout_seconds ({}) must be <= max_timeout_seconds ({})",
            limits.default_timeout_seconds, limits.max_timeout_seconds
        ));
    }

    for (name, value) in [
        ("max_source_bytes", limits.max_source_bytes),
        ("max_output_bytes", limits.max_output_bytes),
        ("max_recursion_depth", limits.max_recursion_depth),
        ("max_sequence_len", limits.max_sequence_len),
    ] {
        if value == 0 {
            result.add_error(format!("{} cannot be zero", name));
        }
    }

    if limits.memory_limit_bytes == 0 {
        result.add_error("memory_limit_bytes cannot be zero".to_string());
    } else if limits.memory_limit_bytes < 64 * 1024 * 1024 {
        result.add_warning(format!(
            "memory_limit_bytes {} is very low (< 64MB), the child may fail to start",
            limits.memory_limit_bytes
        ));
    }

    if limits.max_recursion_depth > 2000 {
        result.add_warning(format!(
            "max_recursion_depth {} is high, deep snippets may exhaust the child stack",
            limits.max_recursion_depth
        ));
    }

    if limits.kill_grace_ms > 5000 {
        result.add_warning(format!(
            "kill_grace_ms {} delays timeout outcomes by more than 5s",
            limits.kill_grace_ms
        ));
    }
}

fn validate_ceilings(ceilings: &ProxyCeilings, result: &mut ValidationResult) {
    for (name, value) in [
        ("random_max_count", ceilings.random_max_count),
        ("random_max_bytes", ceilings.random_max_bytes),
        ("lru_cache_max_size", ceilings.lru_cache_max_size),
        ("regex_max_pattern_len", ceilings.regex_max_pattern_len),
        ("regex_max_subject_len", ceilings.regex_max_subject_len),
    ] {
        if value == 0 {
            result.add_error(format!("ceilings.{} cannot be zero", name));
        }
    }

    if ceilings.decimal_max_precision == 0 {
        result.add_error("ceilings.decimal_max_precision cannot be zero".to_string());
    }
    if ceilings.decimal_max_precision > DECIMAL_PRECISION_LIMIT {
        result.add_error(format!(
            "ceilings.decimal_max_precision ({}) exceeds the decimal engine limit of {}",
            ceilings.decimal_max_precision, DECIMAL_PRECISION_LIMIT
        ));
    }
}

fn validate_lists(config: &SandboxConfig, result: &mut ValidationResult) {
    let allowlist = &config.allowlist;

    if !allowlist.allowed_builtins.contains("print") {
        result.add_warning("'print' is not allowed, snippets cannot produce output".to_string());
    }

    for name in &allowlist.disallowed_attributes {
        if !name.starts_with("__") {
            result.add_warning(format!(
                "disallowed attribute '{}' is not a dunder name, ordinary code may trip it",
                name
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::standard_config;

    #[test]
    fn test_valid_standard_config() {
        let result = validate_config(&standard_config()).unwrap();
        assert!(result.is_valid());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_default_timeout_above_max() {
        let mut config = standard_config();
        config.limits.default_timeout_seconds = 60.0;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("default_timeout_seconds"));
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let mut config = standard_config();
        config.allowlist.ceilings.random_max_count = 0;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("random_max_count cannot be zero"));
    }

    #[test]
    fn test_decimal_precision_above_engine_limit() {
        let mut config = standard_config();
        config.allowlist.ceilings.decimal_max_precision = 50;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("decimal engine limit"));
    }

    #[test]
    fn test_nan_timeout_rejected() {
        let mut config = standard_config();
        config.limits.max_timeout_seconds = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_low_memory_is_only_a_warning() {
        let mut config = standard_config();
        config.limits.memory_limit_bytes = 16 * 1024 * 1024;
        let result = validate_config(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("memory_limit_bytes")));
    }
}
