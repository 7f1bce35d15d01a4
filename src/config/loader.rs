//! Configuration loading
//!
//! A configuration is read once at start-up, validated, and checked against
//! the host catalog before any component is constructed from it.

use crate::config::presets;
use crate::config::types::{Result, SandboxConfig, SandboxError};
use crate::config::validator::validate_config;
use std::path::Path;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "SNIPBOX_CONFIG";

impl SandboxConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: SandboxConfig = serde_json::from_str(&config_content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.prepare()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to the standard preset
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let config = presets::standard_config();
                config.prepare()?;
                Ok(config)
            }
        }
    }

    /// Validate ranges and run the allow-list self-check
    pub fn prepare(&self) -> Result<()> {
        let result = validate_config(self)?;
        for warning in &result.warnings {
            log::warn!("config: {}", warning);
        }
        self.allowlist
            .verify_against(&crate::runtime::host_catalog())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_preset_file() {
        let json = serde_json::to_string(&presets::standard_config()).unwrap();
        let file = write_config(&json);
        let config = SandboxConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.limits, presets::standard_limits());
    }

    #[test]
    fn test_missing_field_fails() {
        let mut value = serde_json::to_value(presets::standard_config()).unwrap();
        value["limits"]
            .as_object_mut()
            .unwrap()
            .remove("max_source_bytes");
        let file = write_config(&value.to_string());
        let err = SandboxConfig::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_source_bytes"), "{err}");
    }

    #[test]
    fn test_unknown_field_fails() {
        let mut value = serde_json::to_value(presets::standard_config()).unwrap();
        value["allowlist"]["ceilings"]["gpu_limit"] = serde_json::json!(1);
        let file = write_config(&value.to_string());
        assert!(SandboxConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = SandboxConfig::load_from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
    }

    #[test]
    fn test_self_check_failure_is_fatal() {
        let mut config = presets::standard_config();
        config.allowlist.allowed_builtins.insert("open".to_string());
        let file = write_config(&serde_json::to_string(&config).unwrap());
        let err = SandboxConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, SandboxError::AllowList(_)));
    }

    #[test]
    fn test_no_path_uses_preset() {
        let config = SandboxConfig::load(None).unwrap();
        assert!(config.allowlist.is_import_allowed("math"));
    }
}
