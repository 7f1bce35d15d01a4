//! Capability allow-list shared by the static validator and the runtime surface.
//!
//! One immutable value drives both enforcement layers: the validator reads
//! the import set and the disallowed call/attribute lists, the runtime
//! surface reads the same import set for its import hook and the allowed
//! builtins for its base namespace. [`AllowList::verify_against`] is the
//! boot-time self-check that the table agrees with what the host interpreter
//! actually provides.

use crate::config::types::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Numeric ceilings enforced by the bounded proxy modules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyCeilings {
    /// Largest `k`/`n` accepted by `random.choices` and `random.sample`
    pub random_max_count: usize,
    /// Largest `n` accepted by `random.randbytes`
    pub random_max_bytes: usize,
    /// Largest `maxsize` accepted by `functools.lru_cache`
    pub lru_cache_max_size: usize,
    /// Longest pattern accepted by the `re` module
    pub regex_max_pattern_len: usize,
    /// Longest subject string accepted by the `re` module
    pub regex_max_subject_len: usize,
    /// Highest `decimal` context precision
    pub decimal_max_precision: u32,
}

/// Names the host interpreter actually provides.
///
/// Produced by [`crate::runtime::host_catalog`]; kept as plain names so the
/// supervising process can verify an allow-list without building an
/// interpreter.
#[derive(Clone, Debug, Default)]
pub struct HostCatalog {
    pub builtins: BTreeSet<String>,
    pub modules: BTreeSet<String>,
}

/// Process-wide capability table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllowList {
    /// Top-level module names permitted for import
    pub allowed_imports: BTreeSet<String>,
    /// Names installed in the base execution namespace
    pub allowed_builtins: BTreeSet<String>,
    /// Callee names rejected by the validator
    pub disallowed_calls: BTreeSet<String>,
    /// Attribute names rejected statically and at run time
    pub disallowed_attributes: BTreeSet<String>,
    pub ceilings: ProxyCeilings,
}

impl AllowList {
    pub fn is_import_allowed(&self, module: &str) -> bool {
        let top = module.split('.').next().unwrap_or(module);
        self.allowed_imports.contains(top)
    }

    pub fn is_builtin_allowed(&self, name: &str) -> bool {
        self.allowed_builtins.contains(name)
    }

    pub fn is_call_disallowed(&self, name: &str) -> bool {
        self.disallowed_calls.contains(name)
    }

    pub fn is_attribute_disallowed(&self, name: &str) -> bool {
        self.disallowed_attributes.contains(name)
    }

    /// Check that this table and the host interpreter agree.
    ///
    /// Every allowed builtin must exist in the host table and must not also be
    /// disallowed; every host builtin must be classified as either allowed or
    /// disallowed; every allowed module must be provided by the host.
    pub fn verify_against(&self, catalog: &HostCatalog) -> Result<()> {
        let mut problems = Vec::new();

        for name in &self.allowed_builtins {
            if !catalog.builtins.contains(name) {
                problems.push(format!("allowed builtin '{}' does not exist in the host table", name));
            }
            if self.disallowed_calls.contains(name) {
                problems.push(format!("builtin '{}' is both allowed and disallowed", name));
            }
        }

        for name in &catalog.builtins {
            if !self.allowed_builtins.contains(name) && !self.disallowed_calls.contains(name) {
                problems.push(format!(
                    "host builtin '{}' is neither allowed nor disallowed",
                    name
                ));
            }
        }

        for module in &self.allowed_imports {
            if module.contains('.') {
                problems.push(format!("allowed import '{}' must be a top-level module name", module));
            } else if !catalog.modules.contains(module) {
                problems.push(format!("allowed import '{}' is not provided by the host", module));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SandboxError::AllowList(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets;

    fn catalog(builtins: &[&str], modules: &[&str]) -> HostCatalog {
        HostCatalog {
            builtins: builtins.iter().map(|s| s.to_string()).collect(),
            modules: modules.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_dotted_import_checks_top_level_name() {
        let allowlist = presets::standard_allowlist();
        assert!(allowlist.is_import_allowed("math"));
        assert!(allowlist.is_import_allowed("math.something"));
        assert!(!allowlist.is_import_allowed("os.path"));
    }

    #[test]
    fn test_standard_preset_matches_host() {
        let allowlist = presets::standard_allowlist();
        allowlist
            .verify_against(&crate::runtime::host_catalog())
            .expect("standard preset must agree with the host catalog");
    }

    #[test]
    fn test_unknown_allowed_builtin_is_rejected() {
        let mut allowlist = presets::standard_allowlist();
        allowlist.allowed_builtins = ["print", "teleport"].iter().map(|s| s.to_string()).collect();
        allowlist.disallowed_calls.clear();
        let err = allowlist
            .verify_against(&catalog(&["print"], &[]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("teleport"), "{err}");
    }

    #[test]
    fn test_overlap_between_allowed_and_disallowed_is_rejected() {
        let mut allowlist = presets::standard_allowlist();
        allowlist.allowed_builtins.insert("eval".to_string());
        let err = allowlist
            .verify_against(&crate::runtime::host_catalog())
            .unwrap_err()
            .to_string();
        assert!(err.contains("both allowed and disallowed"), "{err}");
    }

    #[test]
    fn test_unclassified_host_builtin_is_rejected() {
        let mut allowlist = presets::standard_allowlist();
        allowlist.allowed_builtins.clear();
        allowlist.disallowed_calls.clear();
        allowlist.allowed_imports.clear();
        let err = allowlist
            .verify_against(&catalog(&["print"], &[]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("neither allowed nor disallowed"), "{err}");
    }

    #[test]
    fn test_module_missing_from_host_is_rejected() {
        let mut allowlist = presets::standard_allowlist();
        allowlist.allowed_imports.insert("socket".to_string());
        let err = allowlist
            .verify_against(&crate::runtime::host_catalog())
            .unwrap_err()
            .to_string();
        assert!(err.contains("socket"), "{err}");
    }
}
