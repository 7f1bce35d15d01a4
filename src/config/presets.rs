//! Standard engine preset
//!
//! The preset is what `snipbox config` prints and what the engine runs with
//! when no configuration file is given. Every host builtin is classified
//! here, either as allowed or as a disallowed call, so the preset passes the
//! allow-list self-check unchanged.

use crate::config::allowlist::{AllowList, ProxyCeilings};
use crate::config::types::{Limits, SandboxConfig};
use std::collections::BTreeSet;

const ALLOWED_IMPORTS: &[&str] = &[
    "decimal",
    "functools",
    "json",
    "math",
    "random",
    "re",
    "string",
    "time",
];

const ALLOWED_BUILTINS: &[&str] = &[
    // Functions
    "abs",
    "all",
    "any",
    "bin",
    "bool",
    "bytes",
    "callable",
    "chr",
    "dict",
    "divmod",
    "enumerate",
    "filter",
    "float",
    "format",
    "hasattr",
    "hash",
    "hex",
    "id",
    "int",
    "isinstance",
    "issubclass",
    "iter",
    "len",
    "list",
    "map",
    "max",
    "min",
    "next",
    "object",
    "oct",
    "ord",
    "pow",
    "print",
    "range",
    "repr",
    "reversed",
    "round",
    "set",
    "sorted",
    "str",
    "sum",
    "super",
    "tuple",
    "type",
    "zip",
    // Exception classes
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "BaseException",
    "Exception",
    "ImportError",
    "IndexError",
    "KeyError",
    "LookupError",
    "MemoryError",
    "ModuleNotFoundError",
    "NameError",
    "NotImplementedError",
    "OverflowError",
    "RecursionError",
    "RuntimeError",
    "SecurityError",
    "StopIteration",
    "SystemExit",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

const DISALLOWED_CALLS: &[&str] = &[
    "__import__",
    "breakpoint",
    "compile",
    "delattr",
    "eval",
    "exec",
    "exit",
    "getattr",
    "globals",
    "input",
    "locals",
    "open",
    "quit",
    "setattr",
    "vars",
];

const DISALLOWED_ATTRIBUTES: &[&str] = &[
    "__base__",
    "__bases__",
    "__builtins__",
    "__class__",
    "__closure__",
    "__code__",
    "__dict__",
    "__func__",
    "__getattribute__",
    "__globals__",
    "__mro__",
    "__self__",
    "__subclasses__",
];

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|name| name.to_string()).collect()
}

pub fn standard_ceilings() -> ProxyCeilings {
    ProxyCeilings {
        random_max_count: 10_000,
        random_max_bytes: 65_536,
        lru_cache_max_size: 1024,
        regex_max_pattern_len: 1000,
        regex_max_subject_len: 100_000,
        decimal_max_precision: 28,
    }
}

pub fn standard_allowlist() -> AllowList {
    AllowList {
        allowed_imports: names(ALLOWED_IMPORTS),
        allowed_builtins: names(ALLOWED_BUILTINS),
        disallowed_calls: names(DISALLOWED_CALLS),
        disallowed_attributes: names(DISALLOWED_ATTRIBUTES),
        ceilings: standard_ceilings(),
    }
}

pub fn standard_limits() -> Limits {
    Limits {
        default_timeout_seconds: 5.0,
        max_timeout_seconds: 30.0,
        max_source_bytes: 65_536,
        max_output_bytes: 1024 * 1024,
        memory_limit_bytes: 256 * 1024 * 1024,
        max_recursion_depth: 200,
        max_sequence_len: 10_000_000,
        kill_grace_ms: 200,
    }
}

pub fn standard_config() -> SandboxConfig {
    SandboxConfig {
        allowlist: standard_allowlist(),
        limits: standard_limits(),
        audit_log: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_lists_are_disjoint() {
        let allowlist = standard_allowlist();
        assert!(allowlist
            .allowed_builtins
            .is_disjoint(&allowlist.disallowed_calls));
    }

    #[test]
    fn test_dangerous_builtins_are_not_allowed() {
        let allowlist = standard_allowlist();
        for name in ["eval", "exec", "compile", "open", "__import__", "getattr"] {
            assert!(!allowlist.is_builtin_allowed(name), "{name} must not be allowed");
            assert!(allowlist.is_call_disallowed(name));
        }
    }

    #[test]
    fn test_preset_round_trips_through_json() {
        let config = standard_config();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: SandboxConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.allowlist, config.allowlist);
        assert_eq!(back.limits, config.limits);
    }

    #[test]
    fn test_standard_limits() {
        let limits = standard_limits();
        assert_eq!(limits.default_timeout_seconds, 5.0);
        assert!(limits.default_timeout_seconds <= limits.max_timeout_seconds);
        assert_eq!(limits.kill_grace_ms, 200);
    }
}
