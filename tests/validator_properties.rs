//! Property-based tests for the static validator using proptest.
//!
//! Invariants that must hold for any submission:
//! - Checking is idempotent
//! - Violations come out in source order
//! - An arbitrary input never panics the parser

use proptest::prelude::*;
use snipbox::config::presets::standard_allowlist;
use snipbox::validator::Validator;
use std::sync::Arc;

fn validator() -> Validator {
    Validator::new(Arc::new(standard_allowlist()))
}

/// Statement fragments, some clean and some not
const FRAGMENTS: &[&str] = &[
    "x = 1",
    "print(x + 2)",
    "import math",
    "import socket",
    "from os import path",
    "eval('1')",
    "y = [i * i for i in range(10)]",
    "z = y.__class__",
    "open('f')",
    "import random",
    "s = 'import os'",
    "t = getattr(x, 'real')",
    "def f(a):\n    return __import__(a)",
    "pass",
];

fn snippet() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(FRAGMENTS), 0..12)
        .prop_map(|lines| lines.join("\n") + "\n")
}

proptest! {
    #[test]
    fn test_check_is_idempotent(source in snippet()) {
        let validator = validator();
        let first = validator.check(&source);
        let second = validator.check(&source);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_violations_are_in_source_order(source in snippet()) {
        let violations = validator().check(&source);
        for pair in violations.windows(2) {
            prop_assert!((pair[0].line, pair[0].column) <= (pair[1].line, pair[1].column));
        }
    }

    #[test]
    fn test_arbitrary_text_never_panics(source in ".{0,200}") {
        let validator = validator();
        let report = validator.check_report(&source);
        prop_assert_eq!(report.violations.clone(), validator.check(&source));
        if report.syntax_error {
            prop_assert_eq!(report.violations.len(), 1);
        }
    }

    #[test]
    fn test_clean_fragments_produce_no_violations(
        lines in prop::collection::vec(
            prop::sample::select(vec!["x = 1", "print(x + 2)", "import math", "pass"]),
            1..8,
        )
    ) {
        let source = lines.join("\n") + "\n";
        prop_assert!(validator().check(&source).is_empty());
    }
}
