//! Integration tests for the isolated runner
//!
//! Every execution here spawns the real `snipbox` binary as the child.

use snipbox::config::presets::standard_config;
use snipbox::{ErrorKind, Runner};
use std::path::PathBuf;

fn runner() -> Runner {
    Runner::with_program(standard_config(), PathBuf::from(env!("CARGO_BIN_EXE_snipbox")))
        .expect("standard preset is valid")
}

#[test]
fn test_print_arithmetic() {
    let outcome = runner().execute("print(1+2)\n", 5.0);
    assert!(outcome.success, "unexpected failure: {:?}", outcome);
    assert!(outcome.stdout.contains('3'));
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.error_kind, None);
    assert!(!outcome.timed_out);
    assert!(outcome.violations.is_empty());
}

#[test]
fn test_function_definition_and_call() {
    let outcome = runner().execute("def f(n):\n    return n*n\nprint(f(5))\n", 5.0);
    assert!(outcome.success, "unexpected failure: {:?}", outcome);
    assert_eq!(outcome.stdout.trim(), "25");
}

#[test]
fn test_runtime_error_class_is_propagated() {
    let outcome = runner().execute("x = 1/0\n", 5.0);
    assert!(!outcome.success);
    assert_eq!(
        outcome.error_kind,
        Some(ErrorKind::Runtime("ZeroDivisionError".to_string()))
    );
    assert!(outcome.stderr.contains("ZeroDivisionError"));
    assert!(!outcome.timed_out);
}

#[test]
fn test_disallowed_import_is_rejected_without_spawning() {
    let outcome = runner().execute("import socket\n", 5.0);
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Security));
    assert_eq!(outcome.violations.len(), 1);
    assert!(outcome.violations[0].message.contains("socket"));
    assert_eq!(outcome.elapsed_ms, 0.0);
    assert!(outcome.stdout.is_empty());
}

#[test]
fn test_infinite_loop_times_out() {
    let config = standard_config();
    let grace_ms = config.limits.kill_grace_ms as f64;
    let outcome = runner().execute("while True:\n    pass\n", 1.0);
    assert!(!outcome.success);
    assert!(outcome.timed_out);
    assert_eq!(outcome.error_kind, Some(ErrorKind::TimedOut));
    assert!(outcome.elapsed_ms >= 1000.0, "elapsed {}", outcome.elapsed_ms);
    assert!(
        outcome.elapsed_ms < 1000.0 + grace_ms + 1000.0,
        "elapsed {}",
        outcome.elapsed_ms
    );
}

#[test]
fn test_partial_output_survives_timeout() {
    let outcome = runner().execute("print('started')\nwhile True:\n    pass\n", 1.0);
    assert!(outcome.timed_out);
    assert!(outcome.stdout.contains("started"));
}

#[test]
fn test_bulk_randomness_above_ceiling_is_a_security_error() {
    let outcome = runner().execute("import random\nx = random.randbytes(10 ** 7)\n", 5.0);
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Security));
    assert!(!outcome.violations.is_empty());
}

#[test]
fn test_caught_bound_breach_is_still_a_security_error() {
    let runner = runner();
    let outcome = runner.execute(
        "import random\ntry:\n    random.randbytes(10 ** 7)\nexcept:\n    pass\nprint('escaped')\n",
        5.0,
    );
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Security));
    assert_eq!(outcome.violations.len(), 1);
    assert!(!outcome.stdout.contains("escaped"));

    let outcome = runner.execute(
        "import time\ntry:\n    time.sleep(100)\nexcept BaseException:\n    pass\nprint('slept?')\n",
        5.0,
    );
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Security));
    assert!(outcome.stdout.is_empty());
}

#[test]
fn test_memory_exhaustion_does_not_affect_the_next_job() {
    let runner = runner();
    let hungry = "x = 'a' * 100000000\n";
    let outcome = runner.execute(hungry, 5.0);
    assert!(!outcome.success);

    let exhausting = "keep = []\nwhile True:\n    keep.append(list(range(1000000)))\n";
    let outcome = runner.execute(exhausting, 10.0);
    assert!(!outcome.success);

    let outcome = runner.execute("print('still fine')\n", 5.0);
    assert!(outcome.success, "unexpected failure: {:?}", outcome);
    assert_eq!(outcome.stdout.trim(), "still fine");
}

#[test]
fn test_output_is_truncated_at_limit() {
    let mut config = standard_config();
    config.limits.max_output_bytes = 64;
    let runner = Runner::with_program(config, PathBuf::from(env!("CARGO_BIN_EXE_snipbox"))).unwrap();
    let outcome = runner.execute("for i in range(1000):\n    print(i)\n", 5.0);
    assert!(outcome.success, "unexpected failure: {:?}", outcome);
    assert!(outcome.stdout.ends_with("[output truncated]"));
}

#[test]
fn test_system_exit_zero_is_success() {
    let outcome = runner().execute("print('bye')\nraise SystemExit(0)\nprint('unreachable')\n", 5.0);
    assert!(outcome.success, "unexpected failure: {:?}", outcome);
    assert_eq!(outcome.stdout.trim(), "bye");
}
