//! End-to-end tests for the `snipbox` binary
//!
//! The worker is driven over stdin/stdout exactly as an upstream queue
//! consumer would.

use snipbox::{ErrorKind, JobOutcome, SandboxConfig};
use std::io::Write;
use std::process::{Command, Output, Stdio};

fn snipbox() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_snipbox"));
    command.env_remove("SNIPBOX_CONFIG").env_remove("RUST_LOG");
    command
}

fn run_with_input(args: &[&str], input: &str) -> Output {
    let mut child = snipbox()
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn snipbox");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn outcomes(output: &Output) -> Vec<JobOutcome> {
    String::from_utf8(output.stdout.clone())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).expect("outcome line is JSON"))
        .collect()
}

#[test]
fn test_worker_answers_every_job_in_order() {
    let input = "\
{\"id\": \"ok\", \"source\": \"print(1+2)\\n\", \"timeout_seconds\": 5.0}
{\"id\": \"bad-import\", \"source\": \"import socket\\n\"}
not a job

{\"id\": \"zero\", \"source\": \"x = 1/0\\n\", \"timeout_seconds\": 5.0}
{\"id\": \"after\", \"source\": \"print('next')\\n\"}
";
    let output = run_with_input(&["worker"], input);
    assert!(output.status.success(), "worker failed: {:?}", output);

    let outcomes = outcomes(&output);
    let ids: Vec<&str> = outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["ok", "bad-import", "", "zero", "after"]);

    assert!(outcomes[0].outcome.success);
    assert_eq!(outcomes[0].outcome.stdout.trim(), "3");
    assert_eq!(outcomes[1].outcome.error_kind, Some(ErrorKind::Security));
    assert_eq!(outcomes[1].outcome.elapsed_ms, 0.0);
    assert_eq!(outcomes[2].outcome.error_kind, Some(ErrorKind::Validation));
    assert_eq!(
        outcomes[3].outcome.error_kind,
        Some(ErrorKind::Runtime("ZeroDivisionError".to_string()))
    );
    assert!(outcomes[4].outcome.success);
    assert_eq!(outcomes[4].outcome.stdout.trim(), "next");
}

#[test]
fn test_worker_outcome_lines_carry_every_field() {
    let output = run_with_input(&["worker"], "{\"id\": \"j\", \"source\": \"print(1)\"}\n");
    let line = String::from_utf8(output.stdout).unwrap();
    let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    for field in [
        "id",
        "success",
        "stdout",
        "stderr",
        "error",
        "error_kind",
        "elapsed_ms",
        "timed_out",
        "violations",
    ] {
        assert!(value.get(field).is_some(), "missing {}", field);
    }
    assert!(value["error"].is_null());
    assert!(value["error_kind"].is_null());
}

#[test]
fn test_worker_stops_on_sigterm_while_idle() {
    let mut child = snipbox()
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(500));
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(child.id() as i32),
        nix::sys::signal::Signal::SIGTERM,
    )
    .unwrap();
    let status = child.wait().unwrap();
    assert!(status.success(), "worker exited with {:?}", status);
}

#[test]
fn test_worker_finishes_in_flight_job_on_sigterm() {
    let mut child = snipbox()
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let busy = "import time\nstart = time.monotonic()\nwhile time.monotonic() - start < 1.0:\n    pass\nprint('done')\n";
    let job = serde_json::json!({"id": "busy", "source": busy, "timeout_seconds": 5.0});
    writeln!(stdin, "{}", job).unwrap();
    stdin.flush().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(300));
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(child.id() as i32),
        nix::sys::signal::Signal::SIGTERM,
    )
    .unwrap();

    let output = child.wait_with_output().unwrap();
    drop(stdin);
    assert!(output.status.success(), "worker exited with {:?}", output.status);
    let outcomes = outcomes(&output);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].id, "busy");
    assert!(outcomes[0].outcome.success, "{:?}", outcomes[0].outcome);
    assert_eq!(outcomes[0].outcome.stdout, "done\n");
}

#[test]
fn test_exec_prints_one_outcome() {
    let output = snipbox()
        .args(["exec", "--code", "def f(n):\n    return n*n\nprint(f(5))\n"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let outcome: snipbox::ExecutionOutcome = serde_json::from_slice(&output.stdout).unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.stdout.trim(), "25");
}

#[test]
fn test_exec_reads_source_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snippet.py");
    std::fs::write(&path, "import math\nprint(math.sqrt(16))\n").unwrap();
    let output = snipbox()
        .args(["exec", "--file"])
        .arg(&path)
        .output()
        .unwrap();
    let outcome: snipbox::ExecutionOutcome = serde_json::from_slice(&output.stdout).unwrap();
    assert!(outcome.success, "unexpected failure: {:?}", outcome);
    assert_eq!(outcome.stdout.trim(), "4.0");
}

#[test]
fn test_check_exit_codes() {
    let clean = snipbox().args(["check", "--code", "print(1)\n"]).output().unwrap();
    assert_eq!(clean.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&clean.stdout).trim(), "[]");

    let dirty = snipbox()
        .args(["check", "--code", "import os\neval('1')\n"])
        .output()
        .unwrap();
    assert_eq!(dirty.status.code(), Some(3));
    let violations: Vec<serde_json::Value> = serde_json::from_slice(&dirty.stdout).unwrap();
    assert_eq!(violations.len(), 2);
    assert_eq!(violations[0]["line"], 1);
    assert_eq!(violations[1]["line"], 2);
}

#[test]
fn test_config_prints_a_loadable_preset() {
    let output = snipbox().arg("config").output().unwrap();
    assert!(output.status.success());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snipbox.json");
    std::fs::write(&path, &output.stdout).unwrap();
    let loaded = SandboxConfig::load_from_file(&path).unwrap();
    let preset = snipbox::config::presets::standard_config();
    assert_eq!(loaded.allowlist, preset.allowlist);
    assert_eq!(loaded.limits, preset.limits);
    assert_eq!(loaded.audit_log, None);
}

#[test]
fn test_bad_config_is_a_startup_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{\"allowlist\": {}}").unwrap();
    let output = snipbox()
        .args(["exec", "--code", "print(1)"])
        .env("SNIPBOX_CONFIG", &path)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());

    let output = snipbox()
        .args(["--config", "/nonexistent/snipbox.json", "worker"])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
}
