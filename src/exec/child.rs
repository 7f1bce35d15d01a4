//! Child role: evaluate one snippet inside a freshly spawned process.
//!
//! Entered through the hidden `--internal-role child --status-fd N` flags.
//! The request arrives on stdin, snippet output goes straight to stdout,
//! tracebacks to stderr, and the [`ChildReport`] to the status fd. Every
//! failure ends up in the report; nothing is left for the parent to guess
//! except a child that died before writing one.

use crate::config::types::ErrorKind;
use crate::exec::protocol::{adopt_fd, read_json, write_json, ChildReport, ChildRequest};
use crate::runtime::{self, ExcKind, Exception, Interpreter, RuntimeLimits};
use std::io::{self, Write};
use std::os::unix::io::RawFd;
use std::thread;
use std::time::Instant;

/// Stack for the evaluation thread; deep snippet recursion needs more than
/// the default main-thread stack
const EVAL_STACK_BYTES: usize = 32 * 1024 * 1024;

/// Exit code when not even a report could be delivered
const EXIT_NO_REPORT: i32 = 126;

/// Run the child role to completion and return the process exit code
pub fn run_child_role(status_fd: RawFd) -> i32 {
    let status = match adopt_fd(status_fd) {
        Ok(file) => file,
        Err(err) => {
            let _ = writeln!(io::stderr(), "snipbox child: {}", err);
            return EXIT_NO_REPORT;
        }
    };

    let report = match read_json::<ChildRequest, _>(io::stdin().lock()) {
        Ok(request) => evaluate_on_thread(request),
        Err(err) => ChildReport::failed(ErrorKind::Internal, format!("bad child request: {}", err), 0.0),
    };

    match write_json(status, &report) {
        Ok(()) => 0,
        Err(err) => {
            let _ = writeln!(io::stderr(), "snipbox child: {}", err);
            EXIT_NO_REPORT
        }
    }
}

fn evaluate_on_thread(request: ChildRequest) -> ChildReport {
    let worker = thread::Builder::new()
        .name("snippet".to_string())
        .stack_size(EVAL_STACK_BYTES)
        .spawn(move || evaluate(&request, Box::new(io::stdout()), &mut io::stderr()));

    match worker {
        Ok(handle) => handle.join().unwrap_or_else(|_| {
            ChildReport::failed(ErrorKind::Internal, "interpreter panicked", 0.0)
        }),
        Err(err) => ChildReport::failed(
            ErrorKind::Internal,
            format!("failed to start evaluation thread: {}", err),
            0.0,
        ),
    }
}

/// Build the restricted surface and evaluate `request.source` against it
pub fn evaluate(request: &ChildRequest, stdout: Box<dyn Write>, stderr: &mut dyn Write) -> ChildReport {
    let surface = match runtime::build(&request.allowlist) {
        Ok(surface) => surface,
        Err(err) => return ChildReport::failed(ErrorKind::Internal, err.to_string(), 0.0),
    };
    let mut interp = Interpreter::new(RuntimeLimits::from(&request.limits), stdout);
    surface.install(&mut interp);

    let started = Instant::now();
    let result = interp.run(&request.source);
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    let violations = interp.take_security_events();

    match result {
        Ok(()) if violations.is_empty() => ChildReport::succeeded(elapsed_ms),
        Ok(()) => ChildReport::breached(violations, elapsed_ms),
        Err(exc) => {
            let report = report_exception(&mut interp, &exc, elapsed_ms, stderr);
            if violations.is_empty() {
                report
            } else {
                ChildReport::breached(violations, elapsed_ms)
            }
        }
    }
}

fn report_exception(
    interp: &mut Interpreter,
    exc: &Exception,
    elapsed_ms: f64,
    stderr: &mut dyn Write,
) -> ChildReport {
    let message = interp.exception_message(exc);

    if exc.is(ExcKind::SystemExit) {
        if message.is_empty() || message == "0" {
            return ChildReport::succeeded(elapsed_ms);
        }
        let _ = writeln!(stderr, "{}", message);
        let _ = stderr.flush();
        return ChildReport::failed(ErrorKind::Runtime(exc.class_name()), message, elapsed_ms);
    }

    let _ = stderr.write_all(interp.format_exception(exc).as_bytes());
    let _ = stderr.flush();

    let kind = if exc.is(ExcKind::SecurityError) {
        ErrorKind::Security
    } else if exc.is(ExcKind::SyntaxError) {
        ErrorKind::Syntax
    } else {
        ErrorKind::Runtime(exc.class_name())
    };
    ChildReport::failed(kind, message, elapsed_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::{standard_allowlist, standard_limits};
    use crate::runtime::SharedBuffer;

    fn evaluate_captured(request: &ChildRequest) -> (ChildReport, String, String) {
        let stdout = SharedBuffer::default();
        let mut stderr = Vec::new();
        let report = evaluate(request, Box::new(stdout.clone()), &mut stderr);
        (report, stdout.contents(), String::from_utf8(stderr).unwrap())
    }

    fn run(source: &str) -> (ChildReport, String, String) {
        let request = ChildRequest {
            source: source.to_string(),
            allowlist: standard_allowlist(),
            limits: standard_limits(),
        };
        evaluate_captured(&request)
    }

    #[test]
    fn test_clean_run_reports_success() {
        let (report, stdout, stderr) = run("def f(n):\n    return n*n\nprint(f(5))\n");
        assert!(report.success);
        assert!(report.error_kind.is_none());
        assert!(report.elapsed_ms >= 0.0);
        assert_eq!(stdout, "25\n");
        assert_eq!(stderr, "");
    }

    #[test]
    fn test_runtime_error_keeps_class_name_and_traceback() {
        let (report, stdout, stderr) = run("print('before')\nx = 1/0\n");
        assert!(!report.success);
        assert_eq!(
            report.error_kind,
            Some(ErrorKind::Runtime("ZeroDivisionError".to_string()))
        );
        assert_eq!(report.error.as_deref(), Some("division by zero"));
        assert_eq!(stdout, "before\n");
        assert!(stderr.starts_with("Traceback (most recent call last):\n"));
        assert!(stderr.contains("File \"<snippet>\", line 2"));
        assert!(stderr.ends_with("ZeroDivisionError: division by zero\n"));
        assert!(!stderr.contains("<sandbox>"));
    }

    #[test]
    fn test_trapped_operation_is_security_error_with_violation() {
        let (report, _, _) = run("import time\nx = 1\ntime.sleep(1)\n");
        assert_eq!(report.error_kind, Some(ErrorKind::Security));
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].line, 3);
        assert_eq!(report.violations[0].message, "time.sleep() is not allowed");
    }

    #[test]
    fn test_caught_violation_is_still_a_security_error() {
        let source = "\
import random
try:
    random.randbytes(10 ** 7)
except:
    pass
print('escaped')
";
        let (report, stdout, _) = run(source);
        assert!(!report.success);
        assert_eq!(report.error_kind, Some(ErrorKind::Security));
        assert_eq!(stdout, "");
        assert_eq!(report.violations.len(), 1);

        let (report, stdout, _) = run("import time\ntry:\n    time.sleep(100)\nexcept BaseException:\n    pass\nprint('slept?')\n");
        assert_eq!(report.error_kind, Some(ErrorKind::Security));
        assert_eq!(report.error.as_deref(), Some("time.sleep() is not allowed"));
        assert_eq!(stdout, "");
    }

    #[test]
    fn test_violation_swallowed_by_builtin_still_counts() {
        let (report, stdout, _) = run("x = 1\nprint(hasattr(x, '__class__'))\n");
        assert!(!report.success);
        assert_eq!(report.error_kind, Some(ErrorKind::Security));
        assert_eq!(report.violations.len(), 1);
        assert_eq!(stdout, "");
    }

    #[test]
    fn test_exit_codes() {
        let (report, stdout, _) = run("print('a')\nraise SystemExit\nprint('b')\n");
        assert!(report.success);
        assert_eq!(stdout, "a\n");

        let (report, _, stderr) = run("raise SystemExit(3)\n");
        assert_eq!(report.error_kind, Some(ErrorKind::Runtime("SystemExit".to_string())));
        assert_eq!(stderr, "3\n");
    }

    #[test]
    fn test_bad_allowlist_is_internal_error() {
        let mut allowlist = standard_allowlist();
        allowlist.allowed_imports.insert("socket".to_string());
        let request = ChildRequest {
            source: "print(1)\n".to_string(),
            allowlist,
            limits: standard_limits(),
        };
        let (report, stdout, _) = evaluate_captured(&request);
        assert_eq!(report.error_kind, Some(ErrorKind::Internal));
        assert_eq!(stdout, "");
    }
}
