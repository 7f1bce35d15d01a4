//! JSON-lines job loop.
//!
//! One job per input line, one [`JobOutcome`] per job, strictly in order.
//! Lines are read on a helper thread so a pending shutdown signal is noticed
//! even while the input is idle.

use crate::config::types::{
    ErrorKind, ExecutionOutcome, Job, JobOutcome, Result, SandboxError,
};
use crate::exec::Runner;
use crate::observability::audit;
use crate::worker::signal::SignalHandler;
use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

/// How often an idle harness re-checks the shutdown flag
const STOP_POLL: Duration = Duration::from_millis(100);

/// Whatever actually executes a job
pub trait JobRunner {
    fn run_job(&self, job_id: &str, source: &str, timeout_seconds: f64) -> ExecutionOutcome;
    fn default_timeout_seconds(&self) -> f64;
}

impl JobRunner for Runner {
    fn run_job(&self, job_id: &str, source: &str, timeout_seconds: f64) -> ExecutionOutcome {
        self.execute_job(job_id, source, timeout_seconds)
    }

    fn default_timeout_seconds(&self) -> f64 {
        self.config().limits.default_timeout_seconds
    }
}

/// Counters reported when the loop ends
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HarnessStats {
    pub jobs: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub malformed: u64,
    /// Signal that ended the loop, `None` on EOF
    pub stopped_by: Option<String>,
}

pub struct Harness<R: JobRunner> {
    runner: R,
    signals: Option<SignalHandler>,
}

impl<R: JobRunner> Harness<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            signals: None,
        }
    }

    /// Stop accepting jobs once one of the handled signals arrives
    pub fn with_signals(mut self, signals: SignalHandler) -> Self {
        self.signals = Some(signals);
        self
    }

    fn stop_signal(&self) -> Option<String> {
        let signals = self.signals.as_ref()?;
        if !signals.shutdown_requested() {
            return None;
        }
        Some(signals.signal_name().unwrap_or("signal").to_string())
    }

    /// Serve jobs from `input` until EOF or a shutdown signal
    ///
    /// A line is read only once the previous job has been answered and no
    /// stop was requested, so lines left in `input` at shutdown stay unread.
    pub fn run<I, W>(&self, mut input: I, mut output: W) -> Result<HarnessStats>
    where
        I: BufRead + Send + 'static,
        W: Write,
    {
        let (demand_tx, demand_rx) = bounded::<()>(1);
        let (line_tx, line_rx) = bounded::<io::Result<Option<String>>>(1);
        thread::Builder::new()
            .name("job-reader".to_string())
            .spawn(move || {
                while demand_rx.recv().is_ok() {
                    let mut line = String::new();
                    let read = match input.read_line(&mut line) {
                        Ok(0) => Ok(None),
                        Ok(_) => Ok(Some(line)),
                        Err(e) => Err(e),
                    };
                    let last = !matches!(read, Ok(Some(_)));
                    if line_tx.send(read).is_err() || last {
                        break;
                    }
                }
            })?;

        let mut stats = HarnessStats::default();
        let mut pending = false;
        log::info!("worker ready");

        loop {
            if let Some(signal) = self.stop_signal() {
                log::info!("shutdown requested by {}", signal);
                if let Ok(Ok(Some(line))) = line_rx.try_recv() {
                    self.refuse_line(&line, &signal, &mut output)?;
                }
                stats.stopped_by = Some(signal);
                break;
            }
            if !pending {
                if demand_tx.send(()).is_err() {
                    break;
                }
                pending = true;
            }
            match line_rx.recv_timeout(STOP_POLL) {
                Ok(Ok(Some(line))) => {
                    pending = false;
                    self.serve_line(&line, &mut output, &mut stats)?;
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(SandboxError::Io(e)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        log::info!(
            "worker stopping after {} job(s): {} succeeded, {} failed, {} malformed",
            stats.jobs,
            stats.succeeded,
            stats.failed,
            stats.malformed
        );
        Ok(stats)
    }

    /// Answer a line that arrived together with the stop request
    fn refuse_line<W: Write>(&self, line: &str, signal: &str, output: &mut W) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let answer = JobOutcome {
            id: recover_id(line),
            outcome: ExecutionOutcome::failed(
                ErrorKind::Internal,
                format!("worker is shutting down ({}); job not run", signal),
            ),
        };
        write_outcome(&answer, output)
    }

    fn serve_line<W: Write>(&self, line: &str, output: &mut W, stats: &mut HarnessStats) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let answer = match serde_json::from_str::<Job>(line) {
            Ok(job) => {
                let timeout = job
                    .timeout_seconds
                    .unwrap_or_else(|| self.runner.default_timeout_seconds());
                log::debug!("job '{}' accepted", job.id);
                let outcome = self.runner.run_job(&job.id, &job.source, timeout);
                JobOutcome { id: job.id, outcome }
            }
            Err(e) => {
                let id = recover_id(line);
                stats.malformed += 1;
                audit::malformed_job(&id, &e.to_string());
                JobOutcome {
                    id,
                    outcome: ExecutionOutcome::failed(
                        ErrorKind::Validation,
                        format!("malformed job: {}", e),
                    ),
                }
            }
        };

        stats.jobs += 1;
        if answer.outcome.success {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }

        write_outcome(&answer, output)
    }
}

fn write_outcome<W: Write>(answer: &JobOutcome, output: &mut W) -> Result<()> {
    let encoded = serde_json::to_string(answer)
        .map_err(|e| SandboxError::Protocol(format!("failed to encode outcome: {}", e)))?;
    writeln!(output, "{}", encoded)?;
    output.flush()?;
    Ok(())
}

/// `id` of a line that is a JSON object but not a valid job
fn recover_id(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|value| value.get("id")?.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;

    /// Records calls and answers from the source text
    #[derive(Default)]
    struct ScriptedRunner {
        calls: RefCell<Vec<(String, f64)>>,
    }

    impl JobRunner for ScriptedRunner {
        fn run_job(&self, job_id: &str, source: &str, timeout_seconds: f64) -> ExecutionOutcome {
            self.calls
                .borrow_mut()
                .push((job_id.to_string(), timeout_seconds));
            if source.contains("boom") {
                ExecutionOutcome::failed(ErrorKind::Runtime("ValueError".to_string()), "boom")
            } else {
                ExecutionOutcome::completed(format!("ran {}\n", job_id), String::new(), 1.0)
            }
        }

        fn default_timeout_seconds(&self) -> f64 {
            5.0
        }
    }

    fn serve(input: &str) -> (Vec<JobOutcome>, HarnessStats, Vec<(String, f64)>) {
        let harness = Harness::new(ScriptedRunner::default());
        let mut output = Vec::new();
        let stats = harness
            .run(Cursor::new(input.as_bytes().to_vec()), &mut output)
            .unwrap();
        let outcomes = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let calls = harness.runner.calls.borrow().clone();
        (outcomes, stats, calls)
    }

    #[test]
    fn test_jobs_are_answered_in_order() {
        let input = "\
{\"id\": \"a\", \"source\": \"print(1)\", \"timeout_seconds\": 2.5}
{\"id\": \"b\", \"source\": \"boom\"}
";
        let (outcomes, stats, calls) = serve(input);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].id, "a");
        assert!(outcomes[0].outcome.success);
        assert_eq!(outcomes[0].outcome.stdout, "ran a\n");
        assert_eq!(outcomes[1].id, "b");
        assert_eq!(outcomes[1].outcome.error.as_deref(), Some("boom"));
        assert_eq!(calls, vec![("a".to_string(), 2.5), ("b".to_string(), 5.0)]);
        assert_eq!(stats.jobs, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.stopped_by, None);
    }

    #[test]
    fn test_malformed_lines_never_reach_the_runner() {
        let input = "\
not json at all
{\"id\": \"x\", \"source\": 42}

[1, 2]
";
        let (outcomes, stats, calls) = serve(input);
        assert!(calls.is_empty());
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].id, "");
        assert_eq!(outcomes[1].id, "x");
        assert_eq!(outcomes[2].id, "");
        for answer in &outcomes {
            assert_eq!(answer.outcome.error_kind, Some(ErrorKind::Validation));
            assert!(answer.outcome.error.as_ref().unwrap().starts_with("malformed job"));
        }
        assert_eq!(stats.malformed, 3);
    }

    #[test]
    fn test_empty_input_ends_cleanly() {
        let (outcomes, stats, _) = serve("");
        assert!(outcomes.is_empty());
        assert_eq!(stats, HarnessStats::default());
    }

    /// Raises SIGHUP while running its first job
    struct InterruptedRunner {
        calls: RefCell<Vec<String>>,
    }

    impl JobRunner for InterruptedRunner {
        fn run_job(&self, job_id: &str, _source: &str, _timeout_seconds: f64) -> ExecutionOutcome {
            self.calls.borrow_mut().push(job_id.to_string());
            nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).unwrap();
            ExecutionOutcome::completed(String::new(), String::new(), 1.0)
        }

        fn default_timeout_seconds(&self) -> f64 {
            5.0
        }
    }

    #[test]
    fn test_stop_finishes_in_flight_job_and_reads_no_further() {
        let _guard = crate::worker::signal::SIGNAL_TEST_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let signals = SignalHandler::init().unwrap();
        signals.reset();

        let input = "\
{\"id\": \"first\", \"source\": \"x\"}
{\"id\": \"second\", \"source\": \"x\"}
{\"id\": \"third\", \"source\": \"x\"}
";
        let harness = Harness::new(InterruptedRunner {
            calls: RefCell::new(Vec::new()),
        })
        .with_signals(signals);
        let mut output = Vec::new();
        let stats = harness
            .run(Cursor::new(input.as_bytes().to_vec()), &mut output)
            .unwrap();
        SignalHandler::init().unwrap().reset();

        let lines: Vec<JobOutcome> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].id, "first");
        assert!(lines[0].outcome.success);
        assert_eq!(*harness.runner.calls.borrow(), vec!["first".to_string()]);
        assert_eq!(stats.jobs, 1);
        assert_eq!(stats.stopped_by.as_deref(), Some("SIGHUP"));
    }

    #[test]
    fn test_line_buffered_at_shutdown_is_refused() {
        let harness = Harness::new(ScriptedRunner::default());
        let mut output = Vec::new();
        harness
            .refuse_line("{\"id\": \"late\", \"source\": \"x\"}\n", "SIGTERM", &mut output)
            .unwrap();
        harness.refuse_line("  \n", "SIGTERM", &mut output).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.lines().count(), 1);
        let answer: JobOutcome = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(answer.id, "late");
        assert!(!answer.outcome.success);
        assert_eq!(answer.outcome.error_kind, Some(ErrorKind::Internal));
        assert!(answer.outcome.error.unwrap().contains("SIGTERM"));
        assert!(harness.runner.calls.borrow().is_empty());
    }

    #[test]
    fn test_recover_id() {
        assert_eq!(recover_id("{\"id\": \"j1\", \"source\": null}"), "j1");
        assert_eq!(recover_id("{\"id\": 7}"), "");
        assert_eq!(recover_id("garbage"), "");
    }
}
