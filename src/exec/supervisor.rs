use crate::config::types::{Limits, Result, SandboxError};
use crate::exec::output::{join_collector, spawn_collector, CapturedStream};
use crate::exec::protocol::{read_json, ChildReport, ChildRequest, STATUS_FD};
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{pipe2, Pid};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd};
use std::os::unix::io::RawFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Open-file ceiling for the child: stdio, the status pipe and a little slack
const CHILD_MAX_FILES: u64 = 32;

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::Process(format!("{prefix}: {err}"))
}

/// What the parent did to stop a child that ran past its deadline
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    pub exited_on_term: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// How the child process ended
#[derive(Debug)]
pub enum ChildExit {
    Exited(ExitStatus),
    TimedOut(KillReport),
    /// waitpid itself failed; the group was killed regardless
    Lost(String),
}

/// Everything collected from one child after it is gone
#[derive(Debug)]
pub struct Supervision {
    pub exit: ChildExit,
    /// Parent-side wall clock, up to exit or to the observed deadline
    pub elapsed: Duration,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    /// `None` when the child closed the status pipe without writing
    pub report: Option<Result<ChildReport>>,
}

/// A child process running one snippet
pub struct SpawnedChild {
    child: Child,
    started: Instant,
    stdin_writer: Option<thread::JoinHandle<io::Result<()>>>,
    stdout: Option<thread::JoinHandle<CapturedStream>>,
    stderr: Option<thread::JoinHandle<CapturedStream>>,
    status_reader: thread::JoinHandle<io::Result<Vec<u8>>>,
}

fn apply_rlimit_value(resource: libc::__rlimit_resource_t, soft: u64, hard: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: plain syscall on a stack value
    if unsafe { libc::setrlimit(resource, &limit) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Runs in the forked child between fork and exec; async-signal-safe calls only
fn prepare_child(parent: libc::pid_t, status_write: RawFd, memory: u64, cpu_seconds: u64) -> io::Result<()> {
    // SAFETY: each call below is async-signal-safe and touches only this process
    unsafe {
        if libc::setpgid(0, 0) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 {
            return Err(io::Error::last_os_error());
        }
        // Parent died before PDEATHSIG was armed
        if libc::getppid() != parent {
            return Err(io::Error::from_raw_os_error(libc::ESRCH));
        }
    }

    apply_rlimit_value(libc::RLIMIT_AS, memory, memory)?;
    apply_rlimit_value(libc::RLIMIT_CPU, cpu_seconds, cpu_seconds + 1)?;
    apply_rlimit_value(libc::RLIMIT_CORE, 0, 0)?;
    apply_rlimit_value(libc::RLIMIT_NOFILE, CHILD_MAX_FILES, CHILD_MAX_FILES)?;

    // SAFETY: fd juggling on descriptors owned by this process
    unsafe {
        if status_write == STATUS_FD {
            // dup2 onto itself keeps O_CLOEXEC, so clear it by hand
            if libc::fcntl(STATUS_FD, libc::F_SETFD, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
        } else if libc::dup2(status_write, STATUS_FD) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// CPU-seconds ceiling for a wall-clock timeout
pub fn cpu_seconds_for(timeout_seconds: f64) -> u64 {
    timeout_seconds.max(0.0).ceil() as u64 + 1
}

/// Re-exec `program` in the child role and hand it `request`
pub fn spawn_child(program: &Path, request: &ChildRequest, timeout_seconds: f64) -> Result<SpawnedChild> {
    let payload = serde_json::to_vec(request)
        .map_err(|e| SandboxError::Protocol(format!("failed to encode child request: {}", e)))?;

    let (status_read, status_write) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| to_process_error("pipe(status)", e))?;
    // SAFETY: both fds were just created and are owned here
    let status_read = unsafe { File::from_raw_fd(status_read) };
    let status_write = unsafe { File::from_raw_fd(status_write) };
    let status_write_fd = status_write.as_raw_fd();

    let parent = std::process::id() as libc::pid_t;
    let memory = request.limits.memory_limit_bytes;
    let cpu_seconds = cpu_seconds_for(timeout_seconds);

    let mut command = Command::new(program);
    command
        .arg("--internal-role")
        .arg("child")
        .arg("--status-fd")
        .arg(STATUS_FD.to_string())
        .env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // SAFETY: the closure only makes async-signal-safe calls
    unsafe {
        command.pre_exec(move || prepare_child(parent, status_write_fd, memory, cpu_seconds));
    }

    let mut child = command
        .spawn()
        .map_err(|e| to_process_error(&format!("spawn({})", program.display()), e))?;
    let started = Instant::now();
    drop(status_write);

    log::debug!("spawned child pid {}", child.id());

    let stdin_writer = child.stdin.take().map(|mut stdin| {
        thread::spawn(move || {
            stdin.write_all(&payload)?;
            stdin.flush()
        })
    });
    let limit = request.limits.max_output_bytes;
    let stdout = child.stdout.take().map(|s| spawn_collector(s, limit));
    let stderr = child.stderr.take().map(|s| spawn_collector(s, limit));
    let status_reader = thread::spawn(move || {
        let mut data = Vec::new();
        let mut status_read = status_read;
        status_read.read_to_end(&mut data)?;
        Ok(data)
    });

    Ok(SpawnedChild {
        child,
        started,
        stdin_writer,
        stdout,
        stderr,
        status_reader,
    })
}

impl SpawnedChild {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Poll until the child exits or the deadline passes, then collect
    pub fn supervise(mut self, timeout: Duration, grace: Duration) -> Supervision {
        let deadline = self.started + timeout;

        let (exit, elapsed) = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break (ChildExit::Exited(status), self.started.elapsed()),
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let elapsed = now - self.started;
                        let report = terminate_group(&mut self.child, grace);
                        break (ChildExit::TimedOut(report), elapsed);
                    }
                    thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("waitpid(child {}) failed: {}", self.child.id(), e);
                    let elapsed = self.started.elapsed();
                    terminate_group(&mut self.child, grace);
                    break (ChildExit::Lost(e.to_string()), elapsed);
                }
            }
        };

        if let Some(writer) = self.stdin_writer.take() {
            match writer.join() {
                Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => {
                    log::warn!("writing child request failed: {}", e)
                }
                _ => {}
            }
        }
        let stdout = join_collector(self.stdout.take());
        let stderr = join_collector(self.stderr.take());
        let report = match self.status_reader.join() {
            Ok(Ok(data)) if data.is_empty() => None,
            Ok(Ok(data)) => Some(read_json::<ChildReport, _>(data.as_slice())),
            Ok(Err(e)) => Some(Err(SandboxError::Io(e))),
            Err(_) => Some(Err(SandboxError::Protocol(
                "status reader panicked".to_string(),
            ))),
        };

        Supervision {
            exit,
            elapsed,
            stdout,
            stderr,
            report,
        }
    }
}

/// SIGTERM the child's process group, allow `grace`, then SIGKILL; always reaps
pub fn terminate_group(child: &mut Child, grace: Duration) -> KillReport {
    let mut report = KillReport::default();
    let start = Instant::now();
    let pid = Pid::from_raw(child.id() as i32);

    if let Err(e) = killpg(pid, Signal::SIGTERM) {
        report
            .notes
            .push(format!("group SIGTERM fallback used: {}", e));
        let _ = kill(pid, Signal::SIGTERM);
    }
    report.term_sent = true;

    let grace_deadline = start + grace;
    while Instant::now() < grace_deadline {
        match child.try_wait() {
            Ok(Some(_)) => {
                report.exited_on_term = true;
                break;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                report.notes.push(format!("wait during grace failed: {}", e));
                break;
            }
        }
    }

    if !report.exited_on_term {
        if let Err(e) = killpg(pid, Signal::SIGKILL) {
            report
                .notes
                .push(format!("group SIGKILL fallback used: {}", e));
            let _ = kill(pid, Signal::SIGKILL);
        }
        report.kill_sent = true;
    }

    if let Err(e) = child.wait() {
        report.notes.push(format!("reap failed: {}", e));
    }
    report.waited_ms = start.elapsed().as_millis() as u64;
    report
}

/// Human-readable exit status, e.g. `exit status 101` or `signal 9 (SIGKILL)`
pub fn describe_exit(status: &ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit status {}", code),
        (None, Some(sig)) => match Signal::try_from(sig) {
            Ok(signal) => format!("signal {} ({})", sig, signal.as_str()),
            Err(_) => format!("signal {}", sig),
        },
        (None, None) => "unknown exit status".to_string(),
    }
}

/// Wall-clock budget and grace window for a job
pub fn timing_for(limits: &Limits, timeout_seconds: f64) -> (Duration, Duration) {
    (
        Duration::from_secs_f64(timeout_seconds.max(0.0)),
        Duration::from_millis(limits.kill_grace_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_ceiling_rounds_up_and_adds_a_second() {
        assert_eq!(cpu_seconds_for(1.0), 2);
        assert_eq!(cpu_seconds_for(1.2), 3);
        assert_eq!(cpu_seconds_for(0.1), 2);
    }

    #[test]
    fn test_terminate_group_stops_a_sleeping_process() {
        let mut child = Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let report = terminate_group(&mut child, Duration::from_millis(500));
        assert!(report.term_sent);
        assert!(report.exited_on_term);
        assert!(!report.kill_sent);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_terminate_group_escalates_when_term_is_ignored() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 30")
            .process_group(0)
            .spawn()
            .unwrap();
        // Let the shell install its trap
        thread::sleep(Duration::from_millis(200));
        let report = terminate_group(&mut child, Duration::from_millis(100));
        assert!(report.kill_sent);
        let status = child.try_wait().unwrap().unwrap();
        assert_eq!(describe_exit(&status), "signal 9 (SIGKILL)");
    }

    #[test]
    fn test_describe_exit_code() {
        let status = Command::new("sh").arg("-c").arg("exit 7").status().unwrap();
        assert_eq!(describe_exit(&status), "exit status 7");
    }

    #[test]
    fn test_missing_program_is_a_process_error() {
        let request = ChildRequest {
            source: String::new(),
            allowlist: crate::config::presets::standard_allowlist(),
            limits: crate::config::presets::standard_limits(),
        };
        let err = spawn_child(Path::new("/nonexistent/snipbox"), &request, 1.0)
            .err()
            .unwrap();
        assert!(matches!(err, SandboxError::Process(_)));
    }
}
