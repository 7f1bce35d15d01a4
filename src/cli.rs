use crate::config::presets::standard_config;
use crate::config::types::SandboxConfig;
use crate::config::CONFIG_ENV_VAR;
use crate::exec::{child, Runner};
use crate::observability::audit;
use crate::validator::Validator;
use crate::worker::{Harness, SignalHandler};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Exit code of `check` when the snippet has violations
const EXIT_VIOLATIONS: i32 = 3;

#[derive(Parser)]
#[command(name = "snipbox", author, version, about, long_about = None)]
struct Cli {
    /// Internal role selector (hidden; used by the runner's re-exec path)
    #[arg(long, hide = true)]
    internal_role: Option<String>,
    /// Status fd for the internal child role
    #[arg(long, hide = true)]
    status_fd: Option<i32>,
    /// Configuration file (JSON); the standard preset when absent
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-lines jobs from stdin, one outcome line per job on stdout
    Worker,
    /// Run one snippet and print its outcome as JSON
    Exec {
        #[command(flatten)]
        source: SourceArgs,
        /// Wall-clock limit in seconds (configured default when absent)
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Validate a snippet without running it; exits 3 on violations
    Check {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Print the standard configuration preset
    Config,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Read the snippet from a file
    #[arg(long)]
    file: Option<PathBuf>,
    /// Snippet text
    #[arg(long)]
    code: Option<String>,
}

impl SourceArgs {
    fn read(&self) -> Result<String> {
        match (&self.file, &self.code) {
            (Some(path), _) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display())),
            (None, Some(code)) => Ok(code.clone()),
            (None, None) => Err(anyhow::anyhow!("one of --file or --code is required")),
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<SandboxConfig> {
    let config = SandboxConfig::load(path).context("failed to load configuration")?;
    if let Some(audit_path) = &config.audit_log {
        audit::init_security_logger(audit_path)
            .context("failed to initialize security audit log")?;
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // The child role logs nothing; its stdout and stderr belong to the snippet
    if let Some(role) = cli.internal_role.as_deref() {
        if role == "child" {
            let status_fd = cli.status_fd.ok_or_else(|| {
                anyhow::anyhow!("--status-fd is required for --internal-role=child")
            })?;
            std::process::exit(child::run_child_role(status_fd));
        }
        return Err(anyhow::anyhow!("unsupported internal role: {}", role));
    }

    env_logger::init();

    if !cfg!(target_os = "linux") {
        return Err(anyhow::anyhow!("snipbox requires Linux process controls"));
    }

    let command = cli.command.ok_or_else(|| anyhow::anyhow!("missing command"))?;
    match command {
        Commands::Worker => {
            // Before any thread is spawned
            let signals = SignalHandler::init().map_err(anyhow::Error::msg)?;
            let config = load_config(cli.config.as_deref())?;
            let runner = Runner::new(config)?;
            let stats = Harness::new(runner)
                .with_signals(signals)
                .run(BufReader::new(io::stdin()), io::stdout().lock())?;
            log::info!("worker finished: {:?}", stats);
            Ok(())
        }
        Commands::Exec { source, timeout } => {
            let config = load_config(cli.config.as_deref())?;
            let source = source.read()?;
            let timeout = timeout.unwrap_or(config.limits.default_timeout_seconds);
            let runner = Runner::new(config)?;
            print_json(&runner.execute(&source, timeout))
        }
        Commands::Check { source } => {
            let config = load_config(cli.config.as_deref())?;
            let source = source.read()?;
            let validator = Validator::new(Arc::new(config.allowlist));
            let violations = validator.check(&source);
            print_json(&violations)?;
            if !violations.is_empty() {
                std::process::exit(EXIT_VIOLATIONS);
            }
            Ok(())
        }
        Commands::Config => {
            let preset = serde_json::to_string_pretty(&standard_config())?;
            println!("{}", preset);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exec_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["snipbox", "exec"]).is_err());
        assert!(Cli::try_parse_from(["snipbox", "exec", "--code", "x", "--file", "a.py"]).is_err());
        let cli = Cli::try_parse_from(["snipbox", "exec", "--code", "print(1)", "--timeout", "2"]).unwrap();
        match cli.command {
            Some(Commands::Exec { source, timeout }) => {
                assert_eq!(source.read().unwrap(), "print(1)");
                assert_eq!(timeout, Some(2.0));
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_hidden_child_role_parses_without_subcommand() {
        let cli = Cli::try_parse_from(["snipbox", "--internal-role", "child", "--status-fd", "3"]).unwrap();
        assert_eq!(cli.internal_role.as_deref(), Some("child"));
        assert_eq!(cli.status_fd, Some(3));
        assert!(cli.command.is_none());
    }
}
