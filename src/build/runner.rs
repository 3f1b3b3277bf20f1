use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{BuildError, BuildResult};

/// A process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create an invocation of `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Command line as a single string for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Captured result of a finished (or killed) process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Runs external processes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, killing the process after `timeout`.
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> BuildResult<CommandOutput>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> BuildResult<CommandOutput> {
        debug!(command = %spec.command_line(), "Starting process");
        let start = Instant::now();

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::Spawn {
                program: spec.program.display().to_string(),
                message: e.to_string(),
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                debug!(
                    program = %spec.program.display(),
                    status = ?output.status.code(),
                    elapsed_ms = start.elapsed().as_millis(),
                    "Process finished"
                );
                Ok(CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(BuildError::Spawn {
                program: spec.program.display().to_string(),
                message: format!("Failed to wait for command: {}", e),
            }),
            // Dropping the future kills the child
            Err(_) => {
                warn!(
                    program = %spec.program.display(),
                    timeout_ms = timeout.as_millis(),
                    "Process timed out"
                );
                Ok(CommandOutput {
                    status: None,
                    timed_out: true,
                    ..Default::default()
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = SystemCommandRunner
            .run(&spec, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.status, Some(3));
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let spec = CommandSpec::new("sleep").arg("5");
        let output = SystemCommandRunner
            .run(&spec, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(output.timed_out);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = CommandSpec::new("/definitely/not/a/binary");
        let err = SystemCommandRunner
            .run(&spec, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Spawn { .. }));
    }

    #[test]
    fn test_command_line() {
        let spec = CommandSpec::new("/jdk/bin/javac").args(["-cp", "a:b", "T.java"]);
        assert_eq!(spec.command_line(), "/jdk/bin/javac -cp a:b T.java");
    }
}
