use crate::config::FoundationConfig;
use crate::error::RunnerError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, trace};

const SHELL: &str = "bash";

/// Outcome of a non-streaming execution as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub success: bool,
    /// Captured stdout on success, stderr (or the failure reason) otherwise.
    pub output: String,
}

/// Runs shell commands, optionally through the graphical elevation helper.
///
/// The runner holds configuration only. Independent invocations may run
/// concurrently, nothing is queued or serialized here.
///
/// Commands are handed to `bash -c` as one discrete argument (or to
/// `<helper> bash -c` when elevated), so the payload is never spliced into
/// another shell string. Callers holding untrusted text should prefer
/// `run_argv`, which involves no shell at all.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    elevation_helper: String,
    timeout: Option<Duration>,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new("pkexec")
    }
}

impl CommandRunner {
    pub fn new(elevation_helper: &str) -> Self {
        Self {
            elevation_helper: elevation_helper.to_string(),
            timeout: None,
        }
    }

    pub fn from_config(config: &FoundationConfig) -> Self {
        Self::new(&config.elevation_helper)
    }

    /// Every invocation made through the returned runner is killed after `limit`.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn elevation_helper(&self) -> &str {
        &self.elevation_helper
    }

    /// Argument vector used to run `cmd` through the shell.
    pub fn shell_argv(&self, cmd: &str, elevated: bool) -> Vec<String> {
        let mut argv = Vec::with_capacity(4);
        if elevated {
            argv.push(self.elevation_helper.clone());
        }
        argv.push(SHELL.to_string());
        argv.push("-c".to_string());
        argv.push(cmd.to_string());
        argv
    }

    fn elevate(&self, argv: &[String], elevated: bool) -> Vec<String> {
        if elevated {
            let mut full = Vec::with_capacity(argv.len() + 1);
            full.push(self.elevation_helper.clone());
            full.extend_from_slice(argv);
            full
        } else {
            argv.to_vec()
        }
    }

    /// Runs `cmd` to completion. Never fails: errors come back as
    /// `success == false` with the captured stderr or the failure reason.
    pub async fn run(&self, cmd: &str, elevated: bool) -> CommandOutput {
        match self.run_checked(cmd, elevated).await {
            Ok(stdout) => CommandOutput {
                success: true,
                output: stdout,
            },
            Err(RunnerError::NonZeroExit { stderr, .. }) => CommandOutput {
                success: false,
                output: stderr,
            },
            Err(e) => CommandOutput {
                success: false,
                output: e.to_string(),
            },
        }
    }

    /// Runs `cmd` and returns its stdout, or the typed failure.
    pub async fn run_checked(&self, cmd: &str, elevated: bool) -> Result<String, RunnerError> {
        if cmd.trim().is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        self.collect(&self.shell_argv(cmd, elevated)).await
    }

    /// Runs a program with explicit arguments, bypassing the shell.
    pub async fn run_argv(&self, argv: &[String], elevated: bool) -> Result<String, RunnerError> {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        self.collect(&self.elevate(argv, elevated)).await
    }

    /// Runs `cmd`, handing each stdout line to `on_line` as it is produced.
    /// stderr is never streamed: a non-zero exit yields `NonZeroExit`
    /// carrying it, a successful run discards it.
    pub async fn run_streaming<F>(
        &self,
        cmd: &str,
        elevated: bool,
        on_line: F,
    ) -> Result<(), RunnerError>
    where
        F: FnMut(&str) + Send,
    {
        if cmd.trim().is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        let argv = self.shell_argv(cmd, elevated);
        self.with_deadline(stream(&argv, on_line)).await
    }

    /// Streaming form of `run_argv`.
    pub async fn run_argv_streaming<F>(
        &self,
        argv: &[String],
        elevated: bool,
        on_line: F,
    ) -> Result<(), RunnerError>
    where
        F: FnMut(&str) + Send,
    {
        if argv.is_empty() || argv[0].is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        let argv = self.elevate(argv, elevated);
        self.with_deadline(stream(&argv, on_line)).await
    }

    async fn collect(&self, argv: &[String]) -> Result<String, RunnerError> {
        let output = self.with_deadline(spawn_and_wait(argv)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        trace!(
            "Execution results for {:?} - code : {:?} - stdout : {:?} - stderr : {:?}",
            argv,
            output.status.code(),
            stdout,
            stderr
        );

        if output.status.success() {
            Ok(stdout)
        } else {
            Err(RunnerError::NonZeroExit {
                code: output.status.code(),
                stderr,
            })
        }
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T, RunnerError>
    where
        F: Future<Output = Result<T, RunnerError>>,
    {
        match self.timeout {
            Some(limit) => match timeout(limit, fut).await {
                Ok(result) => result,
                // Dropping the future kills the child (kill_on_drop)
                Err(_) => Err(RunnerError::TimedOut(humantime::format_duration(limit))),
            },
            None => fut.await,
        }
    }
}

fn command(argv: &[String]) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

async fn spawn_and_wait(argv: &[String]) -> Result<std::process::Output, RunnerError> {
    command(argv)
        .output()
        .await
        .map_err(|source| RunnerError::Spawn {
            program: argv[0].clone(),
            source,
        })
}

async fn stream<F>(argv: &[String], mut on_line: F) -> Result<(), RunnerError>
where
    F: FnMut(&str) + Send,
{
    let mut child = command(argv).spawn().map_err(|source| RunnerError::Spawn {
        program: argv[0].clone(),
        source,
    })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        RunnerError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "stdout not captured",
        ))
    })?;
    let mut stderr = child.stderr.take();

    // Drain stderr concurrently so a chatty child cannot block on a full pipe
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(ref mut stderr) = stderr {
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                error!("Error reading stderr: {}", e);
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    });

    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        on_line(&line);
    }

    let status = child.wait().await?;
    let stderr = stderr_task.await.unwrap_or_default();

    trace!(
        "Streaming execution finished for {:?} - code : {:?} - stderr : {:?}",
        argv,
        status.code(),
        stderr
    );

    if status.success() {
        Ok(())
    } else {
        Err(RunnerError::NonZeroExit {
            code: status.code(),
            stderr,
        })
    }
}

/// Check if a binary exists in PATH or as absolute path
pub fn binary_exists(binary_name: &str) -> bool {
    let path = Path::new(binary_name);
    if path.is_absolute() {
        return path.exists();
    }
    match std::env::var_os("PATH") {
        Some(path_env) => std::env::split_paths(&path_env).any(|dir| dir.join(binary_name).is_file()),
        None => false,
    }
}
