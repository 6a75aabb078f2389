use strum_macros::Display;
use thiserror::Error;

/// Failure of a single command execution.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command exited with code {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("command timed out after {0}")]
    TimedOut(humantime::FormattedDuration),
    #[error("empty command")]
    EmptyCommand,
    #[error("i/o error while reading command output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunnerErrorKind {
    Spawn,
    NonZeroExit,
    TimedOut,
    EmptyCommand,
    Io,
}

impl RunnerError {
    pub fn kind(&self) -> RunnerErrorKind {
        match self {
            RunnerError::Spawn { .. } => RunnerErrorKind::Spawn,
            RunnerError::NonZeroExit { .. } => RunnerErrorKind::NonZeroExit,
            RunnerError::TimedOut(_) => RunnerErrorKind::TimedOut,
            RunnerError::EmptyCommand => RunnerErrorKind::EmptyCommand,
            RunnerError::Io(_) => RunnerErrorKind::Io,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no task scheduler available, install systemd or cron")]
    NoSchedulerAvailable,
    #[error("scheduler i/o error: {0}")]
    Io(String),
    #[error("invalid scheduled task: {0}")]
    InvalidTask(String),
    #[error("could not parse scheduled task: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerErrorKind {
    NoSchedulerAvailable,
    Io,
    InvalidTask,
    Parse,
}

impl SchedulerError {
    pub fn kind(&self) -> SchedulerErrorKind {
        match self {
            SchedulerError::NoSchedulerAvailable => SchedulerErrorKind::NoSchedulerAvailable,
            SchedulerError::Io(_) => SchedulerErrorKind::Io,
            SchedulerError::InvalidTask(_) => SchedulerErrorKind::InvalidTask,
            SchedulerError::Parse(_) => SchedulerErrorKind::Parse,
        }
    }
}

impl From<RunnerError> for SchedulerError {
    fn from(e: RunnerError) -> Self {
        SchedulerError::Io(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant backend unavailable: {0}")]
    Unavailable(String),
    #[error("assistant backend timed out")]
    Timeout,
    #[error("assistant backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("could not decode assistant response: {0}")]
    Parse(String),
    #[error("proposed action has an empty command")]
    EmptyCommand,
    #[error("action was already executed or refused")]
    AlreadyResolved,
    #[error("action failed: {0}")]
    Execution(#[from] RunnerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AssistantErrorKind {
    Unavailable,
    Timeout,
    Http,
    Parse,
    EmptyCommand,
    AlreadyResolved,
    Execution,
}

impl AssistantError {
    pub fn kind(&self) -> AssistantErrorKind {
        match self {
            AssistantError::Unavailable(_) => AssistantErrorKind::Unavailable,
            AssistantError::Timeout => AssistantErrorKind::Timeout,
            AssistantError::Http { .. } => AssistantErrorKind::Http,
            AssistantError::Parse(_) => AssistantErrorKind::Parse,
            AssistantError::EmptyCommand => AssistantErrorKind::EmptyCommand,
            AssistantError::AlreadyResolved => AssistantErrorKind::AlreadyResolved,
            AssistantError::Execution(_) => AssistantErrorKind::Execution,
        }
    }
}

impl From<reqwest::Error> for AssistantError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AssistantError::Timeout
        } else if e.is_connect() {
            AssistantError::Unavailable(e.to_string())
        } else if e.is_decode() {
            AssistantError::Parse(e.to_string())
        } else {
            AssistantError::Unavailable(e.to_string())
        }
    }
}

/// Failure of an external probe script.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe script not found: {0}")]
    Missing(String),
    #[error("probe failed: {0}")]
    Failed(String),
    #[error("probe returned malformed JSON: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProbeErrorKind {
    Missing,
    Failed,
    Malformed,
}

impl ProbeError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeError::Missing(_) => ProbeErrorKind::Missing,
            ProbeError::Failed(_) => ProbeErrorKind::Failed,
            ProbeError::Malformed(_) => ProbeErrorKind::Malformed,
        }
    }
}

impl From<RunnerError> for ProbeError {
    fn from(e: RunnerError) -> Self {
        ProbeError::Failed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_runner_error_kinds() {
        let e = RunnerError::NonZeroExit {
            code: Some(1),
            stderr: "boom".to_string(),
        };
        assert_eq!(e.kind(), RunnerErrorKind::NonZeroExit);
        assert!(e.to_string().contains("boom"));

        let e = RunnerError::TimedOut(humantime::format_duration(Duration::from_secs(3)));
        assert_eq!(e.kind(), RunnerErrorKind::TimedOut);
        assert!(e.to_string().contains("3s"));
        assert_eq!(e.kind().to_string(), "timed_out");
    }

    #[test]
    fn test_runner_error_converts_to_probe_failure() {
        let e: ProbeError = RunnerError::EmptyCommand.into();
        assert_eq!(e.kind(), ProbeErrorKind::Failed);
        assert_eq!(e.kind().to_string(), "failed");
    }

    #[test]
    fn test_no_scheduler_message_mentions_remediation() {
        let e = SchedulerError::NoSchedulerAvailable;
        assert_eq!(e.kind(), SchedulerErrorKind::NoSchedulerAvailable);
        assert!(e.to_string().contains("systemd or cron"));
    }
}
