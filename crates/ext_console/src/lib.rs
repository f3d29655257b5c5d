//! Embedded command console for the protocol workspace
//!
//! Provides the interactive command line that sits next to the protocol views:
//! - Parsing command lines (quotes, pipes, redirects, trailing `&`)
//! - Built-in commands resolved through an explicit registry
//! - Pass-through system commands via a host execution service
//! - Background jobs with cancellation and a concurrency ceiling
//! - Long-lived interactive sessions streaming output events
//!
//! The entry point is [`ShellOrchestrator`]: one instance owns one
//! [`ShellContext`] and turns each submitted line into an [`ExecutionResult`].

pub mod config;
pub mod parser;
pub mod shell;

pub use config::ConsoleConfig;
pub use parser::{parse_line, ParsedCommand, ParsedLine, Redirect, RedirectKind};
pub use shell::{
    adapter::{
        AllowListPredicate, ExecutionService, ExternalRequest, ProcessExecutionService,
        ProcessOutput, SessionEvent, SystemCommandPredicate,
    },
    history::{HistoryEntry, HistoryStore, InMemoryHistory},
    jobs::{JobInfo, JobScheduler, JobStatus},
    orchestrator::{OrchestratorBuilder, ShellOrchestrator},
    registry::{CommandOutput, CommandRegistry, ShellCommand, ShellCommandContext},
    sessions::{InteractiveSessionManager, SessionInfo, SessionState},
    types::{EnvChange, ExecutionResult, ShellContext},
};

// ============================================================================
// Error Types
// ============================================================================

/// Error codes for console operations (9000-9010)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleErrorCode {
    /// Malformed command line (9000)
    Parse = 9000,
    /// No built-in or system command with that name (9001)
    CommandNotFound = 9001,
    /// External process failed or could not be driven (9002)
    ExecutionFailed = 9002,
    /// Background job rejected by the concurrency ceiling (9003)
    ConcurrencyLimitExceeded = 9003,
    /// Unknown job id (9004)
    JobNotFound = 9004,
    /// Unknown interactive session id (9005)
    SessionNotFound = 9005,
    /// Interactive session exists but is not running (9006)
    SessionNotRunning = 9006,
    /// Process could not be spawned (9007)
    SpawnFailed = 9007,
    /// External invocation exceeded its timeout (9008)
    Timeout = 9008,
    /// Filesystem or pipe I/O failure (9009)
    Io = 9009,
    /// Invalid configuration (9010)
    Config = 9010,
}

impl std::fmt::Display for ConsoleErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

/// Errors surfaced by the console subsystem
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("[{code}] Parse error: {message}")]
    Parse {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] Command not found: {message}")]
    CommandNotFound {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] Execution failed: {message}")]
    ExecutionFailed {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] Concurrency limit exceeded: {message}")]
    ConcurrencyLimitExceeded {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] Job not found: {message}")]
    JobNotFound {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] Session not found: {message}")]
    SessionNotFound {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] Session not running: {message}")]
    SessionNotRunning {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] Failed to spawn: {message}")]
    SpawnFailed {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] Timeout: {message}")]
    Timeout {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] IO error: {message}")]
    Io {
        code: ConsoleErrorCode,
        message: String,
    },

    #[error("[{code}] Invalid configuration: {message}")]
    Config {
        code: ConsoleErrorCode,
        message: String,
    },
}

impl ConsoleError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            code: ConsoleErrorCode::Parse,
            message: message.into(),
        }
    }

    pub fn command_not_found(message: impl Into<String>) -> Self {
        Self::CommandNotFound {
            code: ConsoleErrorCode::CommandNotFound,
            message: message.into(),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            code: ConsoleErrorCode::ExecutionFailed,
            message: message.into(),
        }
    }

    pub fn concurrency_limit_exceeded(message: impl Into<String>) -> Self {
        Self::ConcurrencyLimitExceeded {
            code: ConsoleErrorCode::ConcurrencyLimitExceeded,
            message: message.into(),
        }
    }

    pub fn job_not_found(message: impl Into<String>) -> Self {
        Self::JobNotFound {
            code: ConsoleErrorCode::JobNotFound,
            message: message.into(),
        }
    }

    pub fn session_not_found(message: impl Into<String>) -> Self {
        Self::SessionNotFound {
            code: ConsoleErrorCode::SessionNotFound,
            message: message.into(),
        }
    }

    pub fn session_not_running(message: impl Into<String>) -> Self {
        Self::SessionNotRunning {
            code: ConsoleErrorCode::SessionNotRunning,
            message: message.into(),
        }
    }

    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            code: ConsoleErrorCode::SpawnFailed,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            code: ConsoleErrorCode::Timeout,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            code: ConsoleErrorCode::Io,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ConsoleErrorCode::Config,
            message: message.into(),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> ConsoleErrorCode {
        match self {
            Self::Parse { code, .. }
            | Self::CommandNotFound { code, .. }
            | Self::ExecutionFailed { code, .. }
            | Self::ConcurrencyLimitExceeded { code, .. }
            | Self::JobNotFound { code, .. }
            | Self::SessionNotFound { code, .. }
            | Self::SessionNotRunning { code, .. }
            | Self::SpawnFailed { code, .. }
            | Self::Timeout { code, .. }
            | Self::Io { code, .. }
            | Self::Config { code, .. } => *code,
        }
    }

    /// Human-readable message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Parse { message, .. }
            | Self::CommandNotFound { message, .. }
            | Self::ExecutionFailed { message, .. }
            | Self::ConcurrencyLimitExceeded { message, .. }
            | Self::JobNotFound { message, .. }
            | Self::SessionNotFound { message, .. }
            | Self::SessionNotRunning { message, .. }
            | Self::SpawnFailed { message, .. }
            | Self::Timeout { message, .. }
            | Self::Io { message, .. }
            | Self::Config { message, .. } => message,
        }
    }

    /// Shell exit code reported for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandNotFound { .. } => shell::types::EXIT_NOT_FOUND,
            _ => shell::types::EXIT_FAILURE,
        }
    }
}

impl From<std::io::Error> for ConsoleError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::command_not_found(e.to_string()),
            std::io::ErrorKind::TimedOut => Self::timeout(e.to_string()),
            _ => Self::io(e.to_string()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
