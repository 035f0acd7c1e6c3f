//! Error types for process management

use std::io;
use thiserror::Error;

/// Process management errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Failed to spawn process
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[from] io::Error),

    /// Pseudo-terminal could not be allocated or driven
    #[error("PTY error: {0}")]
    Pty(String),

    /// Invalid configuration
    #[error("Invalid process configuration: {0}")]
    InvalidConfig(String),

    /// Process died from the execution environment rather than a normal exit
    #[error("Process crashed: {reason}")]
    Crashed { reason: String },

    /// Failed to kill process
    #[error("Failed to kill process: {0}")]
    KillFailed(String),

    /// Process timed out
    #[error("Process timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// Operation not available for this backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Input could not be delivered
    #[error("I/O error: {0}")]
    Io(String),

    /// Operation requires a running process
    #[error("Process is not running")]
    NotRunning,

    /// `start` called on a process that already left the starting state
    #[error("Process already started")]
    AlreadyStarted,
}

impl ProcessError {
    /// Whether this error happened while the process was being constructed
    pub fn is_construction_failure(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed(_) | Self::Pty(_) | Self::InvalidConfig(_)
        )
    }
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Environment error: {0}")]
    Env(String),
}
