//! Error types for luavm-process.

use thiserror::Error;

/// Result type alias for luavm-process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Errors that can occur while spawning or driving an interpreter process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The interpreter could not be spawned
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying failure
        message: String,
    },

    /// Pseudo-terminal allocation or control failure
    #[error("pty error: {0}")]
    Pty(String),

    /// Invalid interpreter configuration
    #[error("invalid interpreter config: {0}")]
    InvalidConfig(String),

    /// I/O error on a process stream or descriptor
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
