//! Error types for pwsh-mux.

use thiserror::Error;

/// Main error type for all shell operations.
///
/// PowerShell-level errors are not represented here: a fragment that runs and
/// writes to the Error stream completes successfully with a populated `error`
/// array in its [`StreamsResult`](crate::StreamsResult). This type covers
/// failures of the supervisor machinery itself.
#[derive(Debug, Error)]
pub enum ShellError {
    /// No envelope was received within the configured per-command timeout.
    /// The interpreter is assumed corrupt and is restarted.
    #[error("command timed out after {millis} ms")]
    Timeout {
        /// The configured timeout, in milliseconds.
        millis: u64,
    },

    /// The interpreter exited (spontaneously or via shutdown) before this
    /// command completed. Also delivered to queued commands on shutdown and
    /// to commands stranded by a restart.
    #[error("interpreter closed before the command completed")]
    Closed,

    /// The stdin write for this command failed. The interpreter is treated
    /// as closed and restarted.
    #[error("failed to write command to interpreter stdin: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// An extracted frame was not a valid envelope. The reader frame may be
    /// corrupt, so this provokes a restart.
    #[error("invalid envelope: {0}")]
    Decode(String),

    /// I/O error while spawning or wiring the interpreter.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ShellError.
pub type Result<T> = std::result::Result<T, ShellError>;
