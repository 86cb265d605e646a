//! Error types for session operations

use std::io;
use std::path::PathBuf;

use nix::unistd::Pid;
use thiserror::Error;

use crate::pty::PtyError;

/// Session error type
#[derive(Error, Debug)]
pub enum Error {
    /// Empty argument vector
    #[error("Invalid command: argument vector is empty")]
    InvalidCommand,

    /// Executable not found on the search path
    #[error("Executable not found: {program}")]
    PathResolutionFailed { program: String },

    /// Working directory could not be resolved
    #[error("Invalid working directory {}: {source}", path.display())]
    DirectoryError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// PTY allocation or child spawn failed
    #[error("Failed to start process: {0}")]
    AllocationFailed(#[source] PtyError),

    /// Operation needs a process but the session was never started
    #[error("Process not started")]
    NotStarted,

    /// Sessions are single-use
    #[error("Session already started")]
    AlreadyStarted,

    /// Live resize of the PTY failed
    #[error("Failed to resize PTY: {0}")]
    ResizeFailed(#[source] PtyError),

    /// Kill signal could not be delivered
    #[error("Failed to signal {target}: {source}")]
    SignalDeliveryFailed {
        /// Signal target as passed to kill(2); negative for a process group
        target: Pid,
        #[source]
        source: nix::Error,
    },

    /// Waiting for the child failed
    #[error("Failed to wait for process: {0}")]
    WaitFailed(#[source] PtyError),

    /// Stream setup failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;
