//! PTY allocation and child spawning
//!
//! The session talks to the platform through [`PtySystem`], which opens a
//! master/slave pair at a given size and execs a [`CommandSpec`] on the
//! slave side. [`UnixPtySystem`] is the POSIX implementation.

use std::io::{self, Read, Write};

use nix::unistd::Pid;

use crate::command::CommandSpec;
use crate::size::WindowSize;

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::UnixPtySystem;

/// Error type for PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("Failed to open PTY master: {0}")]
    OpenMaster(#[source] nix::Error),

    #[error("Failed to grant PTY access: {0}")]
    GrantPty(#[source] nix::Error),

    #[error("Failed to unlock PTY: {0}")]
    UnlockPty(#[source] nix::Error),

    #[error("Failed to get PTY slave name: {0}")]
    PtsName(#[source] nix::Error),

    #[error("Failed to fork: {0}")]
    Fork(#[source] nix::Error),

    #[error("Failed to execute {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Argument contains an interior NUL byte: {0:?}")]
    InvalidArgument(String),

    #[error("Failed to set window size: {0}")]
    SetWinsize(#[source] nix::Error),

    #[error("Failed to get window size: {0}")]
    GetWinsize(#[source] nix::Error),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] nix::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

/// Allocates a pty and runs a command attached to it
pub trait PtySystem: Send + Sync {
    fn spawn(&self, command: &CommandSpec, size: WindowSize) -> PtyResult<SpawnedPty>;
}

/// The controlling side of a pty
pub trait MasterPty: Send {
    /// Independent handle for reading child output
    fn reader(&self) -> io::Result<Box<dyn Read + Send>>;
    /// Independent handle for writing child input
    fn writer(&self) -> io::Result<Box<dyn Write + Send>>;
    fn resize(&self, size: WindowSize) -> PtyResult<()>;
    fn window_size(&self) -> PtyResult<WindowSize>;
}

/// A process running on the slave side of a pty
pub trait ChildProcess: Send {
    fn pid(&self) -> Pid;
    /// Non-blocking exit check
    fn try_wait(&mut self) -> PtyResult<Option<ExitStatus>>;
    fn wait(&mut self) -> PtyResult<ExitStatus>;
    /// Status from an earlier successful wait; `Some` means the pid is gone
    fn exit_status(&self) -> Option<ExitStatus>;
}

/// A freshly spawned pty-backed process
pub struct SpawnedPty {
    pub master: Box<dyn MasterPty>,
    pub child: Box<dyn ChildProcess>,
}
