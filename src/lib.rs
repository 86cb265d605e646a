//! PTY Console - pseudoterminal sessions for arbitrary commands
//!
//! Runs one child process per [`Session`] on a freshly allocated pty and
//! exposes its terminal as a pair of byte streams.
//!
//! - `session`: the start / resize / kill state machine
//! - `codec`: transcoding between the pty's UTF-8 and a caller encoding
//! - `command`: argument vector to resolved [`CommandSpec`]
//! - `pty`: pty allocation and child spawning (POSIX)
//! - `terminate`: process-group SIGKILL with single-process fallback
//!
//! ```no_run
//! use std::io::Read;
//! use pty_console::{Session, SessionConfig};
//!
//! let mut session = Session::new(SessionConfig::default());
//! session.start(".", &["echo", "hi"])?;
//! let mut output = String::new();
//! session.stdout().unwrap().read_to_string(&mut output)?;
//! session.kill()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod pty;
pub mod session;
pub mod size;
pub mod terminate;

#[cfg(test)]
mod test_utils;

pub use codec::Codec;
pub use command::{CommandSpec, PathResolver, SearchPath};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use pty::{ExitStatus, PtyError, PtySystem};
pub use session::{PtyReader, PtyWriter, Session, SessionState};
pub use size::WindowSize;
pub use terminate::{terminate_tree, ProcessSignaller, SystemSignaller, Termination};
