//! PTY session
//!
//! A [`Session`] runs one command on one pty and is single-use:
//! `Unstarted -> Started -> Ended`, with no way back.
//!
//! The session does no internal locking. To read output on one thread while
//! another thread resizes or kills, move the streams out with
//! [`Session::take_stdout`] / [`Session::take_stdin`] and keep calls on the
//! session itself serialized.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::codec::Codec;
use crate::command::{CommandSpec, PathResolver, SearchPath};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::pty::{ChildProcess, ExitStatus, MasterPty, PtySystem, SpawnedPty, UnixPtySystem};
use crate::size::WindowSize;
use crate::terminate::{terminate_tree, ProcessSignaller, SystemSignaller, Termination};

/// Caller-facing input stream
pub type PtyWriter = Box<dyn Write + Send>;
/// Caller-facing output stream
pub type PtyReader = Box<dyn Read + Send>;

/// Lifecycle phase of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Started,
    Ended,
}

/// Handles owned once a process is running
struct Live {
    master: Box<dyn MasterPty>,
    child: Box<dyn ChildProcess>,
    stdin: Option<PtyWriter>,
    stdout: Option<PtyReader>,
}

enum State {
    Unstarted,
    Started(Live),
    /// Killed or reaped; handles are kept so `pid` stays meaningful
    Ended(Live),
}

/// One pty-backed child process
pub struct Session {
    config: SessionConfig,
    codec: Codec,
    size: WindowSize,
    state: State,
    pty_system: Box<dyn PtySystem>,
    resolver: Box<dyn PathResolver>,
    signaller: Box<dyn ProcessSignaller>,
}

impl Session {
    /// Create an unstarted session backed by the system pty
    pub fn new(config: SessionConfig) -> Self {
        Self {
            codec: config.codec(),
            size: config.window_size(),
            config,
            state: State::Unstarted,
            pty_system: Box::new(UnixPtySystem),
            resolver: Box::new(SearchPath),
            signaller: Box::new(SystemSignaller),
        }
    }

    pub fn with_pty_system(mut self, pty_system: impl PtySystem + 'static) -> Self {
        self.pty_system = Box::new(pty_system);
        self
    }

    pub fn with_resolver(mut self, resolver: impl PathResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn with_signaller(mut self, signaller: impl ProcessSignaller + 'static) -> Self {
        self.signaller = Box::new(signaller);
        self
    }

    /// Run `argv` on a new pty with `dir` as the child's working directory
    ///
    /// `argv[0]` is looked up on the search path. The pty is sized from the
    /// last [`set_size`](Self::set_size). The caller's own working directory
    /// is left alone. On failure the session stays unstarted.
    pub fn start<S: AsRef<str>>(&mut self, dir: impl AsRef<Path>, argv: &[S]) -> Result<()> {
        if !matches!(self.state, State::Unstarted) {
            return Err(Error::AlreadyStarted);
        }

        let command = CommandSpec::build(argv, self.resolver.as_ref())?;
        let dir = resolve_dir(dir.as_ref())?;
        let command = command.cwd(dir).env(self.config.env.clone());

        let SpawnedPty { master, mut child } = self
            .pty_system
            .spawn(&command, self.size)
            .map_err(Error::AllocationFailed)?;

        let streams = master
            .writer()
            .and_then(|writer| Ok((writer, master.reader()?)));
        let (writer, reader) = match streams {
            Ok(streams) => streams,
            Err(e) => {
                // A child that survived the kill must not be waited on
                if terminate_tree(self.signaller.as_ref(), child.pid()).is_ok() {
                    let _ = child.wait();
                }
                return Err(Error::Io(e));
            },
        };

        tracing::debug!(
            pid = child.pid().as_raw(),
            encoding = self.codec.name(),
            "session started"
        );

        self.state = State::Started(Live {
            stdin: Some(self.codec.wrap_writer(writer)),
            stdout: Some(self.codec.wrap_reader(reader)),
            master,
            child,
        });
        Ok(())
    }

    /// Record a new size and apply it to the live pty, if any
    pub fn set_size(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.set_window_size(WindowSize::new(cols, rows))
    }

    /// Like [`set_size`](Self::set_size), with pixel dimensions
    pub fn set_window_size(&mut self, size: WindowSize) -> Result<()> {
        self.size = size;
        match &self.state {
            State::Started(live) => {
                live.master.resize(size).map_err(Error::ResizeFailed)?;
                tracing::trace!(cols = size.cols, rows = size.rows, "pty resized");
                Ok(())
            },
            State::Unstarted | State::Ended(_) => Ok(()),
        }
    }

    /// Pid of the child, or 0 before a successful start
    pub fn pid(&self) -> i32 {
        match &self.state {
            State::Unstarted => 0,
            State::Started(live) | State::Ended(live) => live.child.pid().as_raw(),
        }
    }

    /// SIGKILL the child's whole process group
    ///
    /// Once the child has been reaped by [`wait`](Self::wait) or
    /// [`try_wait`](Self::try_wait) its pid may belong to someone else, so
    /// nothing is signalled and [`Termination::Reaped`] is returned. A killed
    /// child is not reaped here: call `wait` for its status, or drop the
    /// session, which blocks until it is collected.
    pub fn kill(&mut self) -> Result<Termination> {
        let live = self.live()?;
        if let Some(status) = live.child.exit_status() {
            return Ok(Termination::Reaped(status));
        }
        let termination = terminate_tree(self.signaller.as_ref(), live.child.pid())?;
        self.mark_ended();
        Ok(termination)
    }

    /// Block until the child exits
    pub fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.live_mut()?.child.wait().map_err(Error::WaitFailed)?;
        self.mark_ended();
        Ok(status)
    }

    /// Check for exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let status = self
            .live_mut()?
            .child
            .try_wait()
            .map_err(Error::WaitFailed)?;
        if status.is_some() {
            self.mark_ended();
        }
        Ok(status)
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            State::Unstarted => SessionState::Unstarted,
            State::Started(_) => SessionState::Started,
            State::Ended(_) => SessionState::Ended,
        }
    }

    /// Input stream, accepting bytes in the session's encoding
    pub fn stdin(&mut self) -> Option<&mut PtyWriter> {
        self.live_mut().ok()?.stdin.as_mut()
    }

    /// Output stream, yielding bytes in the session's encoding
    pub fn stdout(&mut self) -> Option<&mut PtyReader> {
        self.live_mut().ok()?.stdout.as_mut()
    }

    /// Always `None`: the pty merges stderr into stdout
    pub fn stderr(&mut self) -> Option<&mut PtyReader> {
        None
    }

    pub fn take_stdin(&mut self) -> Option<PtyWriter> {
        self.live_mut().ok()?.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<PtyReader> {
        self.live_mut().ok()?.stdout.take()
    }

    /// Encoding label as configured
    pub fn encoding(&self) -> &str {
        &self.config.encoding
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn color_able(&self) -> bool {
        self.config.color_able
    }

    /// Size used at spawn, or the latest resize
    pub fn size(&self) -> WindowSize {
        self.size
    }

    pub fn env(&self) -> &[String] {
        &self.config.env
    }

    fn live(&self) -> Result<&Live> {
        match &self.state {
            State::Unstarted => Err(Error::NotStarted),
            State::Started(live) | State::Ended(live) => Ok(live),
        }
    }

    fn live_mut(&mut self) -> Result<&mut Live> {
        match &mut self.state {
            State::Unstarted => Err(Error::NotStarted),
            State::Started(live) | State::Ended(live) => Ok(live),
        }
    }

    fn mark_ended(&mut self) {
        self.state = match std::mem::replace(&mut self.state, State::Unstarted) {
            State::Started(live) => State::Ended(live),
            other => other,
        };
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Ended without an exit status means SIGKILL was delivered, so the
        // blocking wait cannot hang
        if let State::Ended(live) = &mut self.state {
            if live.child.exit_status().is_none() {
                let _ = live.child.wait();
            }
        }
    }
}

fn resolve_dir(dir: &Path) -> Result<PathBuf> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };

    let resolved = dir.canonicalize().map_err(|source| Error::DirectoryError {
        path: dir.to_path_buf(),
        source,
    })?;
    if !resolved.is_dir() {
        return Err(Error::DirectoryError {
            path: resolved,
            source: io::Error::other("not a directory"),
        });
    }
    Ok(resolved)
}
