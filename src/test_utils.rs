//! Test doubles for the session's collaborators.
//!
//! - `FakePty` - records spawn and resize calls, serves canned output and
//!   captures input instead of touching a real pty
//! - `FixedResolver` - maps program names to paths from a table
//! - `RecordingSignaller` - records signals instead of sending them

#![cfg(test)]

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::command::{CommandSpec, PathResolver};
use crate::pty::{ChildProcess, ExitStatus, MasterPty, PtyError, PtyResult, PtySystem, SpawnedPty};
use crate::size::WindowSize;
use crate::terminate::ProcessSignaller;

/// Pid handed out by `FakePty`
pub const FAKE_PID: i32 = 4321;

// ============================================================================
// Fake PTY
// ============================================================================

#[derive(Default)]
struct FakePtyState {
    spawns: Vec<(CommandSpec, WindowSize)>,
    resizes: Vec<WindowSize>,
    input: Vec<u8>,
    output: Vec<u8>,
    fail_next_spawn: bool,
    fail_streams: bool,
    waits: usize,
}

/// In-memory `PtySystem`; clones share the same recorded state
#[derive(Clone, Default)]
pub struct FakePty {
    state: Arc<Mutex<FakePtyState>>,
}

impl FakePty {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes the child "prints"
    pub fn with_output(output: &[u8]) -> Self {
        let pty = Self::default();
        pty.lock().output = output.to_vec();
        pty
    }

    pub fn fail_next_spawn(&self) {
        self.lock().fail_next_spawn = true;
    }

    /// Make the master's stream handles fail to open
    pub fn fail_streams(&self) {
        self.lock().fail_streams = true;
    }

    pub fn spawns(&self) -> Vec<(CommandSpec, WindowSize)> {
        self.lock().spawns.clone()
    }

    pub fn resizes(&self) -> Vec<WindowSize> {
        self.lock().resizes.clone()
    }

    /// Bytes the child received on its terminal
    pub fn input(&self) -> Vec<u8> {
        self.lock().input.clone()
    }

    /// Blocking waits the child has seen
    pub fn waits(&self) -> usize {
        self.lock().waits
    }

    fn lock(&self) -> MutexGuard<'_, FakePtyState> {
        self.state.lock().expect("fake pty lock")
    }
}

impl PtySystem for FakePty {
    fn spawn(&self, command: &CommandSpec, size: WindowSize) -> PtyResult<SpawnedPty> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_spawn) {
            return Err(PtyError::Fork(Errno::EAGAIN));
        }
        state.spawns.push((command.clone(), size));

        Ok(SpawnedPty {
            master: Box::new(FakeMaster { pty: self.clone() }),
            child: Box::new(FakeChild {
                pid: Pid::from_raw(FAKE_PID),
                pty: self.clone(),
                status: None,
            }),
        })
    }
}

struct FakeMaster {
    pty: FakePty,
}

impl MasterPty for FakeMaster {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.pty.lock().output.clone())))
    }

    fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        if self.pty.lock().fail_streams {
            return Err(io::Error::from_raw_os_error(nix::libc::EMFILE));
        }
        Ok(Box::new(FakeInput {
            pty: self.pty.clone(),
        }))
    }

    fn resize(&self, size: WindowSize) -> PtyResult<()> {
        self.pty.lock().resizes.push(size);
        Ok(())
    }

    fn window_size(&self) -> PtyResult<WindowSize> {
        let state = self.pty.lock();
        let spawned = state.spawns.last().map(|(_, size)| *size);
        Ok(state.resizes.last().copied().or(spawned).unwrap_or_default())
    }
}

struct FakeInput {
    pty: FakePty,
}

impl Write for FakeInput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pty.lock().input.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Exits with status 0 as soon as anyone waits
struct FakeChild {
    pid: Pid,
    pty: FakePty,
    status: Option<ExitStatus>,
}

impl ChildProcess for FakeChild {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn try_wait(&mut self) -> PtyResult<Option<ExitStatus>> {
        self.status = Some(ExitStatus::Exited(0));
        Ok(self.status)
    }

    fn wait(&mut self) -> PtyResult<ExitStatus> {
        self.pty.lock().waits += 1;
        let status = *self.status.get_or_insert(ExitStatus::Exited(0));
        Ok(status)
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }
}

// ============================================================================
// Path resolver
// ============================================================================

#[derive(Default)]
pub struct FixedResolver {
    paths: HashMap<String, PathBuf>,
}

impl FixedResolver {
    pub fn with(program: &str, path: &str) -> Self {
        Self::default().and(program, path)
    }

    pub fn and(mut self, program: &str, path: &str) -> Self {
        self.paths.insert(program.to_string(), PathBuf::from(path));
        self
    }
}

impl PathResolver for FixedResolver {
    fn resolve(&self, program: &str) -> Option<PathBuf> {
        self.paths.get(program).cloned()
    }
}

// ============================================================================
// Signaller
// ============================================================================

/// Records signals; clones share the record
#[derive(Clone)]
pub struct RecordingSignaller {
    group: Result<Pid, Errno>,
    fail_with: Option<Errno>,
    sent: Arc<Mutex<Vec<(Pid, Signal)>>>,
}

impl RecordingSignaller {
    pub fn with_group(pgid: Pid) -> Self {
        Self {
            group: Ok(pgid),
            fail_with: None,
            sent: Arc::default(),
        }
    }

    pub fn without_group(errno: Errno) -> Self {
        Self {
            group: Err(errno),
            fail_with: None,
            sent: Arc::default(),
        }
    }

    pub fn failing(mut self, errno: Errno) -> Self {
        self.fail_with = Some(errno);
        self
    }

    pub fn sent(&self) -> Vec<(Pid, Signal)> {
        self.sent.lock().expect("signal record lock").clone()
    }
}

impl ProcessSignaller for RecordingSignaller {
    fn process_group(&self, _pid: Pid) -> nix::Result<Pid> {
        self.group
    }

    fn signal(&self, target: Pid, signal: Signal) -> nix::Result<()> {
        self.sent.lock().expect("signal record lock").push((target, signal));
        match self.fail_with {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }
}
