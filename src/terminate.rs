//! Process-tree termination
//!
//! Kills the whole process group of a pty child so that anything it forked
//! (a shell's jobs, for instance) goes down with it.

use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};

use crate::error::{Error, Result};
use crate::pty::ExitStatus;

/// Process-group lookup and signal delivery
pub trait ProcessSignaller: Send + Sync {
    fn process_group(&self, pid: Pid) -> nix::Result<Pid>;
    /// Send `signal` to `target`; a negative target addresses a process group
    fn signal(&self, target: Pid, signal: Signal) -> nix::Result<()>;
}

/// Signals real processes via `getpgid(2)` and `kill(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSignaller;

impl ProcessSignaller for SystemSignaller {
    fn process_group(&self, pid: Pid) -> nix::Result<Pid> {
        unistd::getpgid(Some(pid))
    }

    fn signal(&self, target: Pid, signal: Signal) -> nix::Result<()> {
        signal::kill(target, signal)
    }
}

/// What `terminate_tree` ended up signalling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The whole group with this id
    Group(Pid),
    /// Only the process itself; its group could not be resolved
    Process(Pid),
    /// Nothing was signalled: the child had already been reaped
    Reaped(ExitStatus),
}

/// SIGKILL the process group of `pid`, or `pid` alone if the group is unknown
///
/// Never retries. The error carries the target that failed.
pub fn terminate_tree(signaller: &dyn ProcessSignaller, pid: Pid) -> Result<Termination> {
    let (target, termination) = match signaller.process_group(pid) {
        Ok(pgid) => (Pid::from_raw(-pgid.as_raw()), Termination::Group(pgid)),
        Err(errno) => {
            tracing::debug!(pid = pid.as_raw(), %errno, "process group not resolvable, killing process only");
            (pid, Termination::Process(pid))
        },
    };

    signaller
        .signal(target, Signal::SIGKILL)
        .map_err(|source| Error::SignalDeliveryFailed { target, source })?;

    tracing::debug!(pid = pid.as_raw(), target = target.as_raw(), "sent SIGKILL");
    Ok(termination)
}
