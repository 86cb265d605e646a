//! Unix PTY implementation
//!
//! Implements PTY creation and child process management using POSIX APIs.
//! The child runs in a new session with the slave as its controlling
//! terminal, so its process group id equals its pid.

use std::ffi::{c_char, CString};
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::ptr;

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
use nix::libc;
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};
use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, close, dup2, fork, setsid, ForkResult, Pid};

use super::{ChildProcess, ExitStatus, MasterPty, PtyError, PtyResult, PtySystem, SpawnedPty};
use crate::command::CommandSpec;
use crate::size::WindowSize;

/// Exit code of a child whose exec setup failed
const EXEC_FAILED: libc::c_int = 127;

/// POSIX pty backend
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixPtySystem;

impl PtySystem for UnixPtySystem {
    fn spawn(&self, command: &CommandSpec, size: WindowSize) -> PtyResult<SpawnedPty> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(PtyError::OpenMaster)?;
        grantpt(&master).map_err(PtyError::GrantPty)?;
        unlockpt(&master).map_err(PtyError::UnlockPty)?;
        let slave_name = slave_name(&master)?;

        // SAFETY: into_raw_fd hands over sole ownership of the master fd
        let file = unsafe { File::from_raw_fd(master.into_raw_fd()) };
        set_cloexec(file.as_raw_fd()).map_err(PtyError::Io)?;
        set_window_size(file.as_raw_fd(), size)?;

        // Everything the child touches is allocated before fork
        let exec = ExecArgs::new(command, &slave_name)?;
        let (status_read, status_write) = cloexec_pipe()?;

        // SAFETY: the child only makes async-signal-safe libc calls before exec
        match unsafe { fork() }.map_err(PtyError::Fork)? {
            ForkResult::Child => unsafe { exec.exec_child(status_write.as_raw_fd()) },
            ForkResult::Parent { child } => {
                drop(status_write);

                match read_exec_status(status_read) {
                    Ok(None) => {},
                    Ok(Some(errno)) => {
                        let _ = reap(child);
                        return Err(PtyError::Exec {
                            program: command.program.display().to_string(),
                            source: io::Error::from_raw_os_error(errno),
                        });
                    },
                    Err(e) => {
                        // Exec outcome unknown; the child may be running
                        let _ = signal::kill(child, Signal::SIGKILL);
                        let _ = reap(child);
                        return Err(PtyError::Io(e));
                    },
                }

                tracing::debug!(
                    pid = child.as_raw(),
                    program = %command.program.display(),
                    cols = size.cols,
                    rows = size.rows,
                    "spawned child on {}",
                    slave_name
                );

                Ok(SpawnedPty {
                    master: Box::new(UnixMaster { file }),
                    child: Box::new(UnixChild {
                        pid: child,
                        status: None,
                    }),
                })
            },
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn slave_name(master: &PtyMaster) -> PtyResult<String> {
    nix::pty::ptsname_r(master).map_err(PtyError::PtsName)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn slave_name(master: &PtyMaster) -> PtyResult<String> {
    // SAFETY: ptsname is not thread-safe, but the result is copied out
    // immediately after unlockpt
    unsafe { nix::pty::ptsname(master) }.map_err(PtyError::PtsName)
}

/// Argument, environment and path buffers for the forked child
struct ExecArgs {
    program: CString,
    slave: CString,
    cwd: Option<CString>,
    _argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    _envp: Vec<CString>,
    envp_ptrs: Option<Vec<*const c_char>>,
}

impl ExecArgs {
    fn new(command: &CommandSpec, slave_name: &str) -> PtyResult<Self> {
        let program = cstring(command.program.as_os_str().as_bytes())?;
        let slave = cstring(slave_name.as_bytes())?;
        let cwd = command
            .cwd
            .as_ref()
            .map(|dir| cstring(dir.as_os_str().as_bytes()))
            .transpose()?;

        let argv = command
            .argv()
            .map(|arg| cstring(arg.as_bytes()))
            .collect::<PtyResult<Vec<_>>>()?;
        let argv_ptrs = null_terminated(&argv);

        let envp = command
            .env
            .iter()
            .map(|var| cstring(var.as_bytes()))
            .collect::<PtyResult<Vec<_>>>()?;
        let envp_ptrs = (!envp.is_empty()).then(|| null_terminated(&envp));

        Ok(Self {
            program,
            slave,
            cwd,
            _argv: argv,
            argv_ptrs,
            _envp: envp,
            envp_ptrs,
        })
    }

    /// Runs in the forked child: attach to the slave and exec
    ///
    /// On any failure the errno is written to `status_fd` and the child exits.
    unsafe fn exec_child(&self, status_fd: RawFd) -> ! {
        if let Err(errno) = self.attach_to_slave() {
            report_and_exit(status_fd, errno);
        }

        match &self.envp_ptrs {
            Some(envp) => libc::execve(self.program.as_ptr(), self.argv_ptrs.as_ptr(), envp.as_ptr()),
            None => libc::execv(self.program.as_ptr(), self.argv_ptrs.as_ptr()),
        };
        report_and_exit(status_fd, Errno::last())
    }

    /// New session with the slave as controlling terminal and stdio
    fn attach_to_slave(&self) -> nix::Result<()> {
        // Rust ignores SIGPIPE; exec would carry that into the child
        // SAFETY: restoring the default disposition installs no handler
        unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) }?;
        signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)?;

        setsid()?;

        // First tty opened by a session leader becomes its controlling terminal
        let slave = open(self.slave.as_c_str(), OFlag::O_RDWR, Mode::empty())?;
        // Needed on BSD-derived systems; harmless where already set
        // SAFETY: TIOCSCTTY takes an integer argument, not a pointer
        unsafe { libc::ioctl(slave, libc::TIOCSCTTY as _, 0) };

        for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            dup2(slave, fd)?;
        }
        if slave > libc::STDERR_FILENO {
            close(slave)?;
        }

        if let Some(cwd) = &self.cwd {
            chdir(cwd.as_c_str())?;
        }
        Ok(())
    }
}

unsafe fn report_and_exit(status_fd: RawFd, errno: Errno) -> ! {
    let errno = (errno as i32).to_ne_bytes();
    libc::write(status_fd, errno.as_ptr().cast(), errno.len());
    libc::_exit(EXEC_FAILED)
}

/// Blocking wait that retries on EINTR
fn reap(pid: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

fn cstring(bytes: &[u8]) -> PtyResult<CString> {
    CString::new(bytes).map_err(|_| PtyError::InvalidArgument(String::from_utf8_lossy(bytes).into_owned()))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

/// Pipe whose write end closes on exec, signalling success by EOF
#[cfg(any(target_os = "linux", target_os = "android"))]
fn cloexec_pipe() -> io::Result<(File, File)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    // SAFETY: fds has room for the two descriptors pipe2 writes
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned here
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn cloexec_pipe() -> io::Result<(File, File)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    // SAFETY: fds has room for the two descriptors pipe writes
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: both descriptors were just created and are owned here
    let pipe = unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) };
    set_cloexec(pipe.0.as_raw_fd())?;
    set_cloexec(pipe.1.as_raw_fd())?;
    Ok(pipe)
}

/// Blocks until the child execs (EOF) or reports an errno
fn read_exec_status(mut pipe: File) -> io::Result<Option<i32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match pipe.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    match filled {
        0 => Ok(None),
        4 => Ok(Some(i32::from_ne_bytes(buf))),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short read on exec status pipe",
        )),
    }
}

/// Set the window size on a PTY file descriptor
fn set_window_size(fd: RawFd, size: WindowSize) -> PtyResult<()> {
    let winsize = size.to_winsize();

    // SAFETY: TIOCSWINSZ is a valid ioctl for setting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ as _, &winsize) };

    if result < 0 {
        Err(PtyError::SetWinsize(Errno::last()))
    } else {
        Ok(())
    }
}

/// Get the window size from a PTY file descriptor
fn get_window_size(fd: RawFd) -> PtyResult<WindowSize> {
    let mut winsize = WindowSize::new(0, 0).to_winsize();

    // SAFETY: TIOCGWINSZ is a valid ioctl for getting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ as _, &mut winsize) };

    if result < 0 {
        Err(PtyError::GetWinsize(Errno::last()))
    } else {
        Ok(WindowSize::from(winsize))
    }
}

struct UnixMaster {
    file: File,
}

impl MasterPty for UnixMaster {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(MasterReader(self.file.try_clone()?)))
    }

    fn writer(&self) -> io::Result<Box<dyn io::Write + Send>> {
        Ok(Box::new(self.file.try_clone()?))
    }

    fn resize(&self, size: WindowSize) -> PtyResult<()> {
        set_window_size(self.file.as_raw_fd(), size)
    }

    fn window_size(&self) -> PtyResult<WindowSize> {
        get_window_size(self.file.as_raw_fd())
    }
}

/// Master read handle that reports a hung-up slave as end of stream
struct MasterReader(File);

impl Read for MasterReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf) {
            // Linux returns EIO once every slave fd is closed
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(0),
            other => other,
        }
    }
}

struct UnixChild {
    pid: Pid,
    status: Option<ExitStatus>,
}

impl UnixChild {
    fn record(&mut self, status: WaitStatus) -> Option<ExitStatus> {
        let exit = match status {
            WaitStatus::Exited(_, code) => ExitStatus::Exited(code),
            WaitStatus::Signaled(_, signal, _) => ExitStatus::Signaled(signal as i32),
            _ => return None,
        };
        tracing::trace!(pid = self.pid.as_raw(), ?exit, "child reaped");
        self.status = Some(exit);
        Some(exit)
    }
}

impl ChildProcess for UnixChild {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn try_wait(&mut self) -> PtyResult<Option<ExitStatus>> {
        if self.status.is_some() {
            return Ok(self.status);
        }
        let status = waitpid(self.pid, Some(WaitPidFlag::WNOHANG)).map_err(PtyError::Wait)?;
        Ok(self.record(status))
    }

    fn wait(&mut self) -> PtyResult<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        loop {
            let status = reap(self.pid).map_err(PtyError::Wait)?;
            if let Some(exit) = self.record(status) {
                return Ok(exit);
            }
        }
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }
}

impl Drop for UnixChild {
    fn drop(&mut self) {
        // Try to reap the child process
        if self.status.is_none() {
            let _ = waitpid(self.pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}
