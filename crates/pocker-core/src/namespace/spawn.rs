//! Spawning the container process and the typed hand-off to `exec`.
//!
//! [`spawn`] returns a [`PendingChild`] parked before its first setup step.
//! The caller attaches it to cgroups and then consumes it with
//! [`PendingChild::release`], which yields a [`RunningChild`] only once the
//! user command has replaced the child's image.

#![allow(unsafe_code)]

use std::fs::File;
use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use pocker_common::error::{PockerError, Result};
use pocker_common::types::NamespaceConfig;

use super::{ExitStatus, SpawnState};

/// What to run and how to isolate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Prepared overlay mount the child will be rooted in.
    pub merged_root: PathBuf,
    /// Program and arguments; the program is looked up on the container's `PATH`.
    pub command: Vec<String>,
    /// Namespaces to create.
    pub namespaces: NamespaceConfig,
    /// Hostname to set when a UTS namespace is created.
    pub hostname: String,
    /// Whether to mount `/proc`, `/sys`, and `/dev` in the new root.
    pub mount_pseudo_filesystems: bool,
}

/// A cloned child waiting for [`PendingChild::release`].
///
/// Dropping it without releasing or aborting kills and reaps the child.
#[derive(Debug)]
#[must_use = "a pending child must be released or aborted"]
pub struct PendingChild {
    pid: Pid,
    release: File,
    status: File,
    state: SpawnState,
}

/// A child that has exec'd the user command.
#[derive(Debug)]
#[must_use = "a running child must be waited for"]
pub struct RunningChild {
    pid: Pid,
    state: SpawnState,
    status: Option<ExitStatus>,
}

impl PendingChild {
    /// Host pid of the child.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SpawnState {
        self.state
    }

    /// Lets the child run its setup and waits until it has exec'd.
    ///
    /// # Errors
    ///
    /// Returns `SetupFailed` with the failing step and errno if the child
    /// reports a failure, and `Process` if it vanishes without reporting or
    /// the pipes break. In both cases the child has been reaped.
    pub fn release(mut self) -> Result<RunningChild> {
        use std::io::Write;

        if let Err(e) = self.release.write_all(&[super::protocol::RELEASE_BYTE]) {
            self.terminate();
            return Err(PockerError::Process {
                operation: "release child",
                source: e,
            });
        }

        loop {
            match super::protocol::read_record(&mut self.status) {
                Ok(Some(super::protocol::ChildReport::Rooted)) => {
                    self.state = SpawnState::Rooted;
                    tracing::debug!(pid = self.pid.as_raw(), "child switched root");
                }
                Ok(Some(super::protocol::ChildReport::Failed { step, errno })) => {
                    let _ = self.reap();
                    return Err(PockerError::SetupFailed {
                        step,
                        source: io::Error::from_raw_os_error(errno),
                    });
                }
                Ok(None) if self.state == SpawnState::Rooted => {
                    self.state = SpawnState::Running;
                    tracing::debug!(pid = self.pid.as_raw(), "child exec'd");
                    return Ok(RunningChild::new(self.pid));
                }
                Ok(None) => {
                    let status = self.reap();
                    return Err(PockerError::Process {
                        operation: "container setup",
                        source: io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("child ended without reporting ({status:?})"),
                        ),
                    });
                }
                Err(e) => {
                    self.terminate();
                    return Err(PockerError::Process {
                        operation: "read child status",
                        source: e,
                    });
                }
            }
        }
    }

    /// Kills and reaps the child before it runs anything.
    pub fn abort(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if let Err(e) = kill(self.pid, Signal::SIGKILL) {
            tracing::warn!(pid = self.pid.as_raw(), error = %e, "failed to kill child");
        }
        let _ = self.reap();
    }

    fn reap(&mut self) -> Result<ExitStatus> {
        self.state = SpawnState::Failed;
        wait_for(self.pid)
    }
}

impl Drop for PendingChild {
    fn drop(&mut self) {
        if matches!(self.state, SpawnState::Created | SpawnState::Rooted) {
            self.terminate();
        }
    }
}

impl RunningChild {
    const fn new(pid: Pid) -> Self {
        Self {
            pid,
            state: SpawnState::Running,
            status: None,
        }
    }

    /// Host pid of the user command.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// `Running` until reaped, then `Exited`.
    #[must_use]
    pub const fn state(&self) -> SpawnState {
        self.state
    }

    /// Blocks until the user command exits and reaps it.
    ///
    /// # Errors
    ///
    /// Returns `Process` if waiting fails for a reason other than `EINTR`.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.wait_then_reap(|| {})
    }

    /// Blocks until the user command exits, calls `before_reap` while the
    /// pid still names the zombie, then reaps it.
    ///
    /// Anything that may signal the pid from another thread must stop
    /// doing so in `before_reap`; once reaped the pid can be reused.
    /// Waiting again returns the recorded status.
    ///
    /// # Errors
    ///
    /// Returns `Process` if waiting fails for a reason other than `EINTR`.
    pub fn wait_then_reap(&mut self, before_reap: impl FnOnce()) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        await_exit(self.pid)?;
        before_reap();
        let status = wait_for(self.pid)?;
        self.state = SpawnState::Exited;
        self.status = Some(status);
        tracing::debug!(pid = self.pid.as_raw(), %status, "child reaped");
        Ok(status)
    }
}

/// Waits for `pid` to exit without reaping it.
#[cfg(target_os = "linux")]
fn await_exit(pid: Pid) -> Result<()> {
    use nix::sys::wait::{Id, WaitPidFlag, waitid};

    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(PockerError::Process {
                    operation: "waitid",
                    source: e.into(),
                });
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
#[allow(clippy::unnecessary_wraps)]
const fn await_exit(_pid: Pid) -> Result<()> {
    Ok(())
}

fn wait_for(pid: Pid) -> Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Code(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(ExitStatus::Signaled(signal)),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(PockerError::Process {
                    operation: "waitpid",
                    source: e.into(),
                });
            }
        }
    }
}

/// Stack size for the cloned child.
#[cfg(target_os = "linux")]
const CHILD_STACK_SIZE: usize = 4 * 1024 * 1024;

/// Clones a child into fresh namespaces, parked before its first setup step.
///
/// # Errors
///
/// Returns `Config` for an empty command, a command containing NUL bytes,
/// or an invalid hostname, and `Process` if the pipes or `clone(2)` fail.
#[cfg(target_os = "linux")]
pub fn spawn(request: SpawnRequest) -> Result<PendingChild> {
    use std::ffi::CString;
    use std::os::fd::AsRawFd;

    use nix::fcntl::OFlag;
    use nix::sched::clone;
    use nix::unistd::pipe2;

    use super::init::{self, InitContext};
    use crate::filesystem::mount::PseudoMounts;
    use crate::filesystem::pivot_root::OLD_ROOT_DIR;

    let argv = request
        .command
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| PockerError::Config {
            message: "command arguments must not contain NUL bytes".into(),
        })?;
    let Some(program) = argv.first().cloned() else {
        return Err(PockerError::Config {
            message: "command must not be empty".into(),
        });
    };
    if request.namespaces.uts {
        super::uts::validate_hostname(&request.hostname)?;
    }

    let (release_read, release_write) = pipe2(OFlag::O_CLOEXEC).map_err(pipe_error)?;
    let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC).map_err(pipe_error)?;

    let mut context = InitContext {
        release: File::from(release_read),
        status: File::from(status_write),
        parent_fds: [release_write.as_raw_fd(), status_read.as_raw_fd()],
        put_old: request.merged_root.join(OLD_ROOT_DIR),
        pseudo: request
            .mount_pseudo_filesystems
            .then(|| PseudoMounts::under(&request.merged_root)),
        hostname: request.namespaces.uts.then(|| request.hostname.clone()),
        merged_root: request.merged_root.clone(),
        program,
        argv,
    };

    let flags = super::clone_flags(&request.namespaces);
    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let callback = Box::new(move || init::run(&mut context));
    // SAFETY: the child gets its own copy of the address space (no
    // CLONE_VM), runs only the init routine on the fresh stack, and leaves
    // through exec or by returning its exit status.
    let pid = unsafe { clone(callback, &mut stack, flags, Some(Signal::SIGCHLD as i32)) }
        .map_err(|e| PockerError::Process {
            operation: "clone",
            source: e.into(),
        })?;

    tracing::info!(
        pid = pid.as_raw(),
        root = %request.merged_root.display(),
        flags = ?flags,
        "container process cloned"
    );
    Ok(PendingChild {
        pid,
        release: File::from(release_write),
        status: File::from(status_read),
        state: SpawnState::Created,
    })
}

#[cfg(target_os = "linux")]
fn pipe_error(e: Errno) -> PockerError {
    PockerError::Process {
        operation: "pipe",
        source: e.into(),
    }
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error, namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn spawn(_request: SpawnRequest) -> Result<PendingChild> {
    Err(PockerError::Config {
        message: "Linux required for native container operations".into(),
    })
}
