//! Linux namespace management for container isolation.
//!
//! A container's process is created by a single `clone(2)` into fresh
//! namespaces. Its init then switches into the container's root and execs
//! the user command, reporting progress over [`protocol`].

#[cfg(target_os = "linux")]
mod init;
pub mod protocol;
pub mod spawn;
pub mod uts;

use std::fmt;

use nix::sys::signal::Signal;

pub use spawn::{PendingChild, RunningChild, SpawnRequest, spawn};

/// Where a spawned child is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnState {
    /// Cloned and waiting for the release byte.
    Created,
    /// Inside its new root, not yet exec'd.
    Rooted,
    /// The user command is running.
    Running,
    /// The user command has exited and been reaped.
    Exited,
    /// Setup failed or the child was aborted; it has been reaped.
    Failed,
}

impl fmt::Display for SpawnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Rooted => "rooted",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with a code.
    Code(i32),
    /// Killed by a signal.
    Signaled(Signal),
}

impl ExitStatus {
    /// Shell-style exit code: the code itself, or `128 + signal`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Signaled(signal) => 128 + signal as i32,
        }
    }

    /// Returns `true` for exit code zero.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signaled(signal) => write!(f, "killed by {signal}"),
        }
    }
}

/// Translates the requested namespaces into `clone(2)` flags.
///
/// The mount namespace is always included.
#[cfg(target_os = "linux")]
#[must_use]
pub fn clone_flags(namespaces: &pocker_common::types::NamespaceConfig) -> nix::sched::CloneFlags {
    use nix::sched::CloneFlags;

    let mut flags = CloneFlags::CLONE_NEWNS;
    if namespaces.uts {
        flags |= CloneFlags::CLONE_NEWUTS;
    }
    if namespaces.pid {
        flags |= CloneFlags::CLONE_NEWPID;
    }
    if namespaces.network {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    flags
}
