//! The container's init: runs in the cloned child until `exec`.
//!
//! Nothing here logs or returns to the caller. Failures are written to the
//! status pipe as `(step, errno)` and the child exits.

#![allow(unsafe_code)]

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::RawFd;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::unistd::execvp;
use pocker_common::constants::SETUP_FAILURE_EXIT_CODE;
use pocker_common::types::SetupStep;

use super::protocol::{ChildReport, RELEASE_BYTE, write_record};
use super::uts;
use crate::filesystem::errno_of;
use crate::filesystem::mount::{self, PseudoMounts};
use crate::filesystem::pivot_root;

/// Everything the child needs, prepared by the parent before `clone`.
pub(super) struct InitContext {
    /// Read end of the release pipe.
    pub release: File,
    /// Write end of the status pipe.
    pub status: File,
    /// Parent's ends of both pipes, inherited by `clone` and closed first.
    pub parent_fds: [RawFd; 2],
    pub merged_root: PathBuf,
    pub put_old: PathBuf,
    pub pseudo: Option<PseudoMounts>,
    pub hostname: Option<String>,
    pub program: CString,
    pub argv: Vec<CString>,
}

/// Entry point of the cloned child. The return value is its exit status.
pub(super) fn run(ctx: &mut InitContext) -> isize {
    for fd in ctx.parent_fds {
        // SAFETY: these descriptors belong to the parent's copies of the
        // pipes; nothing in this process uses or closes them afterwards.
        let _ = unsafe { libc::close(fd) };
    }

    let Err((step, errno)) = setup(ctx);
    let _ = write_record(
        &mut ctx.status,
        ChildReport::Failed {
            step,
            errno: errno as i32,
        },
    );
    isize::try_from(SETUP_FAILURE_EXIT_CODE).unwrap_or(1)
}

fn setup(ctx: &mut InitContext) -> Result<Infallible, (SetupStep, Errno)> {
    await_release(&mut ctx.release).map_err(|e| (SetupStep::AwaitRelease, e))?;

    mount::make_private().map_err(|e| (SetupStep::MakePrivate, e))?;
    mount::bind_self(&ctx.merged_root).map_err(|e| (SetupStep::PivotRoot, e))?;
    if let Some(pseudo) = &ctx.pseudo {
        pseudo.apply().map_err(|e| (SetupStep::MountPseudoFs, e))?;
    }
    pivot_root::pivot_into(&ctx.merged_root, &ctx.put_old)
        .map_err(|e| (SetupStep::PivotRoot, e))?;
    write_record(&mut ctx.status, ChildReport::Rooted)
        .map_err(|e| (SetupStep::PivotRoot, errno_of(&e)))?;

    if let Some(hostname) = &ctx.hostname {
        uts::set_hostname(hostname).map_err(|e| (SetupStep::SetHostname, e))?;
    }

    execvp(&ctx.program, &ctx.argv).map_err(|e| (SetupStep::Exec, e))
}

fn await_release(release: &mut File) -> nix::Result<()> {
    let mut byte = [0u8; 1];
    loop {
        match release.read(&mut byte) {
            Ok(1) if byte[0] == RELEASE_BYTE => return Ok(()),
            Ok(_) => return Err(Errno::EPIPE),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(errno_of(&e)),
        }
    }
}
