//! Root switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, the old root stops being reachable once it is detached,
//! so nothing of the host tree remains visible to the container.

use std::path::Path;

use nix::errno::Errno;
use nix::mount::{MntFlags, umount2};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, mkdir, pivot_root};

use super::errno_of;

/// Name of the directory the old root is parked in during the switch.
pub const OLD_ROOT_DIR: &str = ".pocker-old-root";

/// Absolute path of the parked old root once the switch has happened.
const OLD_ROOT_AFTER_PIVOT: &str = "/.pocker-old-root";

/// Makes `new_root` the root of the calling mount namespace.
///
/// `put_old` must be `new_root/OLD_ROOT_DIR`. The old root is lazily
/// detached and its directory removed.
///
/// # Errors
///
/// Returns the errno of the first failing call.
pub fn pivot_into(new_root: &Path, put_old: &Path) -> nix::Result<()> {
    match mkdir(put_old, Mode::from_bits_truncate(0o700)) {
        Ok(()) | Err(Errno::EEXIST) => {}
        Err(e) => return Err(e),
    }
    pivot_root(new_root, put_old)?;
    chdir("/")?;
    umount2(OLD_ROOT_AFTER_PIVOT, MntFlags::MNT_DETACH)?;
    std::fs::remove_dir(OLD_ROOT_AFTER_PIVOT).map_err(|e| errno_of(&e))
}
