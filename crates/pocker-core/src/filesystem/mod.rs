//! Filesystem management for container isolation.
//!
//! Provides the copy-on-write root filesystem builder, and the mount and
//! `pivot_root` steps the container's init runs inside its own mount
//! namespace.

#[cfg(target_os = "linux")]
pub mod mount;
pub mod overlayfs;
#[cfg(target_os = "linux")]
pub mod pivot_root;
pub mod rootfs;

pub use rootfs::{ContainerLayout, RootfsBuilder};

/// Converts an I/O error into the errno reported over the status pipe.
#[cfg(target_os = "linux")]
pub(crate) fn errno_of(err: &std::io::Error) -> nix::errno::Errno {
    nix::errno::Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}
