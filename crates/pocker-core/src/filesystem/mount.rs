//! Mounts performed by the container's init inside its mount namespace.
//!
//! These run in the cloned child before `exec`, so they report bare
//! [`Errno`] values and never log. Every path is computed up front by the
//! parent.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::{MsFlags, mount};
use nix::sys::stat::{Mode, SFlag, makedev, mknod, umask};
use nix::unistd::mkdir;

use super::errno_of;

/// Character devices created in the container's `/dev`: name, major, minor.
const DEVICES: [(&str, u64, u64); 7] = [
    ("null", 1, 3),
    ("zero", 1, 5),
    ("full", 1, 7),
    ("random", 1, 8),
    ("urandom", 1, 9),
    ("tty", 5, 0),
    ("console", 5, 1),
];

/// Symlinks created in the container's `/dev`: name, target.
const DEV_LINKS: [(&str, &str); 5] = [
    ("fd", "/proc/self/fd"),
    ("stdin", "/proc/self/fd/0"),
    ("stdout", "/proc/self/fd/1"),
    ("stderr", "/proc/self/fd/2"),
    ("ptmx", "pts/ptmx"),
];

/// Stops mount events from propagating back to the host.
///
/// Must run before any other mount in the new namespace.
///
/// # Errors
///
/// Returns the errno from `mount(2)`.
pub fn make_private() -> nix::Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
}

/// Bind-mounts `root` onto itself so it is a mount point `pivot_root` accepts.
///
/// # Errors
///
/// Returns the errno from `mount(2)`.
pub fn bind_self(root: &Path) -> nix::Result<()> {
    mount(
        Some(root),
        root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
}

/// `/proc`, `/sys`, and a populated `/dev` below a new root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoMounts {
    proc_dir: PathBuf,
    sys_dir: PathBuf,
    dev_dir: PathBuf,
    pts_dir: PathBuf,
    nodes: Vec<(PathBuf, u64, u64)>,
    links: Vec<(PathBuf, &'static str)>,
}

impl PseudoMounts {
    /// Plans the pseudo filesystems for the tree at `root`.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        let dev_dir = root.join("dev");
        Self {
            proc_dir: root.join("proc"),
            sys_dir: root.join("sys"),
            pts_dir: dev_dir.join("pts"),
            nodes: DEVICES
                .iter()
                .map(|(name, major, minor)| (dev_dir.join(name), *major, *minor))
                .collect(),
            links: DEV_LINKS
                .iter()
                .map(|(name, target)| (dev_dir.join(name), *target))
                .collect(),
            dev_dir,
        }
    }

    /// Mounts `proc`, a read-only `sysfs`, a `tmpfs` `/dev` with device
    /// nodes and links, and a private `devpts` instance.
    ///
    /// # Errors
    ///
    /// Returns the errno of the first step that fails.
    pub fn apply(&self) -> nix::Result<()> {
        let hardened = MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC;

        ensure_dir(&self.proc_dir)?;
        mount(
            Some("proc"),
            &self.proc_dir,
            Some("proc"),
            hardened,
            None::<&str>,
        )?;

        ensure_dir(&self.sys_dir)?;
        mount(
            Some("sysfs"),
            &self.sys_dir,
            Some("sysfs"),
            hardened | MsFlags::MS_RDONLY,
            None::<&str>,
        )?;

        ensure_dir(&self.dev_dir)?;
        mount(
            Some("tmpfs"),
            &self.dev_dir,
            Some("tmpfs"),
            MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
            Some("mode=755"),
        )?;
        self.populate_dev()?;

        ensure_dir(&self.pts_dir)?;
        mount(
            Some("devpts"),
            &self.pts_dir,
            Some("devpts"),
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            Some("newinstance,ptmxmode=0666,mode=0620"),
        )
    }

    fn populate_dev(&self) -> nix::Result<()> {
        let previous = umask(Mode::empty());
        let created = self.nodes.iter().try_for_each(|(path, major, minor)| {
            mknod(
                path.as_path(),
                SFlag::S_IFCHR,
                Mode::from_bits_truncate(0o666),
                makedev(*major, *minor),
            )
        });
        let _ = umask(previous);
        created?;

        for (path, target) in &self.links {
            std::os::unix::fs::symlink(target, path).map_err(|e| errno_of(&e))?;
        }
        Ok(())
    }
}

fn ensure_dir(path: &Path) -> nix::Result<()> {
    match mkdir(path, Mode::from_bits_truncate(0o755)) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(e) => Err(e),
    }
}
