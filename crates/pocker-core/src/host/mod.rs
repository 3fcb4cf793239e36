//! Handles to privileged host state.
//!
//! The mount table and the cgroup filesystem are shared by every process on
//! the host. The root filesystem builder and the cgroup controller never
//! touch them directly; they go through these traits so that tests can
//! substitute the fakes in [`fake`].

pub mod mountinfo;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use std::io;
use std::path::{Path, PathBuf};

use crate::filesystem::overlayfs::OverlayConfig;

/// Access to the host mount table.
pub trait MountTable: Send + Sync {
    /// Mounts an overlay filesystem on `config.merged_dir`.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by `mount(2)`.
    fn mount_overlay(&self, config: &OverlayConfig) -> io::Result<()>;

    /// Unmounts `target`. A `lazy` unmount detaches it even while busy.
    ///
    /// # Errors
    ///
    /// Returns the OS error reported by `umount2(2)`; `EINVAL` means the
    /// target is not a mount point.
    fn unmount(&self, target: &Path, lazy: bool) -> io::Result<()>;

    /// Lists every mount point currently visible to this process.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    fn mount_points(&self) -> io::Result<Vec<PathBuf>>;
}

/// Access to the cgroup filesystem.
pub trait CgroupFs: Send + Sync {
    /// Creates a group directory and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns the OS error from `mkdir(2)`.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Writes a value into a control file.
    ///
    /// # Errors
    ///
    /// Returns the OS error from the write; the kernel rejects invalid
    /// values with `EINVAL`.
    fn write(&self, path: &Path, value: &str) -> io::Result<()>;

    /// Reads a control file.
    ///
    /// # Errors
    ///
    /// Returns the OS error from the read.
    fn read(&self, path: &Path) -> io::Result<String>;

    /// Removes an empty group directory. Never recursive.
    ///
    /// # Errors
    ///
    /// Returns `EBUSY` while processes are still attached.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Lists the names of the child groups of `path`.
    ///
    /// # Errors
    ///
    /// Returns the OS error from reading the directory.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    /// Returns whether `path` exists.
    fn exists(&self, path: &Path) -> bool;
}

/// The real mount table of the calling process.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostMountTable;

#[cfg(target_os = "linux")]
impl MountTable for HostMountTable {
    fn mount_overlay(&self, config: &OverlayConfig) -> io::Result<()> {
        use nix::mount::{MsFlags, mount};

        let options = config.options();
        mount(
            Some("overlay"),
            &config.merged_dir,
            Some("overlay"),
            MsFlags::MS_NODEV,
            Some(options.as_str()),
        )?;
        Ok(())
    }

    fn unmount(&self, target: &Path, lazy: bool) -> io::Result<()> {
        use nix::mount::{MntFlags, umount2};

        let flags = if lazy {
            MntFlags::MNT_DETACH
        } else {
            MntFlags::empty()
        };
        umount2(target, flags)?;
        Ok(())
    }

    fn mount_points(&self) -> io::Result<Vec<PathBuf>> {
        let content = std::fs::read_to_string(mountinfo::SELF_MOUNTINFO)?;
        Ok(mountinfo::parse_mount_points(&content))
    }
}

#[cfg(not(target_os = "linux"))]
impl MountTable for HostMountTable {
    fn mount_overlay(&self, _config: &OverlayConfig) -> io::Result<()> {
        Err(linux_required())
    }

    fn unmount(&self, _target: &Path, _lazy: bool) -> io::Result<()> {
        Err(linux_required())
    }

    fn mount_points(&self) -> io::Result<Vec<PathBuf>> {
        Err(linux_required())
    }
}

#[cfg(not(target_os = "linux"))]
fn linux_required() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "Linux required for native container operations",
    )
}

/// The real cgroup filesystem, addressed by absolute paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostCgroupFs;

impl CgroupFs for HostCgroupFs {
    fn create_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn write(&self, path: &Path, value: &str) -> io::Result<()> {
        std::fs::write(path, value)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        list_subdirectories(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Returns the names of the subdirectories of `path`, sorted.
pub(crate) fn list_subdirectories(path: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Returns `true` for errors meaning "nothing is mounted there".
pub(crate) fn is_not_mounted(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINVAL | libc::ENOENT))
}

/// Returns `true` for `EBUSY`.
pub(crate) fn is_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EBUSY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_cgroup_fs_lists_only_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("b")).expect("mkdir");
        std::fs::create_dir(dir.path().join("a")).expect("mkdir");
        std::fs::write(dir.path().join("cgroup.procs"), "").expect("write");

        let names = HostCgroupFs.list_dir(dir.path()).expect("list");
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn host_cgroup_fs_remove_dir_is_not_recursive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let group = dir.path().join("group");
        HostCgroupFs.create_dir(&group).expect("create");
        HostCgroupFs.write(&group.join("memory.max"), "1024").expect("write");

        assert!(HostCgroupFs.remove_dir(&group).is_err());
        assert_eq!(
            HostCgroupFs.read(&group.join("memory.max")).expect("read"),
            "1024"
        );
    }

    #[test]
    fn error_classification() {
        assert!(is_not_mounted(&io::Error::from_raw_os_error(libc::EINVAL)));
        assert!(is_not_mounted(&io::Error::from_raw_os_error(libc::ENOENT)));
        assert!(!is_not_mounted(&io::Error::from_raw_os_error(libc::EBUSY)));
        assert!(is_busy(&io::Error::from_raw_os_error(libc::EBUSY)));
    }
}
