//! In-memory host handles for tests.
//!
//! [`FakeMountTable`] keeps the mount table in memory and [`FakeCgroupFs`]
//! stores groups in an ordinary directory tree. Both can be told to fail the
//! way the kernel does.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{CgroupFs, MountTable, list_subdirectories};
use crate::filesystem::overlayfs::OverlayConfig;

#[derive(Debug, Default)]
struct MountState {
    mounted: Vec<PathBuf>,
    mount_errno: Option<i32>,
    unmount_errno: Option<i32>,
    busy_unmounts: u32,
    unmount_calls: Vec<(PathBuf, bool)>,
    overlay_options: Vec<String>,
}

/// A mount table that only records mounts.
#[derive(Debug, Default)]
pub struct FakeMountTable {
    state: Mutex<MountState>,
}

impl FakeMountTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MountState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every following overlay mount fail with `errno`.
    pub fn fail_mounts_with(&self, errno: i32) {
        self.state().mount_errno = Some(errno);
    }

    /// Makes every following non-`EBUSY` unmount fail with `errno`.
    pub fn fail_unmounts_with(&self, errno: i32) {
        self.state().unmount_errno = Some(errno);
    }

    /// Makes the next `attempts` eager unmounts fail with `EBUSY`.
    pub fn busy_for(&self, attempts: u32) {
        self.state().busy_unmounts = attempts;
    }

    /// Records an existing mount, as if left behind by an earlier run.
    pub fn insert(&self, target: impl Into<PathBuf>) {
        self.state().mounted.push(target.into());
    }

    /// Returns whether `target` is currently mounted.
    #[must_use]
    pub fn is_mounted(&self, target: &Path) -> bool {
        self.state().mounted.iter().any(|m| m == target)
    }

    /// Returns every `(target, lazy)` unmount call made so far.
    #[must_use]
    pub fn unmount_calls(&self) -> Vec<(PathBuf, bool)> {
        self.state().unmount_calls.clone()
    }

    /// Returns the option strings of every overlay mounted so far.
    #[must_use]
    pub fn overlay_options(&self) -> Vec<String> {
        self.state().overlay_options.clone()
    }
}

impl MountTable for FakeMountTable {
    fn mount_overlay(&self, config: &OverlayConfig) -> io::Result<()> {
        let mut state = self.state();
        if let Some(errno) = state.mount_errno {
            return Err(io::Error::from_raw_os_error(errno));
        }
        state.overlay_options.push(config.options());
        state.mounted.push(config.merged_dir.clone());
        Ok(())
    }

    fn unmount(&self, target: &Path, lazy: bool) -> io::Result<()> {
        let mut state = self.state();
        state.unmount_calls.push((target.to_path_buf(), lazy));
        if !lazy && state.busy_unmounts > 0 {
            state.busy_unmounts -= 1;
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        if let Some(errno) = state.unmount_errno {
            return Err(io::Error::from_raw_os_error(errno));
        }
        // Stacked mounts come off top first.
        match state.mounted.iter().rposition(|m| m == target) {
            Some(index) => {
                let _ = state.mounted.remove(index);
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }

    fn mount_points(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self.state().mounted.clone())
    }
}

/// A cgroup filesystem backed by a plain directory tree.
///
/// Control files are ordinary files, so removal is emulated: a group whose
/// `cgroup.procs` is non-empty refuses removal with `EBUSY`, otherwise the
/// whole directory goes, as the kernel does for its own control files.
#[derive(Debug, Default)]
pub struct FakeCgroupFs {
    rejected_files: Mutex<BTreeSet<String>>,
}

impl FakeCgroupFs {
    /// Creates a filesystem that accepts every write.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes writes to any control file called `file_name` fail with `EINVAL`.
    pub fn reject_writes_to(&self, file_name: &str) {
        let _ = self
            .rejected_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_name.to_owned());
    }

    fn is_rejected(&self, path: &Path) -> bool {
        let rejected = self
            .rejected_files
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        path.file_name()
            .is_some_and(|name| rejected.contains(name.to_string_lossy().as_ref()))
    }
}

impl CgroupFs for FakeCgroupFs {
    fn create_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn write(&self, path: &Path, value: &str) -> io::Result<()> {
        if self.is_rejected(path) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        if !path.parent().is_some_and(Path::is_dir) {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        std::fs::write(path, value)
    }

    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        if !path.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        let procs = std::fs::read_to_string(path.join("cgroup.procs")).unwrap_or_default();
        if !procs.trim().is_empty() {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        std::fs::remove_dir_all(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        list_subdirectories(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
