//! `OverlayFS` configuration for copy-on-write container roots.
//!
//! The image tree is the read-only lower layer; every write lands in the
//! container's private upper layer.

use std::path::PathBuf;

use pocker_common::error::{PockerError, Result};

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers (bottom to top).
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Builds a configuration, rejecting paths the option string cannot carry.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error when there is no lower layer or a path
    /// contains `,` or `:`, which would split the mount options.
    pub fn new(
        lower_dirs: Vec<PathBuf>,
        upper_dir: PathBuf,
        work_dir: PathBuf,
        merged_dir: PathBuf,
    ) -> Result<Self> {
        if lower_dirs.is_empty() {
            return Err(PockerError::Config {
                message: "overlay needs at least one lower layer".into(),
            });
        }
        for path in lower_dirs
            .iter()
            .chain([&upper_dir, &work_dir, &merged_dir])
        {
            if path.to_string_lossy().contains([',', ':']) {
                return Err(PockerError::Config {
                    message: format!(
                        "overlay path must not contain ',' or ':': {}",
                        path.display()
                    ),
                });
            }
        }
        Ok(Self {
            lower_dirs,
            upper_dir,
            work_dir,
            merged_dir,
        })
    }

    /// Returns the `mount(2)` data string.
    ///
    /// The kernel wants the topmost lower layer first, so the bottom-to-top
    /// list is reversed.
    #[must_use]
    pub fn options(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .rev()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}
