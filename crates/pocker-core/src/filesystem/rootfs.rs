//! Per-container copy-on-write root filesystems.
//!
//! Everything a container mounts or writes on the host lives under
//! `<containers>/<id>/`, so the id alone is enough to tear it down and a
//! prefix scan of the mount table is enough to find leftovers.

use std::cmp::Reverse;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pocker_common::constants;
use pocker_common::error::{PockerError, Result, TeardownWarning};
use pocker_common::types::{ContainerId, Image};

use super::overlayfs::OverlayConfig;
use crate::host::{self, MountTable};

/// On-disk layout of one container's writable layer and mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    /// Container the layout belongs to.
    pub id: ContainerId,
    /// `<containers>/<id>`.
    pub root: PathBuf,
    /// Writable overlay layer.
    pub upper: PathBuf,
    /// Overlay scratch directory.
    pub work: PathBuf,
    /// Merged mount point the container is rooted in.
    pub merged: PathBuf,
}

impl ContainerLayout {
    /// Computes the layout of `id` under `containers_dir`.
    #[must_use]
    pub fn new(containers_dir: &Path, id: &ContainerId) -> Self {
        let root = containers_dir.join(id.as_str());
        Self {
            id: id.clone(),
            upper: root.join(constants::UPPER_DIR),
            work: root.join(constants::WORK_DIR),
            merged: root.join(constants::MERGED_DIR),
            root,
        }
    }
}

/// Builds and removes overlay root filesystems.
pub struct RootfsBuilder {
    containers_dir: PathBuf,
    mounts: Arc<dyn MountTable>,
    unmount_retries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for RootfsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootfsBuilder")
            .field("containers_dir", &self.containers_dir)
            .field("unmount_retries", &self.unmount_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl RootfsBuilder {
    /// Creates a builder placing containers under `containers_dir`.
    #[must_use]
    pub fn new(containers_dir: impl Into<PathBuf>, mounts: Arc<dyn MountTable>) -> Self {
        Self {
            containers_dir: containers_dir.into(),
            mounts,
            unmount_retries: constants::DEFAULT_UNMOUNT_RETRIES,
            retry_delay: Duration::from_millis(constants::DEFAULT_RETRY_DELAY_MS),
        }
    }

    /// Sets how often a busy unmount is retried and the first retry delay.
    #[must_use]
    pub const fn with_retry_policy(mut self, retries: u32, delay: Duration) -> Self {
        self.unmount_retries = retries;
        self.retry_delay = delay;
        self
    }

    /// Returns the directory holding every container's layout.
    #[must_use]
    pub fn containers_dir(&self) -> &Path {
        &self.containers_dir
    }

    /// Returns the layout `id` has or would have.
    #[must_use]
    pub fn layout(&self, id: &ContainerId) -> ContainerLayout {
        ContainerLayout::new(&self.containers_dir, id)
    }

    /// Creates `upper`, `work`, and `merged` for `id` and mounts the overlay.
    ///
    /// Anything created by this call is removed again if it fails.
    ///
    /// # Errors
    ///
    /// Returns `ImageNotFound` if the image tree is missing, `Config` if the
    /// container directory already exists or a path cannot be expressed in
    /// overlay options, `Io` if a directory cannot be created, and
    /// `MountFailed` if the kernel rejects the mount.
    pub fn prepare(&self, image: &Image, id: &ContainerId) -> Result<ContainerLayout> {
        if !image.path.is_dir() {
            return Err(PockerError::ImageNotFound {
                name: image.name.clone(),
                hint: format!(" (no directory at {})", image.path.display()),
            });
        }

        let layout = self.layout(id);
        let overlay = OverlayConfig::new(
            vec![image.path.clone()],
            layout.upper.clone(),
            layout.work.clone(),
            layout.merged.clone(),
        )?;
        if layout.root.exists() {
            return Err(PockerError::Config {
                message: format!("container directory already exists: {}", layout.root.display()),
            });
        }

        for dir in [&layout.upper, &layout.work, &layout.merged] {
            if let Err(e) = std::fs::create_dir_all(dir) {
                self.discard(&layout);
                return Err(PockerError::Io {
                    path: dir.clone(),
                    source: e,
                });
            }
        }

        if let Err(e) = self.mounts.mount_overlay(&overlay) {
            self.discard(&layout);
            return Err(PockerError::MountFailed {
                target: layout.merged,
                source: e,
            });
        }

        tracing::info!(
            id = %id,
            image = %image.name,
            merged = %layout.merged.display(),
            "overlay root prepared"
        );
        Ok(layout)
    }

    /// Removes a half-built layout. Only called before anything is mounted.
    fn discard(&self, layout: &ContainerLayout) {
        if let Err(e) = std::fs::remove_dir_all(&layout.root) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %layout.root.display(), error = %e, "rollback failed");
            }
        }
    }

    /// Unmounts the merged root of `id` and removes its directories.
    ///
    /// Safe to call repeatedly: a second call finds nothing to do and
    /// reports nothing. Failures never stop the remaining steps.
    pub fn teardown(&self, id: &ContainerId) -> Vec<TeardownWarning> {
        let layout = self.layout(id);
        let mut warnings = Vec::new();

        if let Err(w) = self.unmount(&layout.merged) {
            warnings.push(w);
        }
        for dir in [&layout.upper, &layout.work] {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                if e.kind() != io::ErrorKind::NotFound {
                    warnings.push(TeardownWarning::new(dir, format!("remove failed: {e}")));
                }
            }
        }
        // rmdir only: a merged directory that is still a live mount must
        // never be walked.
        for dir in [&layout.merged, &layout.root] {
            if let Err(e) = std::fs::remove_dir(dir) {
                if e.kind() != io::ErrorKind::NotFound {
                    warnings.push(TeardownWarning::new(dir, format!("remove failed: {e}")));
                }
            }
        }

        for warning in &warnings {
            tracing::warn!(id = %id, %warning, "rootfs teardown incomplete");
        }
        tracing::info!(id = %id, warnings = warnings.len(), "overlay root torn down");
        warnings
    }

    /// Unmounts `target`, retrying while busy and detaching lazily as a last resort.
    fn unmount(&self, target: &Path) -> std::result::Result<(), TeardownWarning> {
        let mut delay = self.retry_delay;
        for attempt in 1..=self.unmount_retries.max(1) {
            match self.mounts.unmount(target, false) {
                Ok(()) => {
                    tracing::debug!(path = %target.display(), attempt, "unmounted");
                    return Ok(());
                }
                Err(e) if host::is_not_mounted(&e) => return Ok(()),
                Err(e) if host::is_busy(&e) => {
                    tracing::debug!(path = %target.display(), attempt, "mount busy, retrying");
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    return Err(TeardownWarning::new(target, format!("unmount failed: {e}")));
                }
            }
        }

        match self.mounts.unmount(target, true) {
            Ok(()) => {
                tracing::warn!(path = %target.display(), "mount stayed busy, detached lazily");
                Ok(())
            }
            Err(e) if host::is_not_mounted(&e) => Ok(()),
            Err(e) => Err(TeardownWarning::new(target, format!("unmount failed: {e}"))),
        }
    }

    /// Lists the ids that still have a directory under the containers directory.
    ///
    /// Entries that are not container ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be read.
    pub fn container_ids(&self) -> Result<Vec<ContainerId>> {
        let names = match host::list_subdirectories(&self.containers_dir) {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PockerError::Io {
                    path: self.containers_dir.clone(),
                    source: e,
                });
            }
        };
        Ok(names
            .iter()
            .filter_map(|name| ContainerId::parse(name).ok())
            .collect())
    }

    /// Unmounts every mount under the containers directory, deepest first,
    /// except those belonging to `skip`.
    pub fn sweep_mounts(&self, skip: &[ContainerId]) -> Vec<TeardownWarning> {
        let points = match self.mounts.mount_points() {
            Ok(points) => points,
            Err(e) => {
                return vec![TeardownWarning::new(
                    &self.containers_dir,
                    format!("cannot read mount table: {e}"),
                )];
            }
        };

        let mut ours: Vec<PathBuf> = points
            .into_iter()
            .filter(|p| p.starts_with(&self.containers_dir))
            .filter(|p| {
                !skip
                    .iter()
                    .any(|id| p.starts_with(self.containers_dir.join(id.as_str())))
            })
            .collect();
        // Stable sort keeps stacked mounts on one path in table order; the
        // reverse puts the most recently stacked one first.
        ours.reverse();
        ours.sort_by_key(|p| Reverse(p.components().count()));

        let mut warnings = Vec::new();
        for point in &ours {
            tracing::info!(path = %point.display(), "unmounting leftover mount");
            if let Err(w) = self.unmount(point) {
                warnings.push(w);
            }
        }
        warnings
    }
}
