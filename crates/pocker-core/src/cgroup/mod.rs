//! Cgroup resource management.
//!
//! Each container gets one group per controller, named after its id, under
//! a shared `pocker` parent. Both hierarchy layouts are supported:
//!
//! - v1: `<root>/cpu/pocker/<id>` and `<root>/memory/pocker/<id>`
//! - v2: `<root>/pocker/<id>` with the `cpu` and `memory` controllers
//!   delegated from the root

pub mod cpu;
pub mod memory;

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::Pid;
use pocker_common::config::CgroupVersionSetting;
use pocker_common::constants::{CGROUP_PARENT, CGROUP_PROCS_FILE};
use pocker_common::error::{PockerError, Result};
use pocker_common::types::{ContainerId, ResourceLimits};

use crate::host::{self, CgroupFs};

/// File present only at the root of a unified (v2) hierarchy.
const V2_MARKER_FILE: &str = "cgroup.controllers";

/// File through which v2 delegates controllers to child groups.
const SUBTREE_CONTROL_FILE: &str = "cgroup.subtree_control";

/// Controllers a container group needs on v2.
const V2_CONTROLLERS: &str = "+cpu +memory";

/// Cgroup hierarchy layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    /// One hierarchy per controller.
    V1,
    /// The unified hierarchy.
    V2,
}

impl CgroupVersion {
    /// Detects the layout mounted at `root`.
    #[must_use]
    pub fn detect(root: &Path, fs: &dyn CgroupFs) -> Self {
        if fs.exists(&root.join(V2_MARKER_FILE)) {
            Self::V2
        } else {
            Self::V1
        }
    }

    /// Applies a configured setting, detecting when it is `auto`.
    #[must_use]
    pub fn resolve(setting: CgroupVersionSetting, root: &Path, fs: &dyn CgroupFs) -> Self {
        match setting {
            CgroupVersionSetting::Auto => Self::detect(root, fs),
            CgroupVersionSetting::V1 => Self::V1,
            CgroupVersionSetting::V2 => Self::V2,
        }
    }
}

/// Creates, populates, and removes per-container cgroups.
pub struct CgroupController {
    root: PathBuf,
    version: CgroupVersion,
    fs: Arc<dyn CgroupFs>,
}

impl std::fmt::Debug for CgroupController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgroupController")
            .field("root", &self.root)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl CgroupController {
    /// Creates a controller for the hierarchy mounted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, version: CgroupVersion, fs: Arc<dyn CgroupFs>) -> Self {
        Self {
            root: root.into(),
            version,
            fs,
        }
    }

    /// Returns the hierarchy layout in use.
    #[must_use]
    pub const fn version(&self) -> CgroupVersion {
        self.version
    }

    /// Directories holding every container's groups, one per controller.
    fn parents(&self) -> Vec<PathBuf> {
        match self.version {
            CgroupVersion::V1 => [cpu::V1_CONTROLLER, memory::V1_CONTROLLER]
                .iter()
                .map(|controller| self.root.join(controller).join(CGROUP_PARENT))
                .collect(),
            CgroupVersion::V2 => vec![self.root.join(CGROUP_PARENT)],
        }
    }

    /// Returns the group directories of `id`, one per controller hierarchy.
    #[must_use]
    pub fn group_dirs(&self, id: &ContainerId) -> Vec<PathBuf> {
        self.parents()
            .into_iter()
            .map(|parent| parent.join(id.as_str()))
            .collect()
    }

    /// Returns `true` if any group of `id` exists.
    #[must_use]
    pub fn exists(&self, id: &ContainerId) -> bool {
        self.group_dirs(id).iter().any(|dir| self.fs.exists(dir))
    }

    /// Control writes for each group, parallel to [`Self::group_dirs`].
    fn control_values(&self, limits: &ResourceLimits) -> Vec<Vec<(&'static str, String)>> {
        match self.version {
            CgroupVersion::V1 => vec![
                cpu::control_values(CgroupVersion::V1, limits),
                memory::control_values(CgroupVersion::V1, limits),
            ],
            CgroupVersion::V2 => {
                let mut values = cpu::control_values(CgroupVersion::V2, limits);
                values.extend(memory::control_values(CgroupVersion::V2, limits));
                vec![values]
            }
        }
    }

    fn enable_controllers(&self) -> Result<()> {
        let parent = self.root.join(CGROUP_PARENT);
        self.write(&self.root.join(SUBTREE_CONTROL_FILE), V2_CONTROLLERS)?;
        self.fs.create_dir(&parent).map_err(|e| PockerError::Io {
            path: parent.clone(),
            source: e,
        })?;
        self.write(&parent.join(SUBTREE_CONTROL_FILE), V2_CONTROLLERS)
    }

    fn write(&self, path: &Path, value: &str) -> Result<()> {
        self.fs
            .write(path, value)
            .map_err(|e| PockerError::CgroupWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
        tracing::debug!(path = %path.display(), value, "cgroup value written");
        Ok(())
    }

    /// Creates the groups of `id` and writes every configured limit.
    ///
    /// On failure, every group created by this call is removed again.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a group already exists, `Io` if a directory
    /// cannot be created, and `CgroupWriteFailed` if the kernel rejects a
    /// value.
    pub fn create(&self, id: &ContainerId, limits: &ResourceLimits) -> Result<()> {
        let dirs = self.group_dirs(id);
        if let Some(existing) = dirs.iter().find(|dir| self.fs.exists(dir)) {
            return Err(PockerError::Config {
                message: format!("cgroup already exists: {}", existing.display()),
            });
        }
        if self.version == CgroupVersion::V2 {
            self.enable_controllers()?;
        }

        let mut created = Vec::new();
        for dir in &dirs {
            if let Err(e) = self.fs.create_dir(dir) {
                self.remove_created(&created);
                return Err(PockerError::Io {
                    path: dir.clone(),
                    source: e,
                });
            }
            created.push(dir.clone());
        }

        for (dir, values) in dirs.iter().zip(self.control_values(limits)) {
            for (file, value) in values {
                if let Err(e) = self.write(&dir.join(file), &value) {
                    self.remove_created(&created);
                    return Err(e);
                }
            }
        }

        tracing::info!(id = %id, version = ?self.version, "cgroups created");
        Ok(())
    }

    fn remove_created(&self, created: &[PathBuf]) {
        for dir in created.iter().rev() {
            if let Err(e) = self.fs.remove_dir(dir) {
                tracing::warn!(path = %dir.display(), error = %e, "cgroup rollback failed");
            }
        }
    }

    /// Moves `pid` into every group of `id`.
    ///
    /// # Errors
    ///
    /// Returns `CgroupWriteFailed` if a membership write is rejected.
    pub fn attach(&self, id: &ContainerId, pid: Pid) -> Result<()> {
        let value = pid.to_string();
        for dir in self.group_dirs(id) {
            self.write(&dir.join(CGROUP_PROCS_FILE), &value)?;
        }
        tracing::debug!(id = %id, pid = pid.as_raw(), "process attached to cgroups");
        Ok(())
    }

    /// Removes every group of `id`. Missing groups are not an error.
    ///
    /// Every group is attempted even after a failure.
    ///
    /// # Errors
    ///
    /// Returns the first failure: `CgroupBusy` while processes remain
    /// attached, `Io` otherwise.
    pub fn destroy(&self, id: &ContainerId) -> Result<()> {
        let mut first_error = None;
        for dir in self.group_dirs(id) {
            match self.fs.remove_dir(&dir) {
                Ok(()) => tracing::debug!(path = %dir.display(), "cgroup removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "cgroup removal failed");
                    let err = if host::is_busy(&e) {
                        PockerError::CgroupBusy { path: dir }
                    } else {
                        PockerError::Io {
                            path: dir,
                            source: e,
                        }
                    };
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Lists the ids that have a group in any controller hierarchy.
    ///
    /// # Errors
    ///
    /// Returns `Io` if an existing parent directory cannot be read.
    pub fn group_ids(&self) -> Result<Vec<ContainerId>> {
        let mut ids = BTreeSet::new();
        for parent in self.parents() {
            let names = match self.fs.list_dir(&parent) {
                Ok(names) => names,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(PockerError::Io {
                        path: parent,
                        source: e,
                    });
                }
            };
            ids.extend(names.iter().filter_map(|name| ContainerId::parse(name).ok()));
        }
        Ok(ids.into_iter().collect())
    }

    /// Returns `true` if any group of `id` still lists a process.
    #[must_use]
    pub fn has_live_processes(&self, id: &ContainerId) -> bool {
        self.group_dirs(id).iter().any(|dir| {
            self.fs
                .read(&dir.join(CGROUP_PROCS_FILE))
                .is_ok_and(|procs| !procs.trim().is_empty())
        })
    }
}
