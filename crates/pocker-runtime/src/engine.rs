//! Runtime engine that orchestrates a container's lifecycle.
//!
//! A run is strictly ordered: resolve the image, prepare the overlay root,
//! create cgroups, spawn the child, attach it, release it into `exec`, wait,
//! then remove cgroups and the root. Whatever happens after the root is
//! prepared, the cleanup runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use pocker_common::config::PockerConfig;
use pocker_common::error::{PockerError, Result, TeardownWarning};
use pocker_common::types::{ContainerId, ResourceLimits};
use pocker_core::cgroup::{CgroupController, CgroupVersion};
use pocker_core::filesystem::RootfsBuilder;
use pocker_core::host::{CgroupFs, HostCgroupFs, HostMountTable, MountTable};
use pocker_core::namespace::{self, ExitStatus, SpawnRequest};
use pocker_image::ImageStore;

use crate::container::Container;
use crate::sweep::{self, SweepReport};

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Id the container ran under.
    pub container_id: ContainerId,
    /// How the user command ended.
    pub status: ExitStatus,
    /// Shell-style exit code of the user command.
    pub exit_code: i32,
    /// Problems met while tearing the container down.
    pub warnings: Vec<TeardownWarning>,
}

/// Interrupts the command of the run in progress, if any.
///
/// The first request sends `SIGTERM`. A process running as the init of its
/// PID namespace ignores signals it has no handler for, so any further
/// request sends `SIGKILL`.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tracked: Arc<AtomicI32>,
    requested: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Signals the tracked process. Returns `false` if nothing is running.
    pub fn cancel(&self) -> bool {
        let raw = self.tracked.load(Ordering::SeqCst);
        if raw == 0 {
            return false;
        }
        let signal = if self.requested.swap(true, Ordering::SeqCst) {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => {
                tracing::info!(pid = raw, %signal, "signalled container");
                true
            }
            Err(e) => {
                tracing::warn!(pid = raw, %signal, error = %e, "failed to signal container");
                false
            }
        }
    }
}

/// The runtime engine that coordinates all container operations.
pub struct Engine {
    config: PockerConfig,
    images: ImageStore,
    rootfs: RootfsBuilder,
    cgroups: CgroupController,
    tracked: Arc<AtomicI32>,
    cancel_requested: Arc<AtomicBool>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("rootfs", &self.rootfs)
            .field("cgroups", &self.cgroups)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine acting on the real host.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if `config` is invalid.
    pub fn new(config: PockerConfig) -> Result<Self> {
        Self::with_host(config, Arc::new(HostMountTable), Arc::new(HostCgroupFs))
    }

    /// Creates an engine acting through the given host handles.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if `config` is invalid.
    pub fn with_host(
        config: PockerConfig,
        mounts: Arc<dyn MountTable>,
        cgroup_fs: Arc<dyn CgroupFs>,
    ) -> Result<Self> {
        config.validate()?;
        let version =
            CgroupVersion::resolve(config.cgroup_version, &config.cgroup_root, cgroup_fs.as_ref());
        tracing::debug!(
            store = %config.store_root.display(),
            cgroup_root = %config.cgroup_root.display(),
            version = ?version,
            "engine configured"
        );
        Ok(Self {
            images: ImageStore::open(config.images_dir()),
            rootfs: RootfsBuilder::new(config.containers_dir(), mounts).with_retry_policy(
                config.unmount_retries,
                Duration::from_millis(config.retry_delay_ms),
            ),
            cgroups: CgroupController::new(config.cgroup_root.clone(), version, cgroup_fs),
            tracked: Arc::new(AtomicI32::new(0)),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Returns the configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PockerConfig {
        &self.config
    }

    /// Returns the image store.
    #[must_use]
    pub const fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Returns a handle that can interrupt the current run from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tracked: Arc::clone(&self.tracked),
            requested: Arc::clone(&self.cancel_requested),
        }
    }

    /// Runs `command` in a fresh container built from `image_name`.
    ///
    /// Unset fields of `limits` fall back to the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an empty command or inconsistent limits,
    /// `ImageNotFound` before anything is created on the host, and the
    /// first error of the run otherwise. Cleanup has run in every case.
    pub fn run(
        &self,
        image_name: &str,
        command: &[String],
        limits: &ResourceLimits,
    ) -> Result<RunOutcome> {
        if command.is_empty() {
            return Err(PockerError::Config {
                message: "command must not be empty".into(),
            });
        }
        let limits = limits.clone().or(&self.config.default_limits);
        limits.validate()?;
        let image = self.images.resolve(image_name)?;

        let mut container = Container::new(self.fresh_id(), image, command.to_vec(), limits);
        tracing::info!(
            id = %container.id,
            image = %container.image.name,
            command = ?container.command,
            "starting container"
        );

        let result = self.execute(&mut container);
        let warnings = self.cleanup(&container.id);

        match result {
            Ok(status) => {
                container.mark_exited(status.code())?;
                Ok(RunOutcome {
                    container_id: container.id,
                    status,
                    exit_code: status.code(),
                    warnings,
                })
            }
            Err(e) => {
                container.mark_failed();
                tracing::error!(id = %container.id, error = %e, "container run failed");
                Err(e)
            }
        }
    }

    fn execute(&self, container: &mut Container) -> Result<ExitStatus> {
        let layout = self.rootfs.prepare(&container.image, &container.id)?;
        let merged_root = layout.merged.clone();
        container.layout = Some(layout);
        self.cgroups.create(&container.id, &container.limits)?;

        let pending = namespace::spawn(SpawnRequest {
            merged_root,
            command: container.command.clone(),
            namespaces: self.config.namespaces,
            hostname: container.id.to_string(),
            mount_pseudo_filesystems: self.config.mount_pseudo_filesystems,
        })?;
        if let Err(e) = self.cgroups.attach(&container.id, pending.pid()) {
            pending.abort();
            return Err(e);
        }

        self.cancel_requested.store(false, Ordering::SeqCst);
        self.tracked.store(pending.pid().as_raw(), Ordering::SeqCst);
        let mut running = match pending.release() {
            Ok(running) => running,
            Err(e) => {
                self.tracked.store(0, Ordering::SeqCst);
                return Err(e);
            }
        };
        container.mark_running(running.pid())?;

        // Stop tracking while the zombie still holds the pid.
        let status = running.wait_then_reap(|| self.tracked.store(0, Ordering::SeqCst));
        self.tracked.store(0, Ordering::SeqCst);
        status
    }

    /// Removes the cgroups and the root of `id`. Never fails.
    fn cleanup(&self, id: &ContainerId) -> Vec<TeardownWarning> {
        let mut warnings = Vec::new();
        if let Err(e) = self.cgroups.destroy(id) {
            let resource = match &e {
                PockerError::CgroupBusy { path } | PockerError::Io { path, .. } => path.clone(),
                _ => self.config.cgroup_root.clone(),
            };
            warnings.push(TeardownWarning::new(resource, e));
        }
        warnings.extend(self.rootfs.teardown(id));
        for warning in &warnings {
            tracing::warn!(id = %id, %warning, "teardown warning");
        }
        tracing::info!(id = %id, warnings = warnings.len(), "container cleaned up");
        warnings
    }

    /// Generates an id with no leftover directory or cgroup.
    fn fresh_id(&self) -> ContainerId {
        loop {
            let id = ContainerId::generate();
            if !self.rootfs.layout(&id).root.exists() && !self.cgroups.exists(&id) {
                return id;
            }
            tracing::debug!(id = %id, "generated id already in use");
        }
    }

    /// Removes leftovers of runs that did not clean up after themselves.
    ///
    /// Must not overlap with another invocation's `run` while it is starting;
    /// see [`sweep::sweep`].
    ///
    /// # Errors
    ///
    /// Returns `Io` if the containers directory or the cgroup tree cannot
    /// be listed.
    pub fn sweep(&self) -> Result<SweepReport> {
        sweep::sweep(&self.rootfs, &self.cgroups)
    }

    /// Returns the directory holding per-container layers.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.config.containers_dir()
    }

    /// Returns `true` if any cgroup of `id` is still present.
    #[must_use]
    pub fn has_cgroups(&self, id: &ContainerId) -> bool {
        self.cgroups.exists(id)
    }
}
