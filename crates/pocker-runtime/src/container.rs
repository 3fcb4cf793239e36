//! In-memory record of one container run.

use chrono::{DateTime, Utc};
use nix::unistd::Pid;
use pocker_common::error::{PockerError, Result};
use pocker_common::types::{ContainerId, ContainerStatus, Image, ResourceLimits};
use pocker_core::filesystem::ContainerLayout;

/// A container from creation until its artifacts are gone.
#[derive(Debug, Clone)]
pub struct Container {
    /// Unique identifier.
    pub id: ContainerId,
    /// Image the container is rooted in.
    pub image: Image,
    /// Command executed inside the container.
    pub command: Vec<String>,
    /// Limits applied to the container's cgroups.
    pub limits: ResourceLimits,
    /// Current lifecycle status.
    pub status: ContainerStatus,
    /// Host pid of the user command while it runs.
    pub pid: Option<Pid>,
    /// Overlay directories once prepared.
    pub layout: Option<ContainerLayout>,
    /// Exit code once exited.
    pub exit_code: Option<i32>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Container {
    /// Creates a record in the `Created` state.
    #[must_use]
    pub fn new(id: ContainerId, image: Image, command: Vec<String>, limits: ResourceLimits) -> Self {
        Self {
            id,
            image,
            command,
            limits,
            status: ContainerStatus::Created,
            pid: None,
            layout: None,
            exit_code: None,
            created_at: Utc::now(),
        }
    }

    /// `Created` to `Running`.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error from any other state.
    pub fn mark_running(&mut self, pid: Pid) -> Result<()> {
        self.transition(ContainerStatus::Running)?;
        self.pid = Some(pid);
        tracing::info!(id = %self.id, pid = pid.as_raw(), "container running");
        Ok(())
    }

    /// `Running` to `Exited`.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error from any other state.
    pub fn mark_exited(&mut self, exit_code: i32) -> Result<()> {
        self.transition(ContainerStatus::Exited)?;
        self.pid = None;
        self.exit_code = Some(exit_code);
        tracing::info!(id = %self.id, exit_code, "container exited");
        Ok(())
    }

    /// Any state but `Exited` to `Failed`.
    pub fn mark_failed(&mut self) {
        if self.status != ContainerStatus::Exited {
            self.status = ContainerStatus::Failed;
            self.pid = None;
        }
    }

    fn transition(&mut self, to: ContainerStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, to),
            (ContainerStatus::Created, ContainerStatus::Running)
                | (ContainerStatus::Running, ContainerStatus::Exited)
        );
        if !allowed {
            return Err(PockerError::Config {
                message: format!(
                    "container {} cannot go from {} to {to}",
                    self.id, self.status
                ),
            });
        }
        self.status = to;
        Ok(())
    }
}
