//! Unified error types for the Pocker workspace.
//!
//! Fatal errors abort a run before the user command executes. Cleanup
//! problems are not errors: they are reported as [`TeardownWarning`] values
//! so they can never mask the failure that caused the teardown.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::SetupStep;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum PockerError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The requested image is absent from the store.
    #[error("image not found: {name}{hint}")]
    ImageNotFound {
        /// Requested image name.
        name: String,
        /// Extra context appended to the message (may be empty).
        hint: String,
    },

    /// An overlay or bind mount was rejected by the kernel.
    #[error("mount failed at {target}: {source}")]
    MountFailed {
        /// Mount point of the rejected mount.
        target: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A cgroup limit value or membership write was rejected.
    #[error("cgroup write failed at {path}: {source}")]
    CgroupWriteFailed {
        /// Control file or group directory that failed.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A cgroup could not be removed because processes are still attached.
    #[error("cgroup busy: {path} still has attached processes")]
    CgroupBusy {
        /// Group directory that is still populated.
        path: PathBuf,
    },

    /// A setup step inside the new namespaces failed before exec.
    #[error("container setup failed at step '{step}': {source}")]
    SetupFailed {
        /// Step that failed.
        step: SetupStep,
        /// Error reported by the child.
        source: std::io::Error,
    },

    /// A process-management call in the parent failed.
    #[error("{operation} failed: {source}")]
    Process {
        /// Name of the failed operation.
        operation: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PockerError>;

/// A non-fatal cleanup failure.
///
/// The residue it describes is keyed by container id and is recoverable by
/// the host-wide sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownWarning {
    /// Mount point, directory, or cgroup that could not be cleaned up.
    pub resource: PathBuf,
    /// Human-readable cause.
    pub message: String,
}

impl TeardownWarning {
    /// Creates a warning for the given resource.
    pub fn new(resource: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self {
            resource: resource.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for TeardownWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource.display(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_not_found_message_includes_hint() {
        let err = PockerError::ImageNotFound {
            name: "ubuntu".into(),
            hint: " (archive ubuntu.tar is not extracted)".into(),
        };
        assert_eq!(
            err.to_string(),
            "image not found: ubuntu (archive ubuntu.tar is not extracted)"
        );
    }

    #[test]
    fn setup_failed_names_the_step() {
        let err = PockerError::SetupFailed {
            step: SetupStep::PivotRoot,
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        };
        assert!(err.to_string().contains("pivot-root"));
    }

    #[test]
    fn teardown_warning_display() {
        let w = TeardownWarning::new("/var/lib/pocker/containers/x/merged", "device busy");
        assert_eq!(w.to_string(), "/var/lib/pocker/containers/x/merged: device busy");
    }
}
