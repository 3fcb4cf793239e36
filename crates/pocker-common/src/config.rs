//! Global configuration model for the Pocker runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{PockerError, Result};
use crate::types::{NamespaceConfig, ResourceLimits};

/// Which cgroup hierarchy layout to drive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupVersionSetting {
    /// Detect from the mounted cgroup filesystem.
    #[default]
    Auto,
    /// Per-controller hierarchies (`<root>/cpu`, `<root>/memory`).
    V1,
    /// Unified hierarchy.
    V2,
}

/// Root configuration for the Pocker runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PockerConfig {
    /// Base directory holding `images/` and `containers/`.
    pub store_root: PathBuf,
    /// Mount point of the cgroup filesystem.
    pub cgroup_root: PathBuf,
    /// Cgroup hierarchy layout.
    pub cgroup_version: CgroupVersionSetting,
    /// Namespaces created for every container.
    pub namespaces: NamespaceConfig,
    /// Mount `/proc`, `/sys`, and a populated `/dev` inside the container.
    pub mount_pseudo_filesystems: bool,
    /// Limits applied when a run does not set them.
    pub default_limits: ResourceLimits,
    /// Unmount attempts made while the merged mount reports `EBUSY`.
    pub unmount_retries: u32,
    /// Delay before the first unmount retry, doubled on each retry.
    pub retry_delay_ms: u64,
}

impl Default for PockerConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from(constants::DEFAULT_STORE_ROOT),
            cgroup_root: PathBuf::from(constants::DEFAULT_CGROUP_ROOT),
            cgroup_version: CgroupVersionSetting::Auto,
            namespaces: NamespaceConfig::default(),
            mount_pseudo_filesystems: true,
            default_limits: ResourceLimits::default(),
            unmount_retries: constants::DEFAULT_UNMOUNT_RETRIES,
            retry_delay_ms: constants::DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl PockerConfig {
    /// Loads a configuration file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains unknown keys,
    /// or fails [`PockerConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| PockerError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants the runtime relies on.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if !self.namespaces.mount {
            return Err(PockerError::Config {
                message: "the mount namespace cannot be disabled".into(),
            });
        }
        for (key, path) in [
            ("store_root", &self.store_root),
            ("cgroup_root", &self.cgroup_root),
        ] {
            if !path.is_absolute() {
                return Err(PockerError::Config {
                    message: format!("{key} must be an absolute path: {}", path.display()),
                });
            }
        }
        self.default_limits.validate()
    }

    /// Returns the directory holding extracted images.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.store_root.join(constants::IMAGES_DIR)
    }

    /// Returns the directory holding per-container layers.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.store_root.join(constants::CONTAINERS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PockerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.images_dir(), PathBuf::from("/var/lib/pocker/images"));
        assert_eq!(
            config.containers_dir(),
            PathBuf::from("/var/lib/pocker/containers")
        );
    }

    #[test]
    fn load_fills_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pocker.json");
        std::fs::write(
            &path,
            r#"{"store_root": "/srv/pocker", "default_limits": {"cpu_shares": 512}}"#,
        )
        .expect("write");

        let config = PockerConfig::load(&path).expect("load");
        assert_eq!(config.store_root, PathBuf::from("/srv/pocker"));
        assert_eq!(config.default_limits.cpu_shares, Some(512));
        assert_eq!(config.cgroup_root, PathBuf::from("/sys/fs/cgroup"));
        assert!(config.namespaces.network);
    }

    #[test]
    fn load_rejects_typoed_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pocker.json");
        std::fs::write(&path, r#"{"default_limits": {"cpu_share": 512}}"#).expect("write");
        assert!(matches!(
            PockerConfig::load(&path),
            Err(PockerError::Serialization { .. })
        ));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = PockerConfig::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(PockerError::Io { .. })));
    }

    #[test]
    fn validate_rejects_disabled_mount_namespace() {
        let mut config = PockerConfig::default();
        config.namespaces.mount = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_store_root() {
        let config = PockerConfig {
            store_root: PathBuf::from("_pocker"),
            ..PockerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cgroup_version_parses_lowercase() {
        let v: CgroupVersionSetting = serde_json::from_str(r#""v2""#).expect("parse");
        assert_eq!(v, CgroupVersionSetting::V2);
    }
}
