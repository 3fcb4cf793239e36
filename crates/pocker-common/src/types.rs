//! Domain primitive types used across the Pocker workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PockerError, Result};

/// Length of a container id in hex characters.
pub const CONTAINER_ID_LEN: usize = 32;

/// Unique identifier for a container instance.
///
/// Always 32 lowercase hex characters, so that directory and cgroup names
/// can be recognised as container artifacts by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Parses an existing id, rejecting anything that is not 32 lowercase hex digits.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error for malformed ids.
    pub fn parse(id: &str) -> Result<Self> {
        if id.len() != CONTAINER_ID_LEN
            || !id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(PockerError::Config {
                message: format!("invalid container id: {id}"),
            });
        }
        Ok(Self(id.to_owned()))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An extracted image in the store, used as the read-only lower layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Name the image is stored under.
    pub name: String,
    /// Root of the extracted filesystem tree.
    pub path: std::path::PathBuf,
}

/// Memory plus swap ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySwap {
    /// Combined memory and swap ceiling in bytes.
    Bytes(u64),
    /// No swap ceiling.
    Unlimited,
}

impl MemorySwap {
    /// Parses a CLI value: a size, or `-1` for unlimited.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the size cannot be parsed.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "-1" | "unlimited" => Ok(Self::Unlimited),
            other => parse_memory_size(other).map(Self::Bytes),
        }
    }
}

/// Resource limits for a container.
///
/// Unknown keys are rejected during deserialization so a typo never
/// silently leaves a limit unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    /// CPU shares (relative weight).
    pub cpu_shares: Option<u64>,
    /// CPU time allowed per scheduling period, in microseconds.
    pub cpu_quota_us: Option<u64>,
    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,
    /// Memory plus swap limit.
    pub memory_swap: Option<MemorySwap>,
}

impl ResourceLimits {
    /// Smallest `cpu.shares` value the kernel accepts.
    pub const MIN_CPU_SHARES: u64 = 2;
    /// Largest `cpu.shares` value the kernel accepts.
    pub const MAX_CPU_SHARES: u64 = 262_144;
    /// Smallest CFS quota the kernel accepts.
    pub const MIN_CPU_QUOTA_US: u64 = 1_000;

    /// Returns `true` when no limit is configured.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.cpu_shares.is_none()
            && self.cpu_quota_us.is_none()
            && self.memory_bytes.is_none()
            && self.memory_swap.is_none()
    }

    /// Checks that the configured values are mutually consistent.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let shares_range = Self::MIN_CPU_SHARES..=Self::MAX_CPU_SHARES;
        if let Some(shares) = self.cpu_shares.filter(|s| !shares_range.contains(s)) {
            return Err(config_error(format!(
                "cpu_shares must be between {} and {}, got {shares}",
                Self::MIN_CPU_SHARES,
                Self::MAX_CPU_SHARES
            )));
        }
        if let Some(quota) = self.cpu_quota_us.filter(|q| *q < Self::MIN_CPU_QUOTA_US) {
            return Err(config_error(format!(
                "cpu_quota_us must be at least {}, got {quota}",
                Self::MIN_CPU_QUOTA_US
            )));
        }
        if self.memory_bytes == Some(0) {
            return Err(config_error("memory_bytes must be greater than zero"));
        }
        match (self.memory_swap, self.memory_bytes) {
            (Some(_), None) => Err(config_error("memory_swap requires memory_bytes")),
            (Some(MemorySwap::Bytes(swap)), Some(mem)) if swap < mem => Err(config_error(
                format!("memory_swap ({swap}) must not be smaller than memory_bytes ({mem})"),
            )),
            _ => Ok(()),
        }
    }

    /// Fills every unset field from `defaults`.
    #[must_use]
    pub fn or(self, defaults: &Self) -> Self {
        Self {
            cpu_shares: self.cpu_shares.or(defaults.cpu_shares),
            cpu_quota_us: self.cpu_quota_us.or(defaults.cpu_quota_us),
            memory_bytes: self.memory_bytes.or(defaults.memory_bytes),
            memory_swap: self.memory_swap.or(defaults.memory_swap),
        }
    }
}

fn config_error(message: impl Into<String>) -> PockerError {
    PockerError::Config {
        message: message.into(),
    }
}

/// Parses sizes like `"512"`, `"64k"`, `"512m"`, `"1g"`, `"128MiB"`, `"1GB"` into bytes.
///
/// Single-letter suffixes are binary multiples, matching the usual
/// container CLI conventions.
///
/// # Errors
///
/// Returns a `Config` error for malformed or overflowing values.
pub fn parse_memory_size(input: &str) -> Result<u64> {
    let s = input.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kib" => 1 << 10,
        "kb" => 1_000,
        "m" | "mib" => 1 << 20,
        "mb" => 1_000_000,
        "g" | "gib" => 1 << 30,
        "gb" => 1_000_000_000,
        _ => return Err(config_error(format!("invalid size: {input}"))),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| config_error(format!("invalid size: {input}")))
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// Artifacts prepared, process not yet executing the command.
    Created,
    /// The user command is executing.
    Running,
    /// The user command returned.
    Exited,
    /// Setup or supervision failed.
    Failed,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// In-namespace setup step performed by the container's child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupStep {
    /// Waiting for the parent to attach cgroups.
    AwaitRelease,
    /// Making the mount tree private.
    MakePrivate,
    /// Mounting `/proc`, `/sys`, and `/dev` under the new root.
    MountPseudoFs,
    /// Switching the filesystem root.
    PivotRoot,
    /// Setting the container hostname.
    SetHostname,
    /// Replacing the process image with the user command.
    Exec,
}

impl SetupStep {
    const ALL: [Self; 6] = [
        Self::AwaitRelease,
        Self::MakePrivate,
        Self::MountPseudoFs,
        Self::PivotRoot,
        Self::SetHostname,
        Self::Exec,
    ];

    /// Wire code used on the child status pipe (never zero).
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::AwaitRelease => 1,
            Self::MakePrivate => 2,
            Self::MountPseudoFs => 3,
            Self::PivotRoot => 4,
            Self::SetHostname => 5,
            Self::Exec => 6,
        }
    }

    /// Inverse of [`SetupStep::code`].
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitRelease => "await-release",
            Self::MakePrivate => "make-private",
            Self::MountPseudoFs => "mount-pseudo-fs",
            Self::PivotRoot => "pivot-root",
            Self::SetHostname => "set-hostname",
            Self::Exec => "exec",
        };
        f.write_str(name)
    }
}

/// Which namespaces a container gets.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamespaceConfig {
    /// Isolate the mount table. Required.
    pub mount: bool,
    /// Isolate hostname and domain name.
    pub uts: bool,
    /// Isolate the PID space.
    pub pid: bool,
    /// Isolate the network stack.
    pub network: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            mount: true,
            uts: true,
            pid: true,
            network: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), CONTAINER_ID_LEN);
        assert_eq!(ContainerId::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn parse_rejects_foreign_names() {
        assert!(ContainerId::parse("lost+found").is_err());
        assert!(ContainerId::parse("0123456789ABCDEF0123456789abcdef").is_err());
        assert!(ContainerId::parse("0123456789abcdef").is_err());
    }

    #[test]
    fn parse_memory_suffixes() {
        assert_eq!(parse_memory_size("512").unwrap(), 512);
        assert_eq!(parse_memory_size("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_memory_size("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory_size("128MiB").unwrap(), 128 * 1024 * 1024);
        assert_eq!(parse_memory_size("1GB").unwrap(), 1_000_000_000);
    }

    #[test]
    fn parse_memory_rejects_garbage() {
        assert!(parse_memory_size("abc").is_err());
        assert!(parse_memory_size("12x").is_err());
        assert!(parse_memory_size("").is_err());
        assert!(parse_memory_size("99999999999999999999g").is_err());
    }

    #[test]
    fn memory_swap_minus_one_is_unlimited() {
        assert_eq!(MemorySwap::parse("-1").unwrap(), MemorySwap::Unlimited);
        assert_eq!(MemorySwap::parse("1m").unwrap(), MemorySwap::Bytes(1 << 20));
    }

    #[test]
    fn default_limits_are_unlimited_and_valid() {
        let limits = ResourceLimits::default();
        assert!(limits.is_unlimited());
        limits.validate().unwrap();
    }

    #[test]
    fn validate_rejects_out_of_range_shares() {
        let limits = ResourceLimits {
            cpu_shares: Some(1),
            ..ResourceLimits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn validate_rejects_swap_below_memory() {
        let limits = ResourceLimits {
            memory_bytes: Some(100 << 20),
            memory_swap: Some(MemorySwap::Bytes(50 << 20)),
            ..ResourceLimits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn validate_rejects_swap_without_memory() {
        let limits = ResourceLimits {
            memory_swap: Some(MemorySwap::Unlimited),
            ..ResourceLimits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn or_fills_unset_fields_only() {
        let defaults = ResourceLimits {
            cpu_shares: Some(512),
            memory_bytes: Some(1 << 30),
            ..ResourceLimits::default()
        };
        let merged = ResourceLimits {
            memory_bytes: Some(1 << 20),
            ..ResourceLimits::default()
        }
        .or(&defaults);
        assert_eq!(merged.cpu_shares, Some(512));
        assert_eq!(merged.memory_bytes, Some(1 << 20));
    }

    #[test]
    fn limits_reject_unknown_keys() {
        let err = serde_json::from_str::<ResourceLimits>(r#"{"memory_byte": 10}"#);
        assert!(err.is_err());
    }

    #[test]
    fn setup_step_codes_roundtrip() {
        for step in SetupStep::ALL {
            assert_eq!(SetupStep::from_code(step.code()), Some(step));
        }
        assert_eq!(SetupStep::from_code(0), None);
    }

    #[test]
    fn status_display() {
        assert_eq!(ContainerStatus::Exited.to_string(), "exited");
        assert_eq!(ContainerStatus::Failed.to_string(), "failed");
    }
}
