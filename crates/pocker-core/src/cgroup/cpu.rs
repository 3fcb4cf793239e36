//! CPU control files.
//!
//! v1 uses `cpu.shares` and the CFS pair `cpu.cfs_period_us` /
//! `cpu.cfs_quota_us`; v2 uses `cpu.weight` and `cpu.max`.

use pocker_common::constants::CPU_PERIOD_US;
use pocker_common::types::ResourceLimits;

use super::CgroupVersion;

/// Controller directory name on a v1 hierarchy.
pub const V1_CONTROLLER: &str = "cpu";

/// Converts v1 shares (2..=262144) to a v2 weight (1..=10000).
#[must_use]
pub const fn shares_to_weight(shares: u64) -> u64 {
    let clamped = if shares < ResourceLimits::MIN_CPU_SHARES {
        ResourceLimits::MIN_CPU_SHARES
    } else if shares > ResourceLimits::MAX_CPU_SHARES {
        ResourceLimits::MAX_CPU_SHARES
    } else {
        shares
    };
    1 + ((clamped - 2) * 9999) / 262_142
}

/// Returns the `(file, value)` writes for the CPU limits, in write order.
#[must_use]
pub fn control_values(version: CgroupVersion, limits: &ResourceLimits) -> Vec<(&'static str, String)> {
    let mut values = Vec::new();
    match version {
        CgroupVersion::V1 => {
            if let Some(shares) = limits.cpu_shares {
                values.push(("cpu.shares", shares.to_string()));
            }
            if let Some(quota) = limits.cpu_quota_us {
                values.push(("cpu.cfs_period_us", CPU_PERIOD_US.to_string()));
                values.push(("cpu.cfs_quota_us", quota.to_string()));
            }
        }
        CgroupVersion::V2 => {
            if let Some(shares) = limits.cpu_shares {
                values.push(("cpu.weight", shares_to_weight(shares).to_string()));
            }
            if let Some(quota) = limits.cpu_quota_us {
                values.push(("cpu.max", format!("{quota} {CPU_PERIOD_US}")));
            }
        }
    }
    values
}
