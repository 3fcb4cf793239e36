//! Memory control files.

use pocker_common::types::{MemorySwap, ResourceLimits};

use super::CgroupVersion;

/// Controller directory name on a v1 hierarchy.
pub const V1_CONTROLLER: &str = "memory";

/// Returns the `(file, value)` writes for the memory limits, in write order.
///
/// The plain limit always comes first: v1 rejects a memory+swap limit
/// below the current memory limit.
#[must_use]
pub fn control_values(version: CgroupVersion, limits: &ResourceLimits) -> Vec<(&'static str, String)> {
    let mut values = Vec::new();
    let Some(memory) = limits.memory_bytes else {
        return values;
    };
    match version {
        CgroupVersion::V1 => {
            values.push(("memory.limit_in_bytes", memory.to_string()));
            match limits.memory_swap {
                Some(MemorySwap::Bytes(total)) => {
                    values.push(("memory.memsw.limit_in_bytes", total.to_string()));
                }
                Some(MemorySwap::Unlimited) => {
                    values.push(("memory.memsw.limit_in_bytes", "-1".to_owned()));
                }
                None => {}
            }
        }
        CgroupVersion::V2 => {
            values.push(("memory.max", memory.to_string()));
            // v2 limits swap alone, not memory plus swap.
            match limits.memory_swap {
                Some(MemorySwap::Bytes(total)) => {
                    values.push(("memory.swap.max", total.saturating_sub(memory).to_string()));
                }
                Some(MemorySwap::Unlimited) => values.push(("memory.swap.max", "max".to_owned())),
                None => {}
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(memory: Option<u64>, swap: Option<MemorySwap>) -> ResourceLimits {
        ResourceLimits {
            memory_bytes: memory,
            memory_swap: swap,
            ..ResourceLimits::default()
        }
    }

    #[test]
    fn v1_memory_and_swap() {
        let values = control_values(
            CgroupVersion::V1,
            &limits(Some(512 << 20), Some(MemorySwap::Bytes(1 << 30))),
        );
        assert_eq!(
            values,
            vec![
                ("memory.limit_in_bytes", "536870912".to_owned()),
                ("memory.memsw.limit_in_bytes", "1073741824".to_owned()),
            ]
        );
    }

    #[test]
    fn v1_unlimited_swap() {
        let values = control_values(
            CgroupVersion::V1,
            &limits(Some(4096), Some(MemorySwap::Unlimited)),
        );
        assert_eq!(values[1], ("memory.memsw.limit_in_bytes", "-1".to_owned()));
    }

    #[test]
    fn v2_swap_is_the_difference() {
        let values = control_values(
            CgroupVersion::V2,
            &limits(Some(1000), Some(MemorySwap::Bytes(1500))),
        );
        assert_eq!(
            values,
            vec![
                ("memory.max", "1000".to_owned()),
                ("memory.swap.max", "500".to_owned()),
            ]
        );
    }

    #[test]
    fn v2_unlimited_swap() {
        let values = control_values(
            CgroupVersion::V2,
            &limits(Some(1000), Some(MemorySwap::Unlimited)),
        );
        assert_eq!(values[1], ("memory.swap.max", "max".to_owned()));
    }

    #[test]
    fn nothing_without_memory_limit() {
        assert!(control_values(CgroupVersion::V2, &limits(None, None)).is_empty());
    }
}
