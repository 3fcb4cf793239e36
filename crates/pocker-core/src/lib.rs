//! # pocker-core
//!
//! Low-level Linux isolation primitives for the Pocker runtime.
//!
//! This crate provides safe abstractions over:
//! - **Host handles**: the mount table and the cgroup filesystem, reached
//!   only through [`host::MountTable`] and [`host::CgroupFs`].
//! - **Filesystem**: copy-on-write `OverlayFS` root filesystems and `pivot_root`.
//! - **Cgroups**: CPU and memory limits on v1 and v2 hierarchies.
//! - **Namespaces**: spawning a process into fresh mount, UTS, PID, and
//!   network namespaces.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod host;
pub mod namespace;
