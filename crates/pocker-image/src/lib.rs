//! # pocker-image
//!
//! Image store for the Pocker runtime.
//!
//! Images are extracted directory trees under `<store>/images/<name>/`.
//! The store only resolves and lists them; archives are never unpacked
//! here.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod storage;

pub use storage::{ImageEntry, ImageStore};
