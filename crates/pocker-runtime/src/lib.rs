//! Container lifecycle management for the Pocker runtime.
//!
//! [`Engine::run`] drives one container from image resolution to teardown;
//! [`sweep::sweep`] removes what crashed runs left behind.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod engine;
pub mod sweep;

pub use engine::{CancelHandle, Engine, RunOutcome};
pub use sweep::SweepReport;
