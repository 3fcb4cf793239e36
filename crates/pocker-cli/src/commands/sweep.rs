//! `pocker sweep`: remove leftovers of crashed runs.

use clap::Args;
use pocker_common::config::PockerConfig;
use pocker_runtime::Engine;

/// Arguments for the `sweep` command.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Exit non-zero if anything could not be removed.
    #[arg(long)]
    pub strict: bool,
}

/// Executes the `sweep` command.
///
/// # Errors
///
/// Returns an error if the store or the cgroup tree cannot be listed.
pub fn execute(config: PockerConfig, args: &SweepArgs) -> anyhow::Result<i32> {
    let engine = Engine::new(config)?;
    let report = engine.sweep()?;

    for id in &report.cleaned {
        println!("removed {id}");
    }
    for id in &report.skipped {
        println!("skipped {id} (still running)");
    }
    for warning in &report.warnings {
        eprintln!("pocker: warning: {warning}");
    }
    if report.is_empty() {
        println!("nothing to clean");
    }

    Ok(i32::from(args.strict && !report.warnings.is_empty()))
}
