//! `pocker run`: run a command in a new container.

use clap::Args;
use pocker_common::config::PockerConfig;
use pocker_common::types::{MemorySwap, ResourceLimits, parse_memory_size};
use pocker_runtime::Engine;

use crate::output::format_bytes;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image to root the container in.
    #[arg(short, long, visible_alias = "image-name", default_value = "ubuntu")]
    pub image: String,

    /// Memory limit, e.g. `512m` or `1GiB`.
    #[arg(long, value_parser = parse_memory_size)]
    pub memory: Option<u64>,

    /// Memory plus swap limit, or `-1` for unlimited swap.
    #[arg(long, value_parser = MemorySwap::parse, allow_hyphen_values = true)]
    pub memory_swap: Option<MemorySwap>,

    /// Relative CPU weight (2 to 262144).
    #[arg(long)]
    pub cpu_shares: Option<u64>,

    /// CPU time allowed per 100 ms period, in microseconds.
    #[arg(long)]
    pub cpu_quota_us: Option<u64>,

    /// Command and arguments to run.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_shares: self.cpu_shares,
            cpu_quota_us: self.cpu_quota_us,
            memory_bytes: self.memory,
            memory_swap: self.memory_swap,
        }
    }
}

/// Executes the `run` command and returns the contained command's exit code.
///
/// Ctrl+C is forwarded to the container: the first press sends `SIGTERM`,
/// later presses `SIGKILL`. Cleanup always runs.
///
/// # Errors
///
/// Returns an error if the container cannot be set up.
pub fn execute(config: PockerConfig, args: RunArgs) -> anyhow::Result<i32> {
    let engine = Engine::new(config)?;
    let limits = args.limits();
    if let Some(memory) = limits.memory_bytes {
        tracing::debug!(limit = %format_bytes(memory), "memory limit requested");
    }

    let cancel = engine.cancel_handle();
    ctrlc::set_handler(move || {
        let _ = cancel.cancel();
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let outcome = engine.run(&args.image, &args.command, &limits)?;
    for warning in &outcome.warnings {
        eprintln!("pocker: warning: {warning}");
    }
    tracing::debug!(
        id = %outcome.container_id,
        status = %outcome.status,
        "run finished"
    );
    Ok(outcome.exit_code)
}
