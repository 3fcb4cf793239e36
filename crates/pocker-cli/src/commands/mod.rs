//! CLI command definitions and dispatch.

pub mod images;
pub mod run;
pub mod sweep;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pocker_common::config::PockerConfig;

/// Pocker: run commands in throwaway Linux containers.
#[derive(Parser, Debug)]
#[command(name = "pocker", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file.
    #[arg(long, global = true, env = "POCKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Store root holding `images/` and `containers/`.
    #[arg(long, global = true)]
    pub store_root: Option<PathBuf>,

    /// Mount point of the cgroup filesystem.
    #[arg(long, global = true)]
    pub cgroup_root: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command in a new container.
    Run(run::RunArgs),
    /// Remove mounts, cgroups, and directories left by crashed runs.
    ///
    /// Containers that are still starting look like crashed ones, so do not
    /// sweep while another `pocker run` is starting.
    Sweep(sweep::SweepArgs),
    /// List local images.
    Images(images::ImagesArgs),
}

impl Cli {
    /// Loads the configuration file, if any, and applies flag overrides.
    fn load_config(&self) -> anyhow::Result<PockerConfig> {
        let mut config = match &self.config {
            Some(path) => PockerConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => PockerConfig::default(),
        };
        if let Some(root) = &self.store_root {
            config.store_root.clone_from(root);
        }
        if let Some(root) = &self.cgroup_root {
            config.cgroup_root.clone_from(root);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Dispatches the parsed CLI command and returns the process exit code.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the command fails
/// before the contained process could report an exit code.
pub fn execute(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.load_config()?;
    match cli.command {
        Command::Run(args) => run::execute(config, args),
        Command::Sweep(args) => sweep::execute(config, &args),
        Command::Images(args) => images::execute(&config, &args),
    }
}
