//! # pocker: the Pocker CLI
//!
//! Runs a command inside an isolated, resource-limited container built
//! from a local image, then removes every trace of it.

#![allow(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use pocker_common::constants::SETUP_FAILURE_EXIT_CODE;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match commands::execute(cli) {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("pocker: {e:#}");
            exit_code(SETUP_FAILURE_EXIT_CODE)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
