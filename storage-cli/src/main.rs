// SPDX-License-Identifier: GPL-3.0-only

//! sqlrs command line
//!
//! Only workspace initialization lives here: it resolves the snapshot backend,
//! provisions the btrfs store when that backend needs one and records the
//! outcome in the workspace config.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

mod cli;
mod config;
mod init;
mod output;

use cli::{Cli, Command};

const DEFAULT_FILTER: &str = "sqlrs=info,warn";
const VERBOSE_FILTER: &str = "sqlrs=debug,storage_sys=debug,warn";

fn main() -> Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if cli.verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
        }))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Command::Init(args) => init::run(&args, cli.verbose),
    }
}
