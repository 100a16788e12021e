// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use storage_types::{SnapshotBackend, StoreType};

#[derive(Debug, Parser)]
#[command(name = "sqlrs")]
#[command(version, about = "Instant database snapshots backed by copy-on-write storage")]
pub struct Cli {
    /// Log every external command and keep cleanup diagnostics
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Initialize a workspace and prepare its snapshot store
    Init(InitArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    /// Workspace directory; the config is written to <workspace>/.sqlrs/config.yaml
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Snapshot backend: auto, btrfs, overlay or copy
    #[arg(long, default_value = "auto")]
    pub snapshot: SnapshotBackend,

    /// Store backing: dir, image or device
    #[arg(long = "store", default_value = "dir")]
    pub store_type: StoreType,

    /// Store directory, image file (VHDX on Windows) or block device
    #[arg(long)]
    pub store_path: Option<PathBuf>,

    /// Image size in GB for image stores
    #[arg(long, value_name = "GB")]
    pub store_size: Option<u64>,

    /// Allow changing an initialized workspace
    #[arg(long)]
    pub update: bool,

    /// Destroy and recreate the store (requires --update)
    #[arg(long)]
    pub reinit: bool,

    /// WSL distro to provision in (Windows only)
    #[arg(long)]
    pub distro: Option<String>,

    /// Do not start the WSL distro first
    #[arg(long)]
    pub no_start: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> InitArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Init(args) => args,
        }
    }

    #[test]
    fn defaults_to_auto_directory_store() {
        let args = parse(&["sqlrs", "init"]);
        assert_eq!(args.snapshot, SnapshotBackend::Auto);
        assert_eq!(args.store_type, StoreType::Dir);
        assert_eq!(args.workspace, PathBuf::from("."));
        assert!(args.store_size.is_none());
    }

    #[test]
    fn parses_windows_image_flags() {
        let cli = Cli::try_parse_from([
            "sqlrs",
            "init",
            "--snapshot",
            "BTRFS",
            "--store",
            "image",
            "--store-size",
            "64",
            "--distro",
            "Ubuntu",
            "--update",
            "--reinit",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);

        let Command::Init(args) = cli.command;
        assert_eq!(args.snapshot, SnapshotBackend::Btrfs);
        assert_eq!(args.store_type, StoreType::Image);
        assert_eq!(args.store_size, Some(64));
        assert_eq!(args.distro.as_deref(), Some("Ubuntu"));
        assert!(args.update && args.reinit);
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["sqlrs", "init", "--snapshot", "zfs"]).is_err());
    }
}
