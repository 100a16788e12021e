// SPDX-License-Identifier: GPL-3.0-only

//! Full teardown of a previous WSL store before it is recreated

use std::path::Path;

use tracing::{debug, info, warn};

use crate::btrfs::release_mount;
use crate::error::Result;
use crate::exec::Shell;
use crate::systemd::MountSupervisor;
use crate::vhd::VirtualDiskManager;

fn best_effort(verbose: bool, step: &str, result: Result<()>) {
    if let Err(error) = result {
        if verbose {
            warn!("{} (continuing): {}", step, error);
        } else {
            debug!("{} (continuing): {}", step, error);
        }
    }
}

/// Remove the mount unit, the mount, the WSL attachment and the disk file.
///
/// The mount must be gone and the disk file deleted; detaching the disk is best
/// effort since a previous run may have left any subset behind.
pub fn reinit_wsl_store(
    supervisor: &MountSupervisor<'_>,
    root: &Shell<'_>,
    disks: &VirtualDiskManager<'_>,
    unit_name: &str,
    state_dir: &str,
    vhdx: &Path,
    verbose: bool,
) -> Result<()> {
    info!("Reinitializing btrfs store at {}", state_dir);

    supervisor.teardown(unit_name);

    release_mount(root, state_dir, verbose)?;

    best_effort(verbose, "detach virtual disk from WSL", disks.detach_from_wsl(vhdx));
    best_effort(verbose, "dismount virtual disk", disks.dismount(vhdx));

    disks.delete(vhdx)?;
    info!("Removed virtual disk {}", vhdx.display());
    Ok(())
}
