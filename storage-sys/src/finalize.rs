// SPDX-License-Identifier: GPL-3.0-only

//! Subvolume layout and ownership of a freshly mounted store

use tracing::info;

use crate::error::{Result, SysError};
use crate::exec::{Shell, timeouts};

/// Subvolumes the engine expects at the top of the store
pub const STORE_SUBVOLUMES: [&str; 2] = ["images", "instances"];

/// Create any missing store subvolume; returns the ones created
pub fn ensure_subvolumes(root: &Shell<'_>, store_dir: &str) -> Result<Vec<String>> {
    let mut created = Vec::new();

    for name in STORE_SUBVOLUMES {
        let path = format!("{}/{}", store_dir.trim_end_matches('/'), name);
        match root.run_timeout(
            "inspect subvolume",
            "btrfs",
            &["subvolume", "show", &path],
            timeouts::QUICK,
        ) {
            Ok(_) => continue,
            Err(error) if error.exit_code().is_some() => {}
            Err(error) => return Err(error),
        }

        root.run("create subvolume", "btrfs", &["subvolume", "create", &path])?;
        info!("Created btrfs subvolume {}", path);
        created.push(name.to_string());
    }

    Ok(created)
}

/// `uid:gid` of the user a non-privileged shell runs as
pub fn invoking_owner(user: &Shell<'_>) -> Result<String> {
    let uid = user.run_timeout("resolve user id", "id", &["-u"], timeouts::QUICK)?;
    let gid = user.run_timeout("resolve group id", "id", &["-g"], timeouts::QUICK)?;
    let (uid, gid) = (uid.trim(), gid.trim());

    if uid.is_empty() || gid.is_empty() {
        return Err(SysError::OperationFailed(
            "id returned an empty user or group id".to_string(),
        ));
    }
    Ok(format!("{uid}:{gid}"))
}

/// Hand the whole store tree to the invoking user
pub fn chown_store(root: &Shell<'_>, user: &Shell<'_>, store_dir: &str) -> Result<String> {
    let owner = invoking_owner(user)?;
    root.run("change store ownership", "chown", &["-R", &owner, store_dir])?;
    Ok(owner)
}
