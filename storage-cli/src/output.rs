// SPDX-License-Identifier: GPL-3.0-only

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use serde_json::json;
use storage_types::ProvisionResult;

use crate::init::InitOutcome;

/// One `warning:` line per accumulated warning, on stderr
pub fn print_warnings(result: &ProvisionResult) {
    for line in result.warnings() {
        eprintln!("warning: {line}");
    }
}

pub fn render_human(outcome: &InitOutcome, config_path: &Path) -> String {
    let result = &outcome.result;
    let mut text = String::new();

    let _ = writeln!(text, "Workspace config: {}", config_path.display());
    let _ = writeln!(text, "Snapshot backend: {}", outcome.backend);
    let _ = writeln!(text, "Store path: {}", outcome.store_path);

    if let Some(distro) = &result.distro
        && outcome.wsl_mode.is_some()
    {
        let _ = writeln!(text, "WSL distro: {distro}");
    }
    if let Some(unit) = &result.mount_unit {
        let _ = writeln!(text, "Mount unit: {unit}");
    }
    if let Some(device) = &result.mount_device {
        match &result.mount_device_uuid {
            Some(uuid) => {
                let _ = writeln!(text, "Mount device: {device} (UUID {uuid})");
            }
            None => {
                let _ = writeln!(text, "Mount device: {device}");
            }
        }
    }
    text
}

pub fn render_json(outcome: &InitOutcome, config_path: &Path) -> Result<String> {
    let report = json!({
        "configPath": config_path.display().to_string(),
        "snapshotBackend": outcome.backend,
        "storePath": outcome.store_path,
        "wslMode": outcome.wsl_mode,
        "store": outcome.result,
    });
    Ok(serde_json::to_string_pretty(&report)?)
}
