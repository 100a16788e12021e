// SPDX-License-Identifier: GPL-3.0-only

//! Virtual disk manager for Windows hosts
//!
//! Creates a dynamically sized VHDX, gives it a single GPT partition and
//! attaches it to the WSL kernel as a bare block device. All host-side work is
//! done through PowerShell and `wsl.exe`, which need an elevated session.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::classify::FailureKind;
use crate::error::{Result, SysError};
use crate::exec::{Shell, timeouts};

const POWERSHELL: &str = "powershell.exe";
const WSL_EXE: &str = "wsl.exe";

pub struct VirtualDiskManager<'a> {
    host: Shell<'a>,
}

impl<'a> VirtualDiskManager<'a> {
    pub fn new(host: Shell<'a>) -> Self {
        Self { host }
    }

    fn powershell(&self, description: &str, script: &str) -> Result<String> {
        self.host.run(
            description,
            POWERSHELL,
            &["-NoProfile", "-NonInteractive", "-Command", script],
        )
    }

    /// Create the disk file unless it exists; returns whether it was created.
    ///
    /// Only a freshly created disk may be formatted without `--reinit`.
    pub fn ensure_virtual_disk(&self, path: &Path, size_bytes: u64) -> Result<bool> {
        if path.exists() {
            debug!("Virtual disk {} already exists", path.display());
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let script = format!(
            "$ErrorActionPreference = 'Stop'; New-VHD -Path {} -SizeBytes {} -Dynamic | Out-Null",
            quote(path),
            size_bytes
        );
        self.powershell("create virtual disk", &script)?;
        info!("Created virtual disk {} ({} bytes)", path.display(), size_bytes);
        Ok(true)
    }

    /// Give the disk a GPT label and one full-size partition.
    ///
    /// The disk is attached to the host for the duration and detached again only
    /// when it was not attached on entry.
    pub fn ensure_gpt_partition(&self, path: &Path) -> Result<()> {
        let script = partition_script(path);
        self.powershell("partition virtual disk", &script)
            .map_err(|error| match FailureKind::of(&error) {
                FailureKind::DeviceBusy => SysError::DiskInUse(path.display().to_string()),
                _ => error,
            })?;
        Ok(())
    }

    /// Attach the disk to the WSL kernel without mounting any partition
    pub fn attach_to_wsl(&self, path: &Path) -> Result<()> {
        let path = path.display().to_string();
        match self.host.run_timeout(
            "attach virtual disk to WSL",
            WSL_EXE,
            &["--mount", "--vhd", &path, "--bare"],
            timeouts::QUICK,
        ) {
            Ok(_) => Ok(()),
            Err(error) if FailureKind::of(&error) == FailureKind::AlreadyAttached => {
                debug!("{} already attached to WSL", path);
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    pub fn detach_from_wsl(&self, path: &Path) -> Result<()> {
        let path = path.display().to_string();
        self.host
            .run_timeout("detach virtual disk from WSL", WSL_EXE, &["--unmount", &path], timeouts::QUICK)
            .map(|_| ())
    }

    pub fn dismount(&self, path: &Path) -> Result<()> {
        let script = format!(
            "$ErrorActionPreference = 'Stop'; Dismount-VHD -Path {}",
            quote(path)
        );
        self.powershell("dismount virtual disk", &script).map(|_| ())
    }

    /// Delete the disk file; an already missing file is fine
    pub fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Whether the host session is elevated (Administrator)
    pub fn is_elevated(&self) -> Result<bool> {
        let output = self.host.run_timeout(
            "check Administrator privileges",
            POWERSHELL,
            &[
                "-NoProfile",
                "-NonInteractive",
                "-Command",
                "([Security.Principal.WindowsPrincipal][Security.Principal.WindowsIdentity]::GetCurrent()).IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)",
            ],
            timeouts::QUICK,
        )?;
        Ok(output.trim().eq_ignore_ascii_case("true"))
    }
}

/// Single-quoted PowerShell literal
fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

fn partition_script(path: &Path) -> String {
    let path = quote(path);
    [
        "$ErrorActionPreference = 'Stop'".to_string(),
        format!("$path = {path}"),
        "$wasAttached = (Get-VHD -Path $path).Attached".to_string(),
        "if (-not $wasAttached) { Mount-VHD -Path $path -NoDriveLetter }".to_string(),
        "try {".to_string(),
        "  $disk = Get-VHD -Path $path | Get-Disk".to_string(),
        "  if ($disk.PartitionStyle -eq 'RAW') { Initialize-Disk -Number $disk.Number -PartitionStyle GPT }".to_string(),
        "  $parts = @(Get-Partition -DiskNumber $disk.Number -ErrorAction SilentlyContinue | Where-Object { $_.Type -ne 'Reserved' })".to_string(),
        "  if ($parts.Count -eq 0) { New-Partition -DiskNumber $disk.Number -UseMaximumSize -AssignDriveLetter:$false | Out-Null }".to_string(),
        "} finally {".to_string(),
        "  if (-not $wasAttached) { Dismount-VHD -Path $path }".to_string(),
        "}".to_string(),
    ]
    .join("\n")
}
