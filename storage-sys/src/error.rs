// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error types for store provisioning
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external command could not be spawned, timed out or exited non-zero
    #[error("{description}: {reason}{}", stderr_suffix(.stderr))]
    CommandFailed {
        description: String,
        reason: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse block device inventory: {0}")]
    InventoryParse(String),

    #[error(
        "multiple disks match size {target_bytes} bytes: {}; detach the extra disk or rerun with --reinit",
        .candidates.join(", ")
    )]
    AmbiguousDisk {
        target_bytes: u64,
        candidates: Vec<String>,
    },

    #[error("no partition found on disk {0}")]
    PartitionNotFound(String),

    #[error(
        "virtual disk {0} is in use; rerun with --reinit or detach it manually (wsl.exe --unmount, Dismount-VHD)"
    )]
    DiskInUse(String),

    #[error("{device} is mounted as {fs_type}, not btrfs; rerun with --reinit to recreate the store")]
    MountedForeign { device: String, fs_type: String },

    #[error("{device} contains a {fs_type} filesystem; rerun with --reinit to reformat it as btrfs")]
    ForeignFilesystem { device: String, fs_type: String },

    #[error("{0} has no btrfs filesystem; rerun with --reinit to format it")]
    Unformatted(String),

    #[error("btrfs not detected on {device} after formatting: {reason}")]
    VerifyFailed { device: String, reason: String },

    #[error("invalid mount unit: {0}")]
    InvalidMountUnit(String),

    #[error("{target} is mounted as {actual}, expected {expected}")]
    MountTypeMismatch {
        target: String,
        expected: String,
        actual: String,
    },

    #[error("missing required tools: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error("WSL unavailable: {0}")]
    WslUnavailable(String),

    #[error("{stage}: {source}")]
    Stage {
        stage: ProvisionStage,
        #[source]
        source: Box<SysError>,
    },

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl SysError {
    pub fn command(description: &str, reason: impl Into<String>, code: Option<i32>, stderr: &str) -> Self {
        SysError::CommandFailed {
            description: description.to_string(),
            reason: reason.into(),
            code,
            stderr: stderr.trim().to_string(),
        }
    }

    pub fn timeout(description: &str, timeout: Duration) -> Self {
        SysError::command(
            description,
            format!("timed out after {}s", timeout.as_secs()),
            None,
            "",
        )
    }

    /// Exit code of a failed command, when the command ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SysError::CommandFailed { code, .. } => *code,
            SysError::Stage { source, .. } => source.exit_code(),
            _ => None,
        }
    }

    pub fn at(self, stage: ProvisionStage) -> Self {
        SysError::Stage {
            stage,
            source: Box::new(self),
        }
    }
}

/// Named pipeline stages; the label prefixes the warning shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStage {
    DistroStart,
    KernelSupport,
    ToolInstall,
    Systemd,
    Elevation,
    StateDir,
    Reinit,
    VirtualDisk,
    DeviceDetection,
    Format,
    Mount,
    Subvolumes,
    Ownership,
    Prerequisites,
    StoreImage,
    LocalMount,
}

impl ProvisionStage {
    pub fn label(&self) -> &'static str {
        match self {
            ProvisionStage::DistroStart => "WSL distro start failed",
            ProvisionStage::KernelSupport => "btrfs kernel support unavailable",
            ProvisionStage::ToolInstall => "btrfs-progs install failed",
            ProvisionStage::Systemd => "systemd unavailable",
            ProvisionStage::Elevation => "Administrator privileges required",
            ProvisionStage::StateDir => "WSL state directory resolution failed",
            ProvisionStage::Reinit => "reinit failed",
            ProvisionStage::VirtualDisk => "virtual disk setup failed",
            ProvisionStage::DeviceDetection => "block device detection failed",
            ProvisionStage::Format => "btrfs format failed",
            ProvisionStage::Mount => "WSL mount failed",
            ProvisionStage::Subvolumes => "btrfs subvolume setup failed",
            ProvisionStage::Ownership => "store ownership update failed",
            ProvisionStage::Prerequisites => "btrfs prerequisites missing",
            ProvisionStage::StoreImage => "store image setup failed",
            ProvisionStage::LocalMount => "btrfs store mount failed",
        }
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, SysError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failure_embeds_description_and_trimmed_stderr() {
        let error = SysError::command("format btrfs", "exit status 1", Some(1), "  bad superblock \n");
        assert_eq!(error.to_string(), "format btrfs: exit status 1: bad superblock");
        assert_eq!(error.exit_code(), Some(1));

        let error = SysError::command("list distros", "exit status 1", Some(1), "   ");
        assert_eq!(error.to_string(), "list distros: exit status 1");
    }

    #[test]
    fn stage_wrapper_prefixes_label() {
        let error = SysError::Unformatted("/dev/sdd1".to_string()).at(ProvisionStage::Format);
        assert!(error
            .to_string()
            .starts_with("btrfs format failed: /dev/sdd1 has no btrfs filesystem"));
    }
}
