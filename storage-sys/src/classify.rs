// SPDX-License-Identifier: GPL-3.0-only

//! Classification of raw tool failures
//!
//! `umount`, `wsl.exe`, PowerShell and friends report failures only as text.
//! Every substring check on that text lives here.

use crate::error::SysError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Target was not mounted to begin with
    AlreadyUnmounted,
    /// The command itself is not installed
    ToolMissing,
    /// The disk or mount is held by someone else
    DeviceBusy,
    /// The virtual disk is already attached to WSL
    AlreadyAttached,
    /// The file or disk to remove no longer exists
    AlreadyAbsent,
    Other,
}

impl FailureKind {
    pub fn of(error: &SysError) -> Self {
        classify_failure(&error.to_string())
    }
}

pub fn classify_failure(text: &str) -> FailureKind {
    let lower = text.to_lowercase();

    // umount exits 32 for a busy target as well as for one that is not mounted
    if lower.contains("objectinuse")
        || lower.contains(" in use")
        || lower.contains("being used by another process")
        || lower.contains("target is busy")
        || lower.contains("device or resource busy")
    {
        return FailureKind::DeviceBusy;
    }

    if lower.contains("not mounted")
        || lower.contains("no mount point specified")
        || lower.contains("exit status 32")
        || lower.contains("wsl_e_disk_not_attached")
        || lower.contains("is not attached")
    {
        return FailureKind::AlreadyUnmounted;
    }

    if lower.contains("wsl_e_user_vhd_already_attached") || lower.contains("already attached") {
        return FailureKind::AlreadyAttached;
    }

    if lower.contains("command not found")
        || lower.contains("executable file not found")
        || lower.contains("is not recognized as")
        || lower.contains("exit status 127")
    {
        return FailureKind::ToolMissing;
    }

    if lower.contains("no such file or directory")
        || lower.contains("cannot find the file")
        || lower.contains("cannot find path")
        || lower.contains("does not exist")
    {
        return FailureKind::AlreadyAbsent;
    }

    FailureKind::Other
}
