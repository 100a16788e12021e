// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Image size used when the caller does not pass a size.
pub const DEFAULT_STORE_SIZE_GB: u64 = 100;

/// Snapshot strategy the engine uses for cloning database images
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    #[default]
    Auto,
    Btrfs,
    Overlay,
    Copy,
}

impl SnapshotBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotBackend::Auto => "auto",
            SnapshotBackend::Btrfs => "btrfs",
            SnapshotBackend::Overlay => "overlay",
            SnapshotBackend::Copy => "copy",
        }
    }
}

impl fmt::Display for SnapshotBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SnapshotBackend::Auto),
            "btrfs" => Ok(SnapshotBackend::Btrfs),
            "overlay" => Ok(SnapshotBackend::Overlay),
            "copy" => Ok(SnapshotBackend::Copy),
            _ => Err(format!("Invalid snapshot backend: {}", s)),
        }
    }
}

/// How the store is backed on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// A directory; backed by a sibling loopback image when it is not already on btrfs
    #[default]
    Dir,
    /// A loopback image file (or a VHDX on Windows)
    Image,
    /// A raw block device
    Device,
}

impl StoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::Dir => "dir",
            StoreType::Image => "image",
            StoreType::Device => "device",
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dir" => Ok(StoreType::Dir),
            "image" => Ok(StoreType::Image),
            "device" => Ok(StoreType::Device),
            _ => Err(format!("Invalid store type: {}", s)),
        }
    }
}

/// Immutable input to one provisioning run.
///
/// Built once per `init` invocation, consumed synchronously and discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRequest {
    pub snapshot_backend: SnapshotBackend,
    pub store_type: StoreType,

    /// Explicit store location; `None` means the platform default under the state store root
    pub store_path: Option<PathBuf>,

    /// Requested image size in GiB; `None` means [`DEFAULT_STORE_SIZE_GB`]
    pub size_gb: Option<u64>,

    /// Destroy and recreate the backing disk and mount unit
    pub reinit: bool,

    /// WSL distro name; `None` selects the default distro
    pub distro: Option<String>,

    /// Skip starting the WSL distro
    pub no_start: bool,

    pub verbose: bool,

    /// Turn every provisioning failure into a hard error instead of a fallback warning
    pub require: bool,
}

impl StoreRequest {
    pub fn size_gb(&self) -> u64 {
        self.size_gb.unwrap_or(DEFAULT_STORE_SIZE_GB)
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_gb().saturating_mul(crate::GIB)
    }
}
