// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Device type column of the block-device listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockDeviceKind {
    Disk,
    Part,
    Other(String),
}

impl BlockDeviceKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "disk" => BlockDeviceKind::Disk,
            "part" => BlockDeviceKind::Part,
            other => BlockDeviceKind::Other(other.to_string()),
        }
    }
}

/// One row of the block-device inventory.
///
/// A `part` entry's `parent_name` is expected to reference a `disk` entry of the
/// same listing. Nothing enforces that; selection simply finds no match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceEntry {
    pub name: String,
    pub size_bytes: u64,
    pub kind: BlockDeviceKind,
    pub parent_name: Option<String>,
}

impl BlockDeviceEntry {
    pub fn is_disk(&self) -> bool {
        self.kind == BlockDeviceKind::Disk
    }

    pub fn is_partition(&self) -> bool {
        self.kind == BlockDeviceKind::Part
    }

    /// Device node path, e.g. `/dev/sdd1`
    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.name)
    }
}
