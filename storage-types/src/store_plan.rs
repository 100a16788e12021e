// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Native store layout.
///
/// `store_dir` is always set. Exactly one of `image_path` / `device_path` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePlan {
    pub store_dir: PathBuf,
    pub image_path: Option<PathBuf>,
    pub device_path: Option<PathBuf>,
}

impl StorePlan {
    /// The path handed to `mkfs.btrfs` and `mount`
    pub fn backing_path(&self) -> Option<&PathBuf> {
        self.image_path.as_ref().or(self.device_path.as_ref())
    }

    pub fn is_image(&self) -> bool {
        self.image_path.is_some()
    }
}
