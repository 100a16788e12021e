// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Outcome of one provisioning run.
///
/// `use_store == false` without an error means "fell back, proceed without btrfs";
/// `warning` explains why and accumulates every non-fatal anomaly seen on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResult {
    pub use_store: bool,
    pub store_backend_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distro: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_fs_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_unit: Option<String>,
    #[serde(rename = "mountDeviceUUID", skip_serializing_if = "Option::is_none")]
    pub mount_device_uuid: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub warning: String,
}

impl ProvisionResult {
    /// A result that tells the caller to continue without the btrfs store
    pub fn fallback(message: impl AsRef<str>) -> Self {
        let mut result = Self::default();
        result.warn(message);
        result
    }

    /// Append a warning line
    pub fn warn(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref().trim();
        if message.is_empty() {
            return;
        }
        if !self.warning.is_empty() {
            self.warning.push('\n');
        }
        self.warning.push_str(message);
    }

    /// Warning lines in the order they were recorded
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.warning.lines().filter(|line| !line.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::ProvisionResult;

    #[test]
    fn warnings_join_with_newlines_and_skip_blank_messages() {
        let mut result = ProvisionResult::fallback("WSL unavailable: wsl.exe not found");
        result.warn("   ");
        result.warn("second");

        assert!(!result.use_store);
        assert_eq!(result.warning, "WSL unavailable: wsl.exe not found\nsecond");
        assert_eq!(result.warnings().count(), 2);
    }

    #[test]
    fn serializes_uuid_field_with_config_casing() {
        let result = ProvisionResult {
            use_store: true,
            mount_device_uuid: Some("1111-2222".to_string()),
            ..ProvisionResult::default()
        };

        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["mountDeviceUUID"], "1111-2222");
        assert_eq!(json["useStore"], true);
        assert!(json.get("warning").is_none());
    }
}
