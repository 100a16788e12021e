// SPDX-License-Identifier: GPL-3.0-only

//! Platform dispatch for store provisioning

use std::fmt;
use std::path::PathBuf;

use storage_types::{ProvisionResult, StoreRequest};
use tracing::warn;

use crate::error::{Result, SysError};
use crate::exec::CommandRunner;
use crate::linux::LinuxStoreManager;
use crate::poll::Clock;
use crate::wsl::WslProvisioner;

/// Turns a [`StoreRequest`] into a ready store or a documented fallback.
///
/// `Ok` with `use_store == false` means "continue without btrfs"; `Err` is only
/// returned when the request has `require` set.
pub trait StoreProvisioner {
    fn name(&self) -> &'static str;

    fn provision(&self, request: &StoreRequest) -> Result<ProvisionResult>;
}

impl StoreProvisioner for WslProvisioner<'_> {
    fn name(&self) -> &'static str {
        "wsl"
    }

    fn provision(&self, request: &StoreRequest) -> Result<ProvisionResult> {
        WslProvisioner::provision(self, request)
    }
}

impl StoreProvisioner for LinuxStoreManager<'_> {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn provision(&self, request: &StoreRequest) -> Result<ProvisionResult> {
        LinuxStoreManager::provision(self, request)
    }
}

/// Hosts without a btrfs provisioning path
pub struct UnsupportedProvisioner {
    os: String,
}

impl UnsupportedProvisioner {
    pub fn new(os: impl Into<String>) -> Self {
        Self { os: os.into() }
    }
}

impl StoreProvisioner for UnsupportedProvisioner {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn provision(&self, request: &StoreRequest) -> Result<ProvisionResult> {
        let message = format!("btrfs store provisioning is not supported on {}", self.os);
        if request.require {
            return Err(SysError::OperationFailed(message));
        }
        warn!("{}", message);
        Ok(ProvisionResult::fallback(message))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    Linux,
    Other(String),
}

impl HostPlatform {
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "windows" => HostPlatform::Windows,
            "linux" => HostPlatform::Linux,
            other => HostPlatform::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPlatform::Windows => f.write_str("windows"),
            HostPlatform::Linux => f.write_str("linux"),
            HostPlatform::Other(os) => f.write_str(os),
        }
    }
}

/// The provisioner for `platform`
pub fn provisioner_for<'a>(
    platform: &HostPlatform,
    runner: &'a dyn CommandRunner,
    clock: &'a dyn Clock,
    store_root: Option<PathBuf>,
) -> Box<dyn StoreProvisioner + 'a> {
    match platform {
        HostPlatform::Windows => Box::new(WslProvisioner::new(runner, clock, store_root)),
        HostPlatform::Linux => Box::new(LinuxStoreManager::new(runner, clock, store_root)),
        HostPlatform::Other(os) => Box::new(UnsupportedProvisioner::new(os.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::{ManualClock, ScriptedRunner};

    #[test]
    fn dispatches_on_host_platform() {
        let runner = ScriptedRunner::new();
        let clock = ManualClock::default();

        let name = |os: &str| provisioner_for(&HostPlatform::from_os(os), &runner, &clock, None).name();
        assert_eq!(name("windows"), "wsl");
        assert_eq!(name("linux"), "linux");
        assert_eq!(name("macos"), "unsupported");
    }

    #[test]
    fn unsupported_platform_falls_back_unless_required() {
        let provisioner = UnsupportedProvisioner::new("freebsd");

        let result = provisioner.provision(&StoreRequest::default()).unwrap();
        assert!(!result.use_store);
        assert!(result.warning.contains("freebsd"));

        let request = StoreRequest {
            require: true,
            ..StoreRequest::default()
        };
        assert!(provisioner.provision(&request).is_err());
    }
}
