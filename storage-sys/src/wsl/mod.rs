// SPDX-License-Identifier: GPL-3.0-only

//! btrfs store bootstrap inside WSL2
//!
//! The store lives on a VHDX attached bare to the WSL kernel, formatted as
//! btrfs and mounted under the distro user's state directory by a systemd
//! mount unit, so it survives distro restarts.
//!
//! Failures come in three tiers. WSL itself being unusable is a warning (or an
//! error when btrfs was explicitly required). A failed stage after that makes
//! the result fall back with a `"<stage>: <cause>"` warning. Cleanup steps
//! during reinit only log.

mod distro;
mod health;
mod reinit;

use std::path::{Path, PathBuf};

use storage_types::{BlockDeviceEntry, MountUnit, ProvisionResult, StoreRequest, StoreType};
use tracing::{debug, info, warn};

use crate::btrfs::BtrfsManager;
use crate::error::{ProvisionStage, Result, SysError};
use crate::exec::{CommandRunner, Shell, Target, timeouts};
use crate::finalize::{chown_store, ensure_subvolumes};
use crate::inventory::{list_block_devices, select_disk_by_size, select_partition};
use crate::paths::{STORE_SUBDIR, VHDX_FILE_NAME, WSL_STATE_BASE_SCRIPT};
use crate::poll::{Clock, DEVICE_DISCOVERY, SYSTEMD_SETTLE, UUID_SETTLE};
use crate::systemd::MountSupervisor;
use crate::vhd::VirtualDiskManager;

pub use distro::{DistroInfo, parse_distro_list, select_distro};
pub use health::docker_health_warning;
pub use reinit::reinit_wsl_store;

const WSL_EXE: &str = "wsl.exe";

/// Shown after every WSL run that got as far as picking a distro
pub const SHUTDOWN_HINT: &str = "If WSL was already running, restart it with `wsl.exe --shutdown` so the store mount is picked up by every session";

const SYSTEMD_HINT: &str = "enable it with [boot] systemd=true in /etc/wsl.conf, then run wsl.exe --shutdown";

/// Packages providing the in-distro tools, keyed by tool
const WSL_TOOLS: [(&str, &str); 2] = [("mkfs.btrfs", "btrfs-progs"), ("nsenter", "util-linux")];

/// Outcome of stage 5: which privileged form later commands use
struct Toolchain {
    nsenter: bool,
}

pub struct WslProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    clock: &'a dyn Clock,
    store_root: Option<PathBuf>,
}

impl<'a> WslProvisioner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, clock: &'a dyn Clock, store_root: Option<PathBuf>) -> Self {
        Self {
            runner,
            clock,
            store_root,
        }
    }

    /// Host path of the VHDX backing the store
    pub fn vhdx_path(&self, request: &StoreRequest) -> Result<PathBuf> {
        if request.store_type == StoreType::Image
            && let Some(path) = &request.store_path
        {
            return Ok(path.clone());
        }

        self.store_root
            .as_ref()
            .map(|root| root.join(VHDX_FILE_NAME))
            .ok_or_else(|| {
                SysError::OperationFailed(
                    "cannot resolve the store root; set LOCALAPPDATA or SQLRS_STATE_STORE".to_string(),
                )
            })
    }

    pub fn provision(&self, request: &StoreRequest) -> Result<ProvisionResult> {
        if self.runner.locate(WSL_EXE).is_none() {
            return unavailable(request, "wsl.exe not found on PATH");
        }

        let host = Target::Host;
        let host_shell = Shell::new(self.runner, &host);
        let listing = match host_shell.run_timeout(
            "list WSL distros",
            WSL_EXE,
            &["--list", "--verbose"],
            timeouts::QUICK,
        ) {
            Ok(listing) => listing,
            Err(error) => return unavailable(request, error.to_string()),
        };

        let distro = match select_distro(&parse_distro_list(&listing), request.distro.as_deref()) {
            Ok(distro) => distro,
            Err(message) => return unavailable(request, message),
        };
        info!("Using WSL distro {} ({})", distro.name, distro.state);

        let mut result = ProvisionResult {
            distro: Some(distro.name.clone()),
            ..ProvisionResult::default()
        };

        let outcome = self.run_stages(request, &distro.name, &mut result);
        let mut result = match outcome {
            Ok(()) => result,
            Err(error) if request.require => return Err(error),
            Err(error) => {
                warn!("{}", error);
                let mut fallback = ProvisionResult {
                    distro: result.distro,
                    store_backend_available: result.store_backend_available,
                    warning: result.warning,
                    ..ProvisionResult::default()
                };
                fallback.warn(error.to_string());
                fallback
            }
        };

        result.warn(SHUTDOWN_HINT);
        Ok(result)
    }

    fn run_stages(&self, request: &StoreRequest, distro: &str, result: &mut ProvisionResult) -> Result<()> {
        let host = Target::Host;
        let host_shell = Shell::new(self.runner, &host);
        let user = Target::Wsl(distro.to_string());
        let user_shell = Shell::new(self.runner, &user);

        if !request.no_start {
            user_shell
                .run_timeout("start WSL distro", "true", &[], timeouts::START)
                .map_err(|error| error.at(ProvisionStage::DistroStart))?;
        }

        let plain_root = Target::WslRoot {
            distro: distro.to_string(),
            nsenter: false,
        };
        let plain_root_shell = Shell::new(self.runner, &plain_root);

        ensure_kernel_support(&user_shell, &plain_root_shell)
            .map_err(|error| error.at(ProvisionStage::KernelSupport))?;

        let toolchain = ensure_tools(&user_shell, &plain_root_shell, result)
            .map_err(|error| error.at(ProvisionStage::ToolInstall))?;
        result.store_backend_available = true;

        ensure_systemd(&user_shell, self.clock).map_err(|error| error.at(ProvisionStage::Systemd))?;

        if let Some(warning) = docker_health_warning(&host_shell) {
            result.warn(warning);
        }

        let disks = VirtualDiskManager::new(host_shell);
        match disks.is_elevated() {
            Ok(true) => {}
            Ok(false) => {
                return Err(SysError::OperationFailed(
                    "run the terminal as Administrator to create and attach the virtual disk".to_string(),
                )
                .at(ProvisionStage::Elevation));
            }
            Err(error) => return Err(error.at(ProvisionStage::Elevation)),
        }

        let root = Target::WslRoot {
            distro: distro.to_string(),
            nsenter: toolchain.nsenter,
        };
        let root_shell = Shell::new(self.runner, &root);
        let supervisor = MountSupervisor::new(root_shell, self.clock, request.verbose);

        let state_dir = resolve_state_dir(&user_shell).map_err(|error| error.at(ProvisionStage::StateDir))?;
        let unit_name = supervisor
            .unit_name_for(&state_dir)
            .map_err(|error| error.at(ProvisionStage::StateDir))?;
        result.state_dir = Some(state_dir.clone());

        let vhdx = self
            .vhdx_path(request)
            .map_err(|error| error.at(ProvisionStage::VirtualDisk))?;

        if request.reinit {
            reinit_wsl_store(
                &supervisor,
                &root_shell,
                &disks,
                &unit_name,
                &state_dir,
                &vhdx,
                request.verbose,
            )
            .map_err(|error| error.at(ProvisionStage::Reinit))?;
        }

        let attached = self.attach_store_disk(&disks, &user_shell, &vhdx, request.size_bytes())?;
        let allow_format = attached.created || request.reinit;
        let device = attached.partition.device_path();

        BtrfsManager::new(root_shell, self.clock)
            .ensure_btrfs(&device, allow_format)
            .map_err(|error| error.at(ProvisionStage::Format))?;

        let (what, uuid) = self.resolve_mount_source(&root_shell, &device, result);

        let unit = MountUnit::new(unit_name.clone(), what, state_dir.clone());
        supervisor
            .install(&unit)
            .and_then(|()| supervisor.activate(&unit))
            .map_err(|error| error.at(ProvisionStage::Mount))?;

        ensure_subvolumes(&root_shell, &state_dir).map_err(|error| error.at(ProvisionStage::Subvolumes))?;
        chown_store(&root_shell, &user_shell, &state_dir)
            .map_err(|error| error.at(ProvisionStage::Ownership))?;

        info!("btrfs store ready at {} ({})", state_dir, device);
        result.use_store = true;
        result.store_path = Some(state_dir);
        result.mount_device = Some(device);
        result.mount_fs_type = Some(storage_types::DEFAULT_FS_TYPE.to_string());
        result.mount_unit = Some(unit_name);
        result.mount_device_uuid = uuid;
        Ok(())
    }

    /// Find the store disk by size, creating, partitioning and attaching the
    /// VHDX when it is not visible yet.
    fn attach_store_disk(
        &self,
        disks: &VirtualDiskManager<'_>,
        user: &Shell<'_>,
        vhdx: &Path,
        size_bytes: u64,
    ) -> Result<AttachedDisk> {
        let detect = |error: SysError| error.at(ProvisionStage::DeviceDetection);
        let entries = list_block_devices(user).map_err(detect)?;

        if let Some(disk) = select_disk_by_size(&entries, size_bytes).map_err(detect)? {
            debug!("Store disk {} already attached", disk.name);
            let partition = select_partition(&entries, &disk.name).map_err(|_| {
                SysError::OperationFailed(format!(
                    "disk {} has no partition; rerun with --reinit to recreate the store",
                    disk.name
                ))
                .at(ProvisionStage::DeviceDetection)
            })?;
            return Ok(AttachedDisk {
                partition,
                created: false,
            });
        }

        let vdisk = |error: SysError| error.at(ProvisionStage::VirtualDisk);
        let created = disks.ensure_virtual_disk(vhdx, size_bytes).map_err(vdisk)?;
        disks.ensure_gpt_partition(vhdx).map_err(vdisk)?;
        disks.attach_to_wsl(vhdx).map_err(vdisk)?;

        let mut seen_disk = None;
        let mut ambiguous = None;
        let found = DEVICE_DISCOVERY.poll(self.clock, || {
            let entries = list_block_devices(user)
                .map_err(|error| debug!("block device listing not ready: {}", error))
                .ok()?;
            let disk = match select_disk_by_size(&entries, size_bytes) {
                Ok(disk) => disk?,
                Err(error) => {
                    ambiguous = Some(error);
                    return Some(None);
                }
            };
            seen_disk = Some(disk.name.clone());
            select_partition(&entries, &disk.name).ok().map(Some)
        });

        if let Some(error) = ambiguous {
            return Err(detect(error));
        }

        match (found.flatten(), seen_disk) {
            (Some(partition), _) => Ok(AttachedDisk { partition, created }),
            (None, Some(disk)) => Err(detect(SysError::OperationFailed(format!(
                "no partition on {disk} after initialization"
            )))),
            (None, None) => Err(detect(SysError::OperationFailed(format!(
                "attached virtual disk {} did not appear in the WSL block device list",
                vhdx.display()
            )))),
        }
    }

    /// Prefer the by-uuid link, falling back to the raw device node
    fn resolve_mount_source(
        &self,
        root: &Shell<'_>,
        device: &str,
        result: &mut ProvisionResult,
    ) -> (String, Option<String>) {
        let mut uuid = None;
        let link = UUID_SETTLE.poll(self.clock, || {
            let value = root
                .run_timeout(
                    "read filesystem UUID",
                    "blkid",
                    &["-s", "UUID", "-o", "value", device],
                    timeouts::PROBE,
                )
                .ok()?;
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            uuid = Some(value.to_string());

            let link = format!("/dev/disk/by-uuid/{value}");
            root.run_timeout("check UUID link", "test", &["-e", &link], timeouts::PROBE)
                .ok()
                .map(|_| link)
        });

        match link {
            Some(link) => (link, uuid),
            None => {
                result.warn(format!(
                    "filesystem UUID link for {device} not available; mounting by device path"
                ));
                (device.to_string(), uuid)
            }
        }
    }
}

struct AttachedDisk {
    partition: BlockDeviceEntry,
    created: bool,
}

fn unavailable(request: &StoreRequest, reason: impl Into<String>) -> Result<ProvisionResult> {
    let error = SysError::WslUnavailable(reason.into());
    if request.require {
        return Err(error);
    }
    warn!("{}", error);
    Ok(ProvisionResult::fallback(error.to_string()))
}

fn btrfs_listed(filesystems: &str) -> bool {
    filesystems
        .lines()
        .any(|line| line.split_whitespace().last() == Some("btrfs"))
}

fn ensure_kernel_support(user: &Shell<'_>, root: &Shell<'_>) -> Result<()> {
    let read = || user.run_timeout("read kernel filesystems", "cat", &["/proc/filesystems"], timeouts::QUICK);

    if btrfs_listed(&read()?) {
        return Ok(());
    }

    if let Err(error) = root.run_timeout("load btrfs module", "modprobe", &["btrfs"], timeouts::QUICK) {
        debug!("{}", error);
    }

    if btrfs_listed(&read()?) {
        return Ok(());
    }
    Err(SysError::OperationFailed(
        "btrfs is not listed in /proc/filesystems; update the WSL kernel (wsl.exe --update)".to_string(),
    ))
}

fn has_tool(user: &Shell<'_>, tool: &str) -> Result<bool> {
    match user.run_timeout("locate tool", "which", &[tool], timeouts::QUICK) {
        Ok(path) => Ok(!path.trim().is_empty()),
        Err(error) if error.exit_code().is_some() => Ok(false),
        Err(error) => Err(error),
    }
}

fn missing_tools(user: &Shell<'_>) -> Result<Vec<(&'static str, &'static str)>> {
    let mut missing = Vec::new();
    for (tool, package) in WSL_TOOLS {
        if !has_tool(user, tool)? {
            missing.push((tool, package));
        }
    }
    Ok(missing)
}

fn ensure_tools(user: &Shell<'_>, root: &Shell<'_>, result: &mut ProvisionResult) -> Result<Toolchain> {
    let missing = missing_tools(user)?;
    if missing.is_empty() {
        return Ok(Toolchain { nsenter: true });
    }

    let packages: Vec<&str> = missing.iter().map(|(_, package)| *package).collect();
    info!("Installing {} inside WSL", packages.join(", "));

    root.run_timeout("refresh package index", "apt-get", &["update", "-q"], timeouts::INSTALL)?;
    let mut args = vec!["install", "-y", "-q"];
    args.extend(&packages);
    root.run_timeout("install packages", "apt-get", &args, timeouts::INSTALL)?;

    let still_missing = missing_tools(user)?;
    if still_missing.iter().any(|(tool, _)| *tool == "mkfs.btrfs") {
        return Err(SysError::MissingTools(
            still_missing.iter().map(|(tool, _)| tool.to_string()).collect(),
        ));
    }

    let nsenter = !still_missing.iter().any(|(tool, _)| *tool == "nsenter");
    if !nsenter {
        result.warn("nsenter unavailable inside WSL; privileged commands run without entering the init mount namespace");
    }
    Ok(Toolchain { nsenter })
}

fn ensure_systemd(user: &Shell<'_>, clock: &dyn Clock) -> Result<()> {
    let mut last_state = String::new();
    let ready = SYSTEMD_SETTLE.poll(clock, || {
        let state = user
            .run_timeout(
                "check systemd",
                "sh",
                &["-c", "systemctl is-system-running 2>/dev/null || true"],
                timeouts::QUICK,
            )
            .map_err(|error| debug!("{}", error))
            .ok()?;
        last_state = state.trim().to_string();
        match last_state.as_str() {
            "running" | "degraded" => Some(true),
            "starting" | "initializing" => None,
            _ => Some(false),
        }
    });

    if ready == Some(true) {
        return Ok(());
    }
    let state = if last_state.is_empty() {
        "unknown"
    } else {
        last_state.as_str()
    };
    Err(SysError::OperationFailed(format!(
        "systemd is not running in the distro (state {state}); {SYSTEMD_HINT}"
    )))
}

fn resolve_state_dir(user: &Shell<'_>) -> Result<String> {
    let base = user.run_timeout(
        "resolve state directory",
        "sh",
        &["-c", WSL_STATE_BASE_SCRIPT],
        timeouts::QUICK,
    )?;
    let base = base.trim().trim_end_matches('/');
    if !base.starts_with('/') {
        return Err(SysError::OperationFailed(format!(
            "state directory base {base:?} is not an absolute path"
        )));
    }
    Ok(format!("{base}/{STORE_SUBDIR}"))
}
