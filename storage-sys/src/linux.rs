// SPDX-License-Identifier: GPL-3.0-only

//! Native btrfs store manager for Linux hosts
//!
//! Same create, detect, format, mount, verify, chown sequence as the WSL
//! bootstrapper, run directly on the host with `sudo` instead of inside a
//! distro. A store directory that already sits on btrfs is reused as is.

use std::path::{Path, PathBuf};

use storage_types::{DEFAULT_FS_TYPE, ProvisionResult, StorePlan, StoreRequest, StoreType};
use tracing::{debug, info, warn};

use crate::btrfs::{BtrfsManager, mountpoint_fs_type, release_mount};
use crate::error::{ProvisionStage, Result, SysError};
use crate::exec::{CommandRunner, Shell, Target, timeouts};
use crate::finalize::{chown_store, invoking_owner};
use crate::poll::Clock;

/// File extensions that mark a store path as an image file
pub const IMAGE_EXTENSIONS: [&str; 4] = ["img", "raw", "btrfs", "image"];

const IMAGE_SUFFIX: &str = ".img";

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(extension))
        })
}

/// `<dir>.img` next to `dir`
fn sibling_image(dir: &Path) -> Result<PathBuf> {
    let name = dir.file_name().ok_or_else(|| {
        SysError::OperationFailed(format!("cannot place a store image next to {}", dir.display()))
    })?;
    let mut image = name.to_os_string();
    image.push(IMAGE_SUFFIX);
    Ok(dir.with_file_name(image))
}

fn missing_root() -> SysError {
    SysError::OperationFailed(
        "cannot determine the default store directory; set SQLRS_STATE_STORE or pass --store-path".to_string(),
    )
}

/// Derive the store directory and its backing file or device
pub fn plan_store(store_type: StoreType, store_path: Option<&Path>, store_root: Option<&Path>) -> Result<StorePlan> {
    match store_type {
        StoreType::Device => {
            let device = store_path.ok_or_else(|| {
                SysError::OperationFailed("a device store needs an explicit device path".to_string())
            })?;
            let store_dir = store_root.ok_or_else(missing_root)?;
            Ok(StorePlan {
                store_dir: store_dir.to_path_buf(),
                image_path: None,
                device_path: Some(device.to_path_buf()),
            })
        }
        StoreType::Image if store_path.is_some_and(has_image_extension) => {
            let image = store_path.ok_or_else(missing_root)?;
            let store_dir = image
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            Ok(StorePlan {
                store_dir: store_dir.to_path_buf(),
                image_path: Some(image.to_path_buf()),
                device_path: None,
            })
        }
        StoreType::Image | StoreType::Dir => {
            let store_dir = store_path.or(store_root).ok_or_else(missing_root)?;
            Ok(StorePlan {
                store_dir: store_dir.to_path_buf(),
                image_path: Some(sibling_image(store_dir)?),
                device_path: None,
            })
        }
    }
}

/// Host tools the plan needs
pub fn required_tools(plan: &StorePlan, is_root: bool) -> Vec<&'static str> {
    let mut tools = vec!["mkfs.btrfs", "mount", "umount", "findmnt"];
    if plan.is_image() {
        tools.push("truncate");
    }
    if !is_root {
        tools.push("sudo");
    }
    tools
}

pub fn check_prerequisites(runner: &dyn CommandRunner, plan: &StorePlan) -> Result<()> {
    let missing: Vec<String> = required_tools(plan, runner.is_root())
        .into_iter()
        .filter(|tool| runner.locate(tool).is_none())
        .map(ToString::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SysError::MissingTools(missing))
    }
}

/// Closest existing ancestor of `path`, `path` included
fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|ancestor| ancestor.exists())
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub struct LinuxStoreManager<'a> {
    runner: &'a dyn CommandRunner,
    clock: &'a dyn Clock,
    store_root: Option<PathBuf>,
}

impl<'a> LinuxStoreManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, clock: &'a dyn Clock, store_root: Option<PathBuf>) -> Self {
        Self {
            runner,
            clock,
            store_root,
        }
    }

    pub fn plan(&self, request: &StoreRequest) -> Result<StorePlan> {
        plan_store(
            request.store_type,
            request.store_path.as_deref(),
            self.store_root.as_deref(),
        )
    }

    /// Whether `dir`, or its closest existing ancestor, is on btrfs
    pub fn is_on_btrfs(&self, dir: &Path) -> bool {
        let Some(existing) = existing_ancestor(dir) else {
            return false;
        };
        let host = Target::Host;
        match Shell::new(self.runner, &host).run_timeout(
            "check store filesystem",
            "stat",
            &["-f", "-c", "%T", &display(existing)],
            timeouts::PROBE,
        ) {
            Ok(output) => output.trim() == DEFAULT_FS_TYPE,
            Err(error) => {
                debug!("{}", error);
                false
            }
        }
    }

    pub fn provision(&self, request: &StoreRequest) -> Result<ProvisionResult> {
        match self.init_local_btrfs_store(request) {
            Ok(result) => Ok(result),
            Err(error) if request.require => Err(error),
            Err(error) => {
                warn!("{}", error);
                Ok(ProvisionResult::fallback(error.to_string()))
            }
        }
    }

    pub fn init_local_btrfs_store(&self, request: &StoreRequest) -> Result<ProvisionResult> {
        let plan = self.plan(request)?;
        let store_dir = display(&plan.store_dir);
        let root = Target::HostRoot;
        let root_shell = Shell::new(self.runner, &root);
        let host = Target::Host;
        let user_shell = Shell::new(self.runner, &host);

        if request.reinit {
            self.reinit(&root_shell, &plan, request.verbose)
                .map_err(|error| error.at(ProvisionStage::Reinit))?;
        }

        if self.is_on_btrfs(&plan.store_dir) {
            info!("{} is already on btrfs", store_dir);
            if !plan.store_dir.exists() {
                self.create_store_dir(&root_shell, &user_shell, &store_dir)
                    .map_err(|error| error.at(ProvisionStage::Ownership))?;
            }
            return Ok(ProvisionResult {
                use_store: true,
                store_backend_available: true,
                store_path: Some(store_dir),
                ..ProvisionResult::default()
            });
        }

        check_prerequisites(self.runner, &plan).map_err(|error| error.at(ProvisionStage::Prerequisites))?;

        let backing = plan
            .backing_path()
            .ok_or_else(|| SysError::OperationFailed("store plan has no backing file or device".to_string()))?;
        let created = if plan.is_image() {
            self.ensure_image(&root_shell, backing, request.size_gb())
                .map_err(|error| error.at(ProvisionStage::StoreImage))?
        } else {
            false
        };
        let backing = display(backing);

        BtrfsManager::new(root_shell, self.clock)
            .ensure_btrfs(&backing, created || request.reinit)
            .map_err(|error| error.at(ProvisionStage::Format))?;

        self.mount(&root_shell, &plan, &backing, &store_dir)
            .map_err(|error| error.at(ProvisionStage::LocalMount))?;

        chown_store(&root_shell, &user_shell, &store_dir)
            .map_err(|error| error.at(ProvisionStage::Ownership))?;

        info!("btrfs store ready at {} ({})", store_dir, backing);
        Ok(ProvisionResult {
            use_store: true,
            store_backend_available: true,
            store_path: Some(store_dir),
            mount_device: Some(backing),
            mount_fs_type: Some(DEFAULT_FS_TYPE.to_string()),
            ..ProvisionResult::default()
        })
    }

    /// Create a missing store directory as root and hand it to the invoking user
    fn create_store_dir(&self, root: &Shell<'_>, user: &Shell<'_>, store_dir: &str) -> Result<()> {
        root.run_timeout("create store directory", "mkdir", &["-p", store_dir], timeouts::QUICK)?;
        let owner = invoking_owner(user)?;
        root.run_timeout("change store ownership", "chown", &[&owner, store_dir], timeouts::QUICK)?;
        Ok(())
    }

    /// Create a sparse image unless one exists; returns whether it was created
    fn ensure_image(&self, root: &Shell<'_>, image: &Path, size_gb: u64) -> Result<bool> {
        if image.exists() {
            debug!("Store image {} already exists", image.display());
            return Ok(false);
        }

        if let Some(parent) = image.parent().filter(|parent| !parent.exists()) {
            root.run_timeout("create image directory", "mkdir", &["-p", &display(parent)], timeouts::QUICK)?;
        }

        let size = format!("{size_gb}G");
        root.run_timeout("create store image", "truncate", &["-s", &size, &display(image)], timeouts::QUICK)?;
        info!("Created store image {} ({})", image.display(), size);
        Ok(true)
    }

    fn mount(&self, root: &Shell<'_>, plan: &StorePlan, backing: &str, store_dir: &str) -> Result<()> {
        root.run_timeout("create store directory", "mkdir", &["-p", store_dir], timeouts::QUICK)?;

        match mountpoint_fs_type(root, store_dir)? {
            Some(fs_type) if fs_type == DEFAULT_FS_TYPE => {
                debug!("{} already mounted", store_dir);
                return Ok(());
            }
            Some(fs_type) => {
                return Err(SysError::MountTypeMismatch {
                    target: store_dir.to_string(),
                    expected: DEFAULT_FS_TYPE.to_string(),
                    actual: fs_type,
                });
            }
            None => {}
        }

        if plan.is_image() {
            root.run("mount store image", "mount", &["-o", "loop", backing, store_dir])?;
        } else {
            root.run("mount store device", "mount", &[backing, store_dir])?;
        }

        match mountpoint_fs_type(root, store_dir)? {
            Some(fs_type) if fs_type == DEFAULT_FS_TYPE => Ok(()),
            other => Err(SysError::MountTypeMismatch {
                target: store_dir.to_string(),
                expected: DEFAULT_FS_TYPE.to_string(),
                actual: other.unwrap_or_else(|| "nothing".to_string()),
            }),
        }
    }

    /// Unmount the store and remove its image so both are recreated
    fn reinit(&self, root: &Shell<'_>, plan: &StorePlan, verbose: bool) -> Result<()> {
        release_mount(root, &display(&plan.store_dir), verbose)?;

        if let Some(image) = &plan.image_path {
            root.run_timeout("remove store image", "rm", &["-f", &display(image)], timeouts::QUICK)?;
            info!("Removed store image {}", image.display());
        }
        Ok(())
    }
}
