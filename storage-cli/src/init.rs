// SPDX-License-Identifier: GPL-3.0-only

//! `sqlrs init`: flag validation, backend resolution and store provisioning

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use storage_sys::paths::default_store_root;
use storage_sys::{HostPlatform, OsCommandRunner, StoreProvisioner, SystemClock, provisioner_for};
use storage_types::{ProvisionResult, SnapshotBackend, StoreRequest, StoreType};
use tracing::{debug, info};

use crate::cli::InitArgs;
use crate::{config, output};

/// What `init` settled on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub backend: SnapshotBackend,
    pub store_path: String,
    /// `engine.wsl.mode`, set only while a WSL btrfs store is in use
    pub wsl_mode: Option<&'static str>,
    pub result: ProvisionResult,
}

/// How a requested backend is satisfied on this platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPlan {
    /// Run the platform provisioner; on fallback use `fallback` with a plain directory
    Provision { require: bool, fallback: SnapshotBackend },
    /// No provisioning, a plain directory store
    Plain(SnapshotBackend),
}

pub fn plan_backend(snapshot: SnapshotBackend, platform: &HostPlatform) -> BackendPlan {
    let fallback = match platform {
        HostPlatform::Linux => SnapshotBackend::Overlay,
        _ => SnapshotBackend::Copy,
    };

    match snapshot {
        SnapshotBackend::Overlay | SnapshotBackend::Copy => BackendPlan::Plain(snapshot),
        SnapshotBackend::Btrfs => BackendPlan::Provision {
            require: true,
            fallback,
        },
        SnapshotBackend::Auto => BackendPlan::Provision {
            require: false,
            fallback,
        },
    }
}

/// Reject illegal flag combinations before anything touches the system
pub fn validate(args: &InitArgs, platform: &HostPlatform, config_exists: bool) -> Result<()> {
    if args.store_size.is_some() && args.store_type != StoreType::Image {
        bail!("--store-size requires --store image");
    }
    if args.store_size == Some(0) {
        bail!("--store-size must be at least 1 GB");
    }
    if args.store_type == StoreType::Device && args.store_path.is_none() {
        bail!("--store device requires --store-path");
    }
    if args.store_type == StoreType::Device && *platform == HostPlatform::Windows {
        bail!("device stores are not supported on Windows; use --store image");
    }
    if args.snapshot == SnapshotBackend::Overlay && *platform != HostPlatform::Linux {
        bail!("the overlay snapshot backend is only available on Linux");
    }
    if args.reinit && !args.update {
        bail!("--reinit requires --update");
    }
    if config_exists && !args.update {
        bail!("workspace already initialized; rerun with --update to change it");
    }
    Ok(())
}

pub fn build_request(args: &InitArgs, require: bool, verbose: bool) -> StoreRequest {
    StoreRequest {
        snapshot_backend: args.snapshot,
        store_type: args.store_type,
        store_path: args.store_path.clone(),
        size_gb: args.store_size,
        reinit: args.reinit,
        distro: args.distro.clone(),
        no_start: args.no_start,
        verbose,
        require,
    }
}

/// Directory used when no btrfs store is provisioned
fn plain_store_dir(args: &InitArgs, store_root: Option<&Path>) -> Result<PathBuf> {
    let explicit = match args.store_type {
        StoreType::Dir => args.store_path.as_deref(),
        StoreType::Image | StoreType::Device => None,
    };
    let dir = explicit
        .or(store_root)
        .context("cannot determine the store directory; set SQLRS_STATE_STORE or pass --store-path")?;

    fs::create_dir_all(dir).with_context(|| format!("failed to create store directory {}", dir.display()))?;
    Ok(dir.to_path_buf())
}

fn plain(backend: SnapshotBackend, dir: PathBuf, mut result: ProvisionResult) -> InitOutcome {
    let store_path = dir.to_string_lossy().into_owned();
    result.store_path = Some(store_path.clone());
    InitOutcome {
        backend,
        store_path,
        wsl_mode: None,
        result,
    }
}

/// Resolve the backend, provisioning through `provisioner` when needed
pub fn resolve(
    args: &InitArgs,
    platform: &HostPlatform,
    verbose: bool,
    provisioner: &dyn StoreProvisioner,
    store_root: Option<&Path>,
) -> Result<InitOutcome> {
    let (require, fallback) = match plan_backend(args.snapshot, platform) {
        BackendPlan::Plain(backend) => {
            let dir = plain_store_dir(args, store_root)?;
            return Ok(plain(backend, dir, ProvisionResult::default()));
        }
        BackendPlan::Provision { require, fallback } => (require, fallback),
    };

    let request = build_request(args, require, verbose);
    debug!("Provisioning with {} ({:?})", provisioner.name(), request);

    let result = provisioner
        .provision(&request)
        .context("btrfs store provisioning failed")?;

    if !result.use_store {
        info!("Continuing without btrfs; snapshot backend is {}", fallback);
        let dir = plain_store_dir(args, store_root)?;
        return Ok(plain(fallback, dir, result));
    }

    let store_path = result
        .store_path
        .clone()
        .context("provisioner reported a store without a path")?;
    let wsl_mode = (*platform == HostPlatform::Windows).then_some(if require { "required" } else { "auto" });

    Ok(InitOutcome {
        backend: SnapshotBackend::Btrfs,
        store_path,
        wsl_mode,
        result,
    })
}

pub fn run(args: &InitArgs, verbose: bool) -> Result<()> {
    let platform = HostPlatform::current();
    let config_path = config::config_path(&args.workspace);
    validate(args, &platform, config_path.exists())?;

    let runner = OsCommandRunner::new(verbose)?;
    let clock = SystemClock;
    let store_root = default_store_root();
    let provisioner = provisioner_for(&platform, &runner, &clock, store_root.clone());

    let outcome = resolve(args, &platform, verbose, provisioner.as_ref(), store_root.as_deref())?;
    output::print_warnings(&outcome.result);

    let mut workspace_config = config::load(&config_path)?;
    config::apply_outcome(&mut workspace_config, &outcome);
    config::save(&config_path, &workspace_config)?;
    info!("Wrote {}", config_path.display());

    if args.json {
        println!("{}", output::render_json(&outcome, &config_path)?);
    } else {
        print!("{}", output::render_human(&outcome, &config_path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_sys::UnsupportedProvisioner;

    fn args() -> InitArgs {
        InitArgs {
            workspace: PathBuf::from("."),
            snapshot: SnapshotBackend::Auto,
            store_type: StoreType::Dir,
            store_path: None,
            store_size: None,
            update: false,
            reinit: false,
            distro: None,
            no_start: false,
            json: false,
        }
    }

    /// Returns a canned result for every request
    struct Canned(ProvisionResult);

    impl StoreProvisioner for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn provision(&self, _request: &StoreRequest) -> storage_sys::Result<ProvisionResult> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn flag_combinations_are_checked_first() {
        let linux = HostPlatform::Linux;
        let windows = HostPlatform::Windows;

        let sized_dir = InitArgs {
            store_size: Some(10),
            ..args()
        };
        assert!(validate(&sized_dir, &linux, false).is_err());

        let bare_device = InitArgs {
            store_type: StoreType::Device,
            ..args()
        };
        assert!(validate(&bare_device, &linux, false).is_err());

        let overlay = InitArgs {
            snapshot: SnapshotBackend::Overlay,
            ..args()
        };
        assert!(validate(&overlay, &linux, false).is_ok());
        assert!(validate(&overlay, &windows, false).is_err());

        let reinit = InitArgs {
            reinit: true,
            ..args()
        };
        assert!(validate(&reinit, &linux, false).is_err());

        let error = validate(&args(), &linux, true).unwrap_err();
        assert!(error.to_string().contains("--update"));
    }

    #[test]
    fn explicit_btrfs_is_required_and_auto_is_not() {
        assert_eq!(
            plan_backend(SnapshotBackend::Btrfs, &HostPlatform::Windows),
            BackendPlan::Provision {
                require: true,
                fallback: SnapshotBackend::Copy
            }
        );
        assert_eq!(
            plan_backend(SnapshotBackend::Auto, &HostPlatform::Linux),
            BackendPlan::Provision {
                require: false,
                fallback: SnapshotBackend::Overlay
            }
        );
        assert_eq!(
            plan_backend(SnapshotBackend::Copy, &HostPlatform::Linux),
            BackendPlan::Plain(SnapshotBackend::Copy)
        );
    }

    #[test]
    fn fallback_uses_plain_directory_and_keeps_warning() {
        let root = tempfile::tempdir().unwrap();
        let store_root = root.path().join("store");
        let provisioner = UnsupportedProvisioner::new("freebsd");

        let outcome = resolve(
            &args(),
            &HostPlatform::Other("freebsd".into()),
            false,
            &provisioner,
            Some(&store_root),
        )
        .unwrap();

        assert_eq!(outcome.backend, SnapshotBackend::Copy);
        assert!(store_root.is_dir());
        assert!(outcome.wsl_mode.is_none());
        assert!(outcome.result.warning.contains("not supported"));
    }

    #[test]
    fn required_btrfs_failure_aborts() {
        let provisioner = UnsupportedProvisioner::new("freebsd");
        let explicit = InitArgs {
            snapshot: SnapshotBackend::Btrfs,
            ..args()
        };

        let error = resolve(&explicit, &HostPlatform::Other("freebsd".into()), false, &provisioner, None)
            .unwrap_err();
        assert!(format!("{error:#}").contains("not supported on freebsd"));
    }

    #[test]
    fn wsl_store_records_mode() {
        let provisioner = Canned(ProvisionResult {
            use_store: true,
            store_backend_available: true,
            store_path: Some("/home/dev/.local/state/sqlrs/store".to_string()),
            state_dir: Some("/home/dev/.local/state/sqlrs/store".to_string()),
            ..ProvisionResult::default()
        });

        let outcome = resolve(&args(), &HostPlatform::Windows, false, &provisioner, None).unwrap();
        assert_eq!(outcome.backend, SnapshotBackend::Btrfs);
        assert_eq!(outcome.wsl_mode, Some("auto"));
        assert_eq!(outcome.store_path, "/home/dev/.local/state/sqlrs/store");

        let outcome = resolve(&args(), &HostPlatform::Linux, false, &provisioner, None).unwrap();
        assert!(outcome.wsl_mode.is_none());
    }
}
