// SPDX-License-Identifier: GPL-3.0-only

//! btrfs store provisioning for sqlrs
//!
//! Prepares the copy-on-write filesystem the snapshot engine stores database
//! states on, natively on Linux or inside WSL2 on Windows:
//! - virtual disk and loopback image management
//! - block device discovery and btrfs formatting
//! - systemd mount units, subvolumes and ownership
//!
//! Every external command goes through a [`CommandRunner`], so the whole
//! pipeline runs against [`exec::scripted::ScriptedRunner`] in tests (feature
//! `testing`).
//!
//! Two `init` runs against the same workspace at the same time are not
//! supported; nothing here takes a lock.

pub mod btrfs;
pub mod classify;
pub mod error;
pub mod exec;
pub mod finalize;
pub mod inventory;
pub mod linux;
pub mod paths;
pub mod poll;
pub mod provisioner;
pub mod systemd;
pub mod vhd;
pub mod wsl;

pub use classify::{FailureKind, classify_failure};
pub use error::{ProvisionStage, Result, SysError};
pub use exec::{CommandRunner, OsCommandRunner, Shell, Target};
pub use linux::{LinuxStoreManager, plan_store};
pub use poll::{Clock, Retry, SystemClock};
pub use provisioner::{HostPlatform, StoreProvisioner, UnsupportedProvisioner, provisioner_for};
pub use wsl::WslProvisioner;
