// SPDX-License-Identifier: GPL-3.0-only

//! Canonical data models for sqlrs store provisioning
//!
//! These types flow between the CLI and the provisioning pipeline:
//!
//! - **storage-cli**: builds a [`StoreRequest`] from flags and persists the
//!   resulting [`ProvisionResult`] into the workspace config
//! - **storage-sys**: consumes the request, parses [`BlockDeviceEntry`] records,
//!   plans [`StorePlan`] layouts and installs [`MountUnit`] definitions

pub mod block_device;
pub mod mount_unit;
pub mod provision;
pub mod request;
pub mod store_plan;

pub use block_device::{BlockDeviceEntry, BlockDeviceKind};
pub use mount_unit::{DEFAULT_FS_TYPE, DEFAULT_MOUNT_OPTIONS, MountUnit};
pub use provision::ProvisionResult;
pub use request::{DEFAULT_STORE_SIZE_GB, SnapshotBackend, StoreRequest, StoreType};
pub use store_plan::StorePlan;

/// Bytes in one GiB. Store sizes are requested in GiB.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Bytes in one MiB.
pub const MIB: u64 = 1024 * 1024;
