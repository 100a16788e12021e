// SPDX-License-Identifier: GPL-3.0-only

//! Scenario fixtures for store provisioning tests
//!
//! Builders for the text the pipeline parses (`lsblk`, `wsl.exe --list`) and
//! runner presets describing a healthy host, on top of which each scenario
//! scripts only the part it is about.

pub mod fixtures;
pub mod presets;

pub use fixtures::{LsblkListing, distro_listing};
pub use presets::{healthy_linux_host, healthy_wsl_host};
