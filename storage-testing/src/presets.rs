// SPDX-License-Identifier: GPL-3.0-only

//! Runner presets for a host where every prerequisite is already in place

use storage_sys::exec::scripted::{Reply, ScriptedRunner};

use crate::fixtures::distro_listing;

pub const DISTRO: &str = "Ubuntu";
pub const STATE_BASE: &str = "/home/dev/.local/state";
pub const STATE_DIR: &str = "/home/dev/.local/state/sqlrs/store";
pub const UNIT_NAME: &str = r"home-dev-\x2elocal-state-sqlrs-store.mount";
pub const UID: &str = "1000";
pub const GID: &str = "1000";

/// Windows host with an elevated session, Docker running and a systemd
/// distro that already has btrfs support and tools.
///
/// Block device, filesystem and mount answers are left to the scenario.
pub fn healthy_wsl_host(runner: &ScriptedRunner) -> &ScriptedRunner {
    runner
        .on("wsl.exe", &["--list", "--verbose"], Reply::ok(distro_listing(&[DISTRO])))
        .on("cat", &["/proc/filesystems"], Reply::ok("nodev\tsysfs\n\text4\n\tbtrfs\n"))
        .on("which", &["mkfs.btrfs"], Reply::ok("/usr/sbin/mkfs.btrfs\n"))
        .on("which", &["nsenter"], Reply::ok("/usr/bin/nsenter\n"))
        .on("sh", &["is-system-running"], Reply::ok("running\n"))
        .on("sh", &["XDG_STATE_HOME"], Reply::ok(STATE_BASE))
        .on("powershell.exe", &["com.docker.service"], Reply::ok("Running\r\n"))
        .on("powershell.exe", &["IsInRole"], Reply::ok("True\r\n"))
        .on("systemd-escape", &["--path"], Reply::ok(format!("{UNIT_NAME}\n")))
        .on("systemctl", &["is-active"], Reply::fail(3, "inactive"))
        .on("id", &["-u"], Reply::ok(UID))
        .on("id", &["-g"], Reply::ok(GID))
}

/// Linux host running as root with every tool on `PATH`
pub fn healthy_linux_host(runner: &ScriptedRunner) -> &ScriptedRunner {
    runner
        .set_root(true)
        .on("id", &["-u"], Reply::ok(UID))
        .on("id", &["-g"], Reply::ok(GID))
}
