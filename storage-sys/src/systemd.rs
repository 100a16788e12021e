// SPDX-License-Identifier: GPL-3.0-only

//! Mount supervisor: systemd `.mount` units for the btrfs store

use storage_types::MountUnit;
use tracing::{debug, info, warn};

use crate::btrfs::mountpoint_fs_type;
use crate::error::{Result, SysError};
use crate::exec::{Shell, timeouts};
use crate::poll::{Clock, MOUNT_SETTLE};

const JOURNAL_LINES: &str = "20";

pub struct MountSupervisor<'a> {
    /// Root shell on the machine running systemd
    shell: Shell<'a>,
    clock: &'a dyn Clock,
    verbose: bool,
}

impl<'a> MountSupervisor<'a> {
    pub fn new(shell: Shell<'a>, clock: &'a dyn Clock, verbose: bool) -> Self {
        Self {
            shell,
            clock,
            verbose,
        }
    }

    fn systemctl(&self, description: &str, args: &[&str]) -> Result<String> {
        self.shell.run(description, "systemctl", args)
    }

    /// Unit name for a mount point, e.g. `/home/dev/.local/state/sqlrs/store` ->
    /// `home-dev-.local-state-sqlrs-store.mount`
    pub fn unit_name_for(&self, target_dir: &str) -> Result<String> {
        let output = self.shell.run_timeout(
            "escape mount unit name",
            "systemd-escape",
            &["--path", "--suffix=mount", target_dir],
            timeouts::QUICK,
        )?;
        let name = output.trim();
        if name.is_empty() {
            return Err(SysError::InvalidMountUnit(format!(
                "systemd-escape returned nothing for {target_dir}"
            )));
        }
        Ok(name.to_string())
    }

    /// Write the unit file, reload systemd and enable the unit
    pub fn install(&self, unit: &MountUnit) -> Result<()> {
        validate(unit)?;

        self.shell.run_timeout(
            "create mount target",
            "mkdir",
            &["-p", &unit.r#where],
            timeouts::QUICK,
        )?;

        let unit_path = unit.unit_path();
        self.shell
            .run_input("write mount unit", "tee", &[&unit_path], &unit.render())?;
        info!("Installed mount unit {}", unit_path);

        self.systemctl("reload systemd units", &["daemon-reload"])?;
        self.systemctl("enable mount unit", &["enable", &unit.name])?;
        Ok(())
    }

    pub fn is_active(&self, name: &str) -> Result<bool> {
        match self.shell.run_timeout(
            "check mount unit state",
            "systemctl",
            &["is-active", name],
            timeouts::QUICK,
        ) {
            Ok(output) => Ok(output.trim() == "active"),
            // is-active exits non-zero for every state other than active
            Err(error) if error.exit_code().is_some() => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Start the unit if needed and wait until the mount reports the expected type
    pub fn activate(&self, unit: &MountUnit) -> Result<()> {
        validate(unit)?;

        if self.is_active(&unit.name)? {
            debug!("{} already active", unit.name);
        } else if let Err(error) = self.systemctl("start mount unit", &["start", &unit.name]) {
            if self.verbose
                && let Some(journal) = self.journal(&unit.name)
            {
                return Err(SysError::OperationFailed(format!(
                    "{error}\nrecent journal for {}:\n{journal}",
                    unit.name
                )));
            }
            return Err(error);
        }

        self.wait_for_fs_type(&unit.r#where, &unit.fs_type)
    }

    /// Filesystem type mounted exactly at `target`, if anything is
    pub fn live_fs_type(&self, target: &str) -> Result<Option<String>> {
        mountpoint_fs_type(&self.shell, target)
    }

    fn wait_for_fs_type(&self, target: &str, expected: &str) -> Result<()> {
        let mut last_seen: Option<String> = None;
        let matched = MOUNT_SETTLE.poll(self.clock, || match self.live_fs_type(target) {
            Ok(Some(fs_type)) if fs_type == expected => Some(()),
            Ok(seen) => {
                last_seen = seen;
                None
            }
            Err(error) => {
                debug!("findmnt on {} failed: {}", target, error);
                None
            }
        });

        matched.ok_or_else(|| SysError::MountTypeMismatch {
            target: target.to_string(),
            expected: expected.to_string(),
            actual: last_seen.unwrap_or_else(|| "nothing".to_string()),
        })
    }

    fn journal(&self, name: &str) -> Option<String> {
        self.shell
            .run_timeout(
                "read mount unit journal",
                "journalctl",
                &["-u", name, "-n", JOURNAL_LINES, "--no-pager"],
                timeouts::QUICK,
            )
            .ok()
            .map(|journal| journal.trim().to_string())
            .filter(|journal| !journal.is_empty())
    }

    /// Stop, disable and delete the unit.
    ///
    /// Every step is attempted; failures are only logged since the unit may
    /// already be gone.
    pub fn teardown(&self, name: &str) {
        let unit_path = format!("/etc/systemd/system/{name}");
        let steps: [(&str, &str, Vec<&str>); 4] = [
            ("stop mount unit", "systemctl", vec!["stop", name]),
            ("disable mount unit", "systemctl", vec!["disable", name]),
            ("remove mount unit", "rm", vec!["-f", &unit_path]),
            ("reload systemd units", "systemctl", vec!["daemon-reload"]),
        ];

        for (description, program, args) in steps {
            if let Err(error) = self.shell.run_timeout(description, program, &args, timeouts::QUICK) {
                if self.verbose {
                    warn!("{}", error);
                } else {
                    debug!("{}", error);
                }
            }
        }
    }
}

fn validate(unit: &MountUnit) -> Result<()> {
    if unit.name.trim().is_empty() {
        return Err(SysError::InvalidMountUnit("unit name is empty".to_string()));
    }
    if unit.r#where.trim().is_empty() {
        return Err(SysError::InvalidMountUnit("target directory is empty".to_string()));
    }
    if unit.what.trim().is_empty() {
        return Err(SysError::InvalidMountUnit("source device is empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Target;
    use crate::exec::scripted::{ManualClock, Reply, ScriptedRunner};

    const NAME: &str = "home-dev-.local-state-sqlrs-store.mount";
    const WHERE: &str = "/home/dev/.local/state/sqlrs/store";

    fn unit() -> MountUnit {
        MountUnit::new(NAME, "/dev/disk/by-uuid/1111", WHERE)
    }

    fn root() -> Target {
        Target::WslRoot {
            distro: "Ubuntu".to_string(),
            nsenter: true,
        }
    }

    #[test]
    fn install_writes_unit_then_reloads_and_enables() {
        let runner = ScriptedRunner::new();
        let clock = ManualClock::default();
        let target = root();
        let supervisor = MountSupervisor::new(Shell::new(&runner, &target), &clock, false);

        supervisor.install(&unit()).unwrap();
        supervisor.install(&unit()).unwrap();

        assert_eq!(
            runner.lines()[..4].to_vec(),
            vec![
                format!("mkdir -p {WHERE}"),
                format!("tee /etc/systemd/system/{NAME}"),
                "systemctl daemon-reload".to_string(),
                format!("systemctl enable {NAME}"),
            ]
        );
        let calls = runner.calls();
        assert_eq!(calls[1].stdin, calls[5].stdin);
        assert_eq!(calls[1].stdin.as_deref(), Some(unit().render().as_str()));
    }

    #[test]
    fn install_rejects_empty_fields() {
        let runner = ScriptedRunner::new();
        let clock = ManualClock::default();
        let target = root();
        let supervisor = MountSupervisor::new(Shell::new(&runner, &target), &clock, false);

        let mut broken = unit();
        broken.what = String::new();
        assert!(matches!(supervisor.install(&broken), Err(SysError::InvalidMountUnit(_))));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn activate_starts_inactive_unit_and_waits_for_btrfs() {
        let runner = ScriptedRunner::new();
        runner
            .on("systemctl", &["is-active"], Reply::fail(3, ""))
            .on_seq(
                "findmnt",
                &["--mountpoint"],
                vec![Reply::fail(1, ""), Reply::ok("btrfs\n")],
            );
        let clock = ManualClock::default();
        let target = root();
        let supervisor = MountSupervisor::new(Shell::new(&runner, &target), &clock, false);

        supervisor.activate(&unit()).unwrap();
        assert_eq!(runner.count(&format!("systemctl start {NAME}")), 1);
        assert_eq!(clock.sleeps(), 1);
    }

    #[test]
    fn activate_skips_start_when_active_and_reports_wrong_type() {
        let runner = ScriptedRunner::new();
        runner
            .on("systemctl", &["is-active"], Reply::ok("active\n"))
            .on("findmnt", &[], Reply::ok("ext4\n"));
        let clock = ManualClock::default();
        let target = root();
        let supervisor = MountSupervisor::new(Shell::new(&runner, &target), &clock, false);

        let error = supervisor.activate(&unit()).unwrap_err();
        assert!(matches!(error, SysError::MountTypeMismatch { ref actual, .. } if actual == "ext4"));
        assert_eq!(runner.count("systemctl start"), 0);
    }

    #[test]
    fn failed_start_includes_journal_when_verbose() {
        let runner = ScriptedRunner::new();
        runner
            .on("systemctl", &["is-active"], Reply::fail(3, ""))
            .on("systemctl", &["start"], Reply::fail(1, "Job failed"))
            .on("journalctl", &[], Reply::ok("mount: wrong fs type\n"));
        let clock = ManualClock::default();
        let target = root();
        let supervisor = MountSupervisor::new(Shell::new(&runner, &target), &clock, true);

        let message = supervisor.activate(&unit()).unwrap_err().to_string();
        assert!(message.contains("start mount unit: exit status 1: Job failed"));
        assert!(message.contains("mount: wrong fs type"));
    }

    #[test]
    fn teardown_continues_past_failures() {
        let runner = ScriptedRunner::new();
        runner
            .on("systemctl", &["stop"], Reply::fail(5, "Unit not loaded."))
            .on("systemctl", &["disable"], Reply::fail(1, "does not exist"));
        let clock = ManualClock::default();
        let target = root();
        let supervisor = MountSupervisor::new(Shell::new(&runner, &target), &clock, false);

        supervisor.teardown(NAME);
        assert_eq!(
            runner.lines(),
            vec![
                format!("systemctl stop {NAME}"),
                format!("systemctl disable {NAME}"),
                format!("rm -f /etc/systemd/system/{NAME}"),
                "systemctl daemon-reload".to_string(),
            ]
        );
    }
}
