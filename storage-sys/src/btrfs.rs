// SPDX-License-Identifier: GPL-3.0-only

//! Btrfs filesystem manager
//!
//! Decides whether a block device is trusted, formatted or rejected, formats it
//! when that is allowed, and confirms the result. Formatting is only allowed for
//! a device that was just created or when the operator asked for `--reinit`.

use tracing::{debug, info, warn};

use crate::classify::FailureKind;
use crate::error::{Result, SysError};
use crate::exec::{Shell, timeouts};
use crate::poll::{BLKID_SETTLE, Clock};

const BTRFS: &str = "btrfs";

/// What is on the device before anything is changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedState {
    MountedBtrfs,
    MountedOther(String),
    Btrfs,
    Other(String),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatDecision {
    Accept,
    Format { wipe: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatOutcome {
    /// A btrfs filesystem was already there
    Existing,
    Formatted,
}

/// Decision table for a detected state.
///
/// A mounted foreign filesystem is refused even when formatting is allowed.
pub fn decide(device: &str, state: &DetectedState, allow_format: bool) -> Result<FormatDecision> {
    match state {
        DetectedState::MountedBtrfs | DetectedState::Btrfs => Ok(FormatDecision::Accept),
        DetectedState::MountedOther(fs_type) => Err(SysError::MountedForeign {
            device: device.to_string(),
            fs_type: fs_type.clone(),
        }),
        DetectedState::Other(_) if allow_format => Ok(FormatDecision::Format { wipe: true }),
        DetectedState::Other(fs_type) => Err(SysError::ForeignFilesystem {
            device: device.to_string(),
            fs_type: fs_type.clone(),
        }),
        DetectedState::Empty if allow_format => Ok(FormatDecision::Format { wipe: false }),
        DetectedState::Empty => Err(SysError::Unformatted(device.to_string())),
    }
}

pub struct BtrfsManager<'a> {
    shell: Shell<'a>,
    clock: &'a dyn Clock,
}

impl<'a> BtrfsManager<'a> {
    /// `shell` must run with root privileges on the machine that owns the device
    pub fn new(shell: Shell<'a>, clock: &'a dyn Clock) -> Self {
        Self { shell, clock }
    }

    /// Filesystem type of the live mount whose source is `device`
    pub fn mounted_fs_type(&self, device: &str) -> Result<Option<String>> {
        match self.shell.run_timeout(
            "check existing mount",
            "findmnt",
            &["-n", "-o", "FSTYPE", "-S", device],
            timeouts::PROBE,
        ) {
            Ok(output) => Ok(first_word(&output)),
            // findmnt: 1 means no matching mount
            Err(error) if error.exit_code() == Some(1) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Filesystem signature reported by a low-level `blkid` probe
    pub fn probe_fs_type(&self, device: &str) -> Result<Option<String>> {
        match self.shell.run_timeout(
            "probe filesystem signature",
            "blkid",
            &["-p", "-o", "value", "-s", "TYPE", device],
            timeouts::PROBE,
        ) {
            Ok(output) => Ok(first_word(&output)),
            // blkid: 2 means nothing was detected
            Err(error) if error.exit_code() == Some(2) => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub fn detect(&self, device: &str) -> Result<DetectedState> {
        if let Some(fs_type) = self.mounted_fs_type(device)? {
            return Ok(if fs_type == BTRFS {
                DetectedState::MountedBtrfs
            } else {
                DetectedState::MountedOther(fs_type)
            });
        }

        Ok(match self.probe_fs_type(device)? {
            Some(fs_type) if fs_type == BTRFS => DetectedState::Btrfs,
            Some(fs_type) => DetectedState::Other(fs_type),
            None => DetectedState::Empty,
        })
    }

    /// Make sure `device` carries btrfs, formatting it only when `allow_format` is set
    pub fn ensure_btrfs(&self, device: &str, allow_format: bool) -> Result<FormatOutcome> {
        let state = self.detect(device)?;
        debug!("{} detected as {:?} (allow_format={})", device, state, allow_format);

        match decide(device, &state, allow_format)? {
            FormatDecision::Accept => Ok(FormatOutcome::Existing),
            FormatDecision::Format { wipe } => {
                self.format(device, wipe)?;
                self.verify(device)?;
                Ok(FormatOutcome::Formatted)
            }
        }
    }

    fn format(&self, device: &str, wipe: bool) -> Result<()> {
        if wipe {
            info!("Wiping existing signatures on {}", device);
            self.shell.run("wipe filesystem signatures", "wipefs", &["-a", device])?;
        }
        info!("Formatting {} as btrfs", device);
        self.shell.run("format btrfs", "mkfs.btrfs", &["-f", device])?;
        Ok(())
    }

    /// Confirm the new filesystem, falling back to a probe mount when `blkid` lags
    pub fn verify(&self, device: &str) -> Result<()> {
        let confirmed = BLKID_SETTLE.poll(self.clock, || match self.probe_fs_type(device) {
            Ok(Some(fs_type)) if fs_type == BTRFS => Some(()),
            Ok(_) => None,
            Err(error) => {
                debug!("blkid probe of {} failed: {}", device, error);
                None
            }
        });

        if confirmed.is_some() {
            return Ok(());
        }

        warn!("blkid does not report btrfs on {} yet; trying a probe mount", device);
        self.probe_mount(device)
    }

    /// Mount the device on a throwaway directory so the kernel itself parses it
    fn probe_mount(&self, device: &str) -> Result<()> {
        let dir = self
            .shell
            .run_timeout("create probe directory", "mktemp", &["-d"], timeouts::QUICK)?;
        let dir = dir.trim();
        if dir.is_empty() {
            return Err(SysError::VerifyFailed {
                device: device.to_string(),
                reason: "mktemp returned no directory".to_string(),
            });
        }

        let mounted = self
            .shell
            .run("probe mount", "mount", &["-t", BTRFS, device, dir]);
        if mounted.is_ok()
            && let Err(error) = self.shell.run_timeout("probe unmount", "umount", &[dir], timeouts::QUICK)
        {
            warn!("failed to unmount probe directory {}: {}", dir, error);
        }
        if let Err(error) = self
            .shell
            .run_timeout("remove probe directory", "rmdir", &[dir], timeouts::QUICK)
        {
            debug!("failed to remove probe directory {}: {}", dir, error);
        }

        mounted.map(|_| ()).map_err(|error| SysError::VerifyFailed {
            device: device.to_string(),
            reason: error.to_string(),
        })
    }
}

/// Filesystem type mounted exactly at `target`, if anything is
pub fn mountpoint_fs_type(shell: &Shell<'_>, target: &str) -> Result<Option<String>> {
    match shell.run_timeout(
        "check live mount",
        "findmnt",
        &["-n", "-o", "FSTYPE", "--mountpoint", target],
        timeouts::PROBE,
    ) {
        Ok(output) => Ok(first_word(&output)),
        Err(error) if error.exit_code() == Some(1) => Ok(None),
        Err(error) => Err(error),
    }
}

/// Unmount `target` ahead of a reinit and confirm nothing is left mounted there.
///
/// "Not mounted" is fine. A busy target is an error; other `umount` failures
/// are only logged, and the follow-up mount check decides.
pub fn release_mount(shell: &Shell<'_>, target: &str, verbose: bool) -> Result<()> {
    match shell.run_timeout("unmount store", "umount", &[target], timeouts::QUICK) {
        Ok(_) => info!("Unmounted {}", target),
        Err(error) => match FailureKind::of(&error) {
            FailureKind::AlreadyUnmounted => debug!("{} was not mounted", target),
            FailureKind::DeviceBusy => {
                return Err(SysError::OperationFailed(format!(
                    "{target} is still in use and cannot be unmounted; stop whatever holds it and retry ({error})"
                )));
            }
            _ if verbose => warn!("unmount store (continuing): {}", error),
            _ => debug!("unmount store (continuing): {}", error),
        },
    }

    match mountpoint_fs_type(shell, target)? {
        None => Ok(()),
        Some(fs_type) => Err(SysError::OperationFailed(format!(
            "{target} is still mounted ({fs_type}) after unmounting"
        ))),
    }
}

fn first_word(output: &str) -> Option<String> {
    output.split_whitespace().next().map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Target;
    use crate::exec::scripted::{ManualClock, Reply, ScriptedRunner};

    const DEVICE: &str = "/dev/sdd1";

    #[test]
    fn decision_table() {
        use DetectedState::*;
        use FormatDecision::*;

        for allow in [false, true] {
            assert_eq!(decide(DEVICE, &MountedBtrfs, allow).unwrap(), Accept);
            assert_eq!(decide(DEVICE, &Btrfs, allow).unwrap(), Accept);
            assert!(matches!(
                decide(DEVICE, &MountedOther("ext4".into()), allow),
                Err(SysError::MountedForeign { .. })
            ));
        }

        assert!(matches!(
            decide(DEVICE, &Other("ext4".into()), false),
            Err(SysError::ForeignFilesystem { .. })
        ));
        assert_eq!(decide(DEVICE, &Other("ext4".into()), true).unwrap(), Format { wipe: true });
        assert!(matches!(decide(DEVICE, &Empty, false), Err(SysError::Unformatted(_))));
        assert_eq!(decide(DEVICE, &Empty, true).unwrap(), Format { wipe: false });

        let message = decide(DEVICE, &Empty, false).unwrap_err().to_string();
        assert!(message.contains("--reinit"));
    }

    #[test]
    fn mounted_btrfs_is_accepted_without_touching_the_device() {
        let runner = ScriptedRunner::new();
        runner.on("findmnt", &["-S", DEVICE], Reply::ok("btrfs\n"));
        let clock = ManualClock::default();
        let target = Target::HostRoot;
        let manager = BtrfsManager::new(Shell::new(&runner, &target), &clock);

        for _ in 0..2 {
            assert_eq!(manager.ensure_btrfs(DEVICE, true).unwrap(), FormatOutcome::Existing);
        }
        assert_eq!(runner.count("mkfs.btrfs"), 0);
        assert_eq!(runner.count("mount -t"), 0);
        assert_eq!(runner.count("wipefs"), 0);
    }

    #[test]
    fn foreign_filesystem_is_never_formatted_without_permission() {
        let runner = ScriptedRunner::new();
        runner
            .on("findmnt", &[], Reply::fail(1, ""))
            .on("blkid", &[], Reply::ok("ext4\n"));
        let clock = ManualClock::default();
        let target = Target::HostRoot;
        let manager = BtrfsManager::new(Shell::new(&runner, &target), &clock);

        let error = manager.ensure_btrfs(DEVICE, false).unwrap_err();
        assert!(matches!(error, SysError::ForeignFilesystem { ref fs_type, .. } if fs_type == "ext4"));
        assert_eq!(runner.count("mkfs.btrfs"), 0);
        assert_eq!(runner.count("wipefs"), 0);
    }

    #[test]
    fn foreign_filesystem_is_wiped_then_formatted_when_allowed() {
        let runner = ScriptedRunner::new();
        runner
            .on("findmnt", &[], Reply::fail(1, ""))
            .on_seq("blkid", &[], vec![Reply::ok("ext4\n"), Reply::ok("btrfs\n")]);
        let clock = ManualClock::default();
        let target = Target::HostRoot;
        let manager = BtrfsManager::new(Shell::new(&runner, &target), &clock);

        assert_eq!(manager.ensure_btrfs(DEVICE, true).unwrap(), FormatOutcome::Formatted);
        let wipe = runner.position("wipefs -a /dev/sdd1").expect("wipefs");
        let mkfs = runner.position("mkfs.btrfs -f /dev/sdd1").expect("mkfs");
        assert!(wipe < mkfs);
        assert_eq!(clock.sleeps(), 0);
    }

    #[test]
    fn lagging_blkid_falls_back_to_probe_mount() {
        let runner = ScriptedRunner::new();
        runner
            .on("findmnt", &[], Reply::fail(1, ""))
            .on("blkid", &[], Reply::fail(2, ""))
            .on("mktemp", &[], Reply::ok("/tmp/tmp.X1\n"));
        let clock = ManualClock::default();
        let target = Target::HostRoot;
        let manager = BtrfsManager::new(Shell::new(&runner, &target), &clock);

        assert_eq!(manager.ensure_btrfs(DEVICE, true).unwrap(), FormatOutcome::Formatted);
        assert_eq!(runner.count("wipefs"), 0);
        assert_eq!(clock.sleeps(), BLKID_SETTLE.attempts - 1);
        let lines = runner.lines();
        let tail: Vec<&str> = lines.iter().rev().take(3).rev().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "mount -t btrfs /dev/sdd1 /tmp/tmp.X1",
                "umount /tmp/tmp.X1",
                "rmdir /tmp/tmp.X1"
            ]
        );
    }

    #[test]
    fn failed_probe_mount_is_a_verification_error() {
        let runner = ScriptedRunner::new();
        runner
            .on("findmnt", &[], Reply::fail(1, ""))
            .on("blkid", &[], Reply::fail(2, ""))
            .on("mktemp", &[], Reply::ok("/tmp/tmp.X2\n"))
            .on("mount", &[], Reply::fail(32, "wrong fs type, bad option, bad superblock"));
        let clock = ManualClock::default();
        let target = Target::HostRoot;
        let manager = BtrfsManager::new(Shell::new(&runner, &target), &clock);

        let error = manager.ensure_btrfs(DEVICE, true).unwrap_err();
        assert!(matches!(error, SysError::VerifyFailed { .. }));
        assert_eq!(runner.count("umount"), 0);
        assert_eq!(runner.count("rmdir /tmp/tmp.X2"), 1);
    }

    #[test]
    fn release_mount_refuses_a_busy_target() {
        let runner = ScriptedRunner::new();
        runner.on(
            "umount",
            &["/srv/store"],
            Reply::fail(32, "umount: /srv/store: target is busy."),
        );
        let target = Target::HostRoot;

        let error = release_mount(&Shell::new(&runner, &target), "/srv/store", false).unwrap_err();
        assert!(error.to_string().contains("still in use"));
        assert_eq!(runner.count("findmnt"), 0);
    }

    #[test]
    fn release_mount_checks_the_target_is_gone() {
        let runner = ScriptedRunner::new();
        runner
            .on("umount", &[], Reply::fail(32, "umount: /srv/store: not mounted."))
            .on("findmnt", &["--mountpoint"], Reply::fail(1, ""));
        let target = Target::HostRoot;
        let shell = Shell::new(&runner, &target);
        release_mount(&shell, "/srv/store", false).unwrap();

        runner
            .on("umount", &[], Reply::fail(1, "umount: /srv/store: must be superuser"))
            .on("findmnt", &["--mountpoint"], Reply::ok("btrfs\n"));
        let error = release_mount(&shell, "/srv/store", true).unwrap_err();
        assert!(error.to_string().contains("still mounted (btrfs)"));
    }
}
