// SPDX-License-Identifier: GPL-3.0-only

//! Bounded retries for state that settles asynchronously (udev, blkid caches, systemd)

use std::time::Duration;

pub trait Clock {
    fn sleep(&self, duration: Duration);
}

/// Real clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub attempts: u32,
    pub interval: Duration,
}

/// Waiting for a freshly attached disk to appear in `lsblk`
pub const DEVICE_DISCOVERY: Retry = Retry::new(10, Duration::from_secs(1));
/// Waiting for systemd in a freshly booted distro to leave `starting`
pub const SYSTEMD_SETTLE: Retry = Retry::new(15, Duration::from_secs(1));
/// Waiting for `blkid` to report a freshly written btrfs signature
pub const BLKID_SETTLE: Retry = Retry::new(10, Duration::from_millis(500));
/// Waiting for the partition UUID (and its by-uuid link) to show up
pub const UUID_SETTLE: Retry = Retry::new(10, Duration::from_millis(500));
/// Waiting for a started mount unit to report the expected filesystem
pub const MOUNT_SETTLE: Retry = Retry::new(10, Duration::from_millis(500));

impl Retry {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Run `probe` up to `attempts` times, sleeping `interval` between attempts.
    ///
    /// Returns the first `Some` produced, or `None` when attempts are exhausted.
    /// There is no sleep after the final attempt.
    pub fn poll<T>(&self, clock: &dyn Clock, mut probe: impl FnMut() -> Option<T>) -> Option<T> {
        let attempts = self.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(value) = probe() {
                return Some(value);
            }
            if attempt < attempts {
                clock.sleep(self.interval);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ManualClock;

    #[test]
    fn stops_at_first_success() {
        let clock = ManualClock::default();
        let mut calls = 0;
        let found = Retry::new(5, Duration::from_millis(200)).poll(&clock, || {
            calls += 1;
            (calls == 3).then_some(calls)
        });

        assert_eq!(found, Some(3));
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(clock.total(), Duration::from_millis(400));
    }

    #[test]
    fn gives_up_after_attempts_without_trailing_sleep() {
        let clock = ManualClock::default();
        let found: Option<()> = Retry::new(3, Duration::from_secs(1)).poll(&clock, || None);

        assert!(found.is_none());
        assert_eq!(clock.sleeps(), 2);
    }
}
