// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Wall-clock source used for artifact horizons and build ages.

use std::time::{Duration, SystemTime};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock frozen at a fixed instant (tests, replay).
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

/// Age of `modified` relative to `now`. Timestamps in the future count as zero.
#[must_use]
pub fn age(now: SystemTime, modified: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_clamps_future_timestamps() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        assert_eq!(age(now, now + Duration::from_secs(5)), Duration::ZERO);
        assert_eq!(
            age(now, now - Duration::from_secs(90)),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_fixed_clock() {
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        assert_eq!(FixedClock(at).now(), at);
    }
}
