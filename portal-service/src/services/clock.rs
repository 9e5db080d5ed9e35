//! Time source shared by the session store, ledger and coordinator.

use chrono::{DateTime, Utc};
use std::sync::RwLock;
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `start + by`, or `None` when the result is not representable.
pub fn checked_offset(start: DateTime<Utc>, by: Duration) -> Option<DateTime<Utc>> {
    start.checked_add_signed(chrono::Duration::from_std(by).ok()?)
}

/// `start - by`, or `None` when the result is not representable.
pub fn checked_offset_back(start: DateTime<Utc>, by: Duration) -> Option<DateTime<Utc>> {
    start.checked_sub_signed(chrono::Duration::from_std(by).ok()?)
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Moves forward by `by`; an unrepresentable target leaves the clock unchanged.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = checked_offset(*now, by) {
            *now = next;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_offsets_reject_unrepresentable_instants() {
        let start = Utc::now();
        assert_eq!(
            checked_offset(start, Duration::from_secs(60)),
            Some(start + chrono::Duration::seconds(60))
        );
        assert_eq!(
            checked_offset_back(start, Duration::from_secs(60)),
            Some(start - chrono::Duration::seconds(60))
        );
        assert_eq!(checked_offset(start, Duration::from_secs(u64::MAX)), None);
        assert_eq!(
            checked_offset(start, Duration::from_secs(600_000_000_000_000)),
            None
        );
        assert_eq!(
            checked_offset_back(start, Duration::from_secs(600_000_000_000_000)),
            None
        );

        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(u64::MAX));
        assert_eq!(clock.now(), start);
    }
}
