use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of the current instant; due dates, majoration and expiry are all evaluated against it.
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

/// A manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut instant = self.instant.lock().unwrap_or_else(|e| e.into_inner());
        *instant += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut instant = self.instant.lock().unwrap_or_else(|e| e.into_inner());
        *instant = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::days(46));
        assert_eq!(clock.now(), start + Duration::days(46));
    }
}
