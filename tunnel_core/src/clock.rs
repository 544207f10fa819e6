//! Wall-clock source used for log file names and log line timestamps.

use chrono::{DateTime, Local, Utc};

/// Source of the current local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl FixedClock {
    /// Create a clock frozen at the given Unix time in milliseconds.
    ///
    /// Returns `None` if the value is outside the representable range.
    pub fn from_millis(epoch_millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(epoch_millis)
            .map(|utc| FixedClock(utc.with_timezone(&Local)))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_keeps_millis() {
        let clock = FixedClock::from_millis(1_700_000_000_123).unwrap();
        assert_eq!(clock.now().timestamp_millis(), 1_700_000_000_123);
        assert_eq!(clock.now(), clock.now());
    }
}
