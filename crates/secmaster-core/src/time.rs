//! Sources of the current instant used to timestamp writes.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Supplies "now" to the master.
///
/// Instants are stored with microsecond precision, so implementations should
/// not return anything finer.
pub trait TimeSource: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time, truncated to microseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> DateTime<Utc> {
        truncate_micros(Utc::now())
    }
}

/// A controllable clock for deterministic tests and replays.
#[derive(Debug)]
pub struct FixedTimeSource {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedTimeSource {
    #[must_use]
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(truncate_micros(instant)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock().unwrap_or_else(PoisonError::into_inner) = truncate_micros(instant);
    }

    /// Moves the clock forward and returns the new instant. Saturates at the
    /// largest representable instant.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut instant = self.instant.lock().unwrap_or_else(PoisonError::into_inner);
        *instant = truncate_micros(
            instant
                .checked_add_signed(by)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        *instant
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `None` when the count of microseconds is outside the representable range.
pub(crate) fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

pub(crate) fn truncate_micros(instant: DateTime<Utc>) -> DateTime<Utc> {
    from_micros(instant.timestamp_micros()).unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_system_time_source_is_micro_precise() {
        let now = SystemTimeSource.now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
        assert!(now.timestamp() > 1_577_836_800); // after 2020-01-01
    }

    #[test]
    fn test_fixed_time_source_advance() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = FixedTimeSource::new(start);
        assert_eq!(clock.now(), start);

        let next = clock.advance(Duration::seconds(90));
        assert_eq!(next, start + Duration::seconds(90));
        assert_eq!(clock.now(), next);

        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_fixed_time_source_truncates_and_saturates() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = FixedTimeSource::new(start + Duration::nanoseconds(1_500));
        assert_eq!(clock.now(), start + Duration::microseconds(1));

        clock.set(DateTime::<Utc>::MAX_UTC - Duration::days(1));
        let end = clock.advance(Duration::days(365));
        assert!(end > start);
        assert_eq!(clock.now(), end);
    }

    #[test]
    fn test_from_micros_out_of_range() {
        assert!(from_micros(i64::MAX).is_none());
        assert_eq!(
            from_micros(0),
            Some(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap())
        );
    }
}
