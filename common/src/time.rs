//! Time utilities and constants for the PayFlow ledger.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Ledger timing constants.
pub mod constants {
    use super::Duration;

    /// Upper bound on a single atomic scope (5 seconds).
    pub fn default_scope_timeout() -> Duration {
        Duration::seconds(5)
    }

    /// Upper bound on a single notification delivery (10 seconds).
    pub fn notification_timeout() -> Duration {
        Duration::seconds(10)
    }
}

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

/// Inclusive creation-time window. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Earliest timestamp included.
    pub start: Option<Timestamp>,
    /// Latest timestamp included.
    pub end: Option<Timestamp>,
}

impl DateRange {
    /// Build a range, rejecting `start > end`.
    pub fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> Result<Self, LedgerError> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(LedgerError::invalid_field(
                    "start_date",
                    "Start date must not be after end date",
                ));
            }
        }
        Ok(Self { start, end })
    }

    /// Check whether `ts` falls inside the range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_range_bounds() {
        let t = Utc::now();
        let range = DateRange::new(Some(t - Duration::hours(1)), Some(t)).unwrap();

        assert!(range.contains(t));
        assert!(range.contains(t - Duration::hours(1)));
        assert!(!range.contains(t + Duration::seconds(1)));
    }

    #[test]
    fn test_open_ended_range() {
        let t = Utc::now();
        let since = DateRange::new(Some(t), None).unwrap();

        assert!(since.contains(t + Duration::days(365)));
        assert!(!since.contains(t - Duration::seconds(1)));
        assert!(DateRange::default().contains(t));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let t = Utc::now();
        assert!(DateRange::new(Some(t), Some(t - Duration::seconds(1))).is_err());
    }

    #[test]
    fn test_duration_as_std() {
        assert_eq!(
            constants::default_scope_timeout().as_std(),
            std::time::Duration::from_secs(5)
        );
        assert_eq!(Duration::seconds(-1).as_std(), std::time::Duration::ZERO);
    }
}
