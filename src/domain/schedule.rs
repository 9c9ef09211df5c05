//! Autopublish cadence.

use std::{str::FromStr, time::Duration};

use thiserror::Error;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const YEAR: u64 = 365 * DAY;

/// How long to wait after the most recent publication before moving the next
/// staged batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishInterval(Duration);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntervalError {
    #[error("unknown autopublish unit `{0}` (expected seconds or minute|hour|day|week|year)")]
    UnknownUnit(String),
}

impl PublishInterval {
    pub fn from_secs(seconds: u64) -> Self {
        Self(Duration::from_secs(seconds))
    }

    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    /// True once `elapsed` seconds cover the whole interval.
    pub fn is_elapsed(&self, elapsed: u64) -> bool {
        elapsed >= self.as_secs()
    }
}

impl FromStr for PublishInterval {
    type Err = IntervalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Ok(seconds) = trimmed.parse::<u64>() {
            return Ok(Self::from_secs(seconds));
        }

        let seconds = match trimmed.to_ascii_lowercase().as_str() {
            "minute" => MINUTE,
            "hour" => HOUR,
            "day" => DAY,
            "week" => WEEK,
            "year" => YEAR,
            _ => return Err(IntervalError::UnknownUnit(trimmed.to_string())),
        };
        Ok(Self::from_secs(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_seconds() {
        let interval: PublishInterval = "90".parse().expect("seconds");
        assert_eq!(interval.as_secs(), 90);
    }

    #[test]
    fn named_units() {
        let cases = [
            ("minute", 60),
            ("hour", 3_600),
            ("day", 86_400),
            ("week", 604_800),
            ("year", 31_536_000),
            (" Hour ", 3_600),
        ];
        for (raw, expected) in cases {
            let interval: PublishInterval = raw.parse().expect(raw);
            assert_eq!(interval.as_secs(), expected, "unit {raw}");
        }
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let err = "fortnight".parse::<PublishInterval>().expect_err("unknown");
        assert_eq!(err, IntervalError::UnknownUnit("fortnight".to_string()));
    }

    #[test]
    fn elapsed_boundary() {
        let interval = PublishInterval::from_secs(60);
        assert!(!interval.is_elapsed(30));
        assert!(interval.is_elapsed(60));
        assert!(interval.is_elapsed(61));
    }
}
