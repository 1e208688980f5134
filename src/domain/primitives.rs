//! Domain primitives: identifiers, TimeMs and accounting periods.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time. Only entry points call this.
    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    pub fn as_ms(&self) -> i64 {
        self.0
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                $name(id.to_string())
            }
        }
    };
}

string_id!(
    /// Network member identifier.
    MemberId
);
string_id!(
    /// Investment tier identifier (e.g. "basic", "elite").
    TierId
);
string_id!(
    /// Identifier of a confirmed transaction feeding the commission engine.
    TransactionId
);
string_id!(
    /// Deterministic commission identifier, see `Commission::compute_id`.
    CommissionId
);

/// Store-assigned matrix position identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub i64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid period id {0:?}: expected YYYY-MM")]
pub struct PeriodParseError(pub String);

/// Accounting period (one calendar month, UTC).
///
/// Batch entry points take this explicitly instead of reading "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodId {
    year: i32,
    month: u32,
}

impl PeriodId {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodParseError> {
        if !(1..=12).contains(&month) || !(1970..=9999).contains(&year) {
            return Err(PeriodParseError(format!("{:04}-{:02}", year, month)));
        }
        Ok(PeriodId { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Period containing the given instant.
    pub fn containing(at: TimeMs) -> Self {
        let dt: DateTime<Utc> = DateTime::from_timestamp_millis(at.as_ms()).unwrap_or_default();
        PeriodId {
            year: dt.year(),
            month: dt.month(),
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            PeriodId {
                year: self.year + 1,
                month: 1,
            }
        } else {
            PeriodId {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            PeriodId {
                year: self.year - 1,
                month: 12,
            }
        } else {
            PeriodId {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// First millisecond of the period (inclusive).
    pub fn start(&self) -> TimeMs {
        month_start_ms(self.year, self.month)
    }

    /// First millisecond of the following period (exclusive bound).
    pub fn end(&self) -> TimeMs {
        let next = self.next();
        month_start_ms(next.year, next.month)
    }

    pub fn contains(&self, at: TimeMs) -> bool {
        at >= self.start() && at < self.end()
    }
}

fn month_start_ms(year: i32, month: u32) -> TimeMs {
    // Year and month are validated on construction, so the date always exists.
    let millis = NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or(0);
    TimeMs::new(millis)
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for PeriodId {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year, month) = trimmed
            .split_once('-')
            .ok_or_else(|| PeriodParseError(s.to_string()))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(PeriodParseError(s.to_string()));
        }
        let year = year
            .parse::<i32>()
            .map_err(|_| PeriodParseError(s.to_string()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| PeriodParseError(s.to_string()))?;
        PeriodId::new(year, month).map_err(|_| PeriodParseError(s.to_string()))
    }
}

impl TryFrom<String> for PeriodId {
    type Error = PeriodParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeriodId> for String {
    fn from(value: PeriodId) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parse_and_display() {
        let period: PeriodId = "2026-03".parse().unwrap();
        assert_eq!(period.year(), 2026);
        assert_eq!(period.month(), 3);
        assert_eq!(period.to_string(), "2026-03");
    }

    #[test]
    fn test_period_rejects_garbage() {
        assert!("2026-13".parse::<PeriodId>().is_err());
        assert!("2026-3".parse::<PeriodId>().is_err());
        assert!("march".parse::<PeriodId>().is_err());
    }

    #[test]
    fn test_period_rollover() {
        let dec: PeriodId = "2025-12".parse().unwrap();
        assert_eq!(dec.next().to_string(), "2026-01");
        assert_eq!(dec.next().previous(), dec);
    }

    #[test]
    fn test_period_bounds() {
        let period: PeriodId = "2024-02".parse().unwrap();
        // 2024-02-01T00:00:00Z and 2024-03-01T00:00:00Z
        assert_eq!(period.start().as_ms(), 1_706_745_600_000);
        assert_eq!(period.end().as_ms(), 1_709_251_200_000);
        assert!(period.contains(TimeMs::new(1_706_745_600_000)));
        assert!(!period.contains(TimeMs::new(1_709_251_200_000)));
        assert_eq!(PeriodId::containing(TimeMs::new(1_707_000_000_000)), period);
    }

    #[test]
    fn test_period_serializes_as_string() {
        let period: PeriodId = "2026-10".parse().unwrap();
        let json = serde_json::to_string(&period).unwrap();
        assert_eq!(json, "\"2026-10\"");
        let back: PeriodId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, period);
    }

    #[test]
    fn test_member_id_display() {
        let id = MemberId::new("m-42");
        assert_eq!(id.to_string(), "m-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"m-42\"");
    }
}
