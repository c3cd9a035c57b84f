//! Time window bounding one reconciliation pass.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Half-open window `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        SyncWindow { start, end }
    }

    /// Near-term window: today through `days` days ahead, whole local days.
    pub fn quick(today: NaiveDate, tz: Tz, days: u32) -> Self {
        SyncWindow {
            start: local_midnight(tz, today),
            end: local_midnight(tz, today + Duration::days(i64::from(days) + 1)),
        }
    }

    /// Wide window: `past_days` back to `future_days` ahead, whole local days.
    pub fn full(today: NaiveDate, tz: Tz, past_days: u32, future_days: u32) -> Self {
        SyncWindow {
            start: local_midnight(tz, today - Duration::days(i64::from(past_days))),
            end: local_midnight(tz, today + Duration::days(i64::from(future_days) + 1)),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Widen by `margin` on both sides.
    pub fn padded(&self, margin: Duration) -> Self {
        SyncWindow {
            start: self.start - margin,
            end: self.end + margin,
        }
    }

    pub fn start_rfc3339(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn end_rfc3339(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start_rfc3339(), self.end_rfc3339())
    }
}

/// Midnight at the start of `date` in `tz`, as a UTC instant.
pub fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        // Zones that skip midnight for DST start the day at 01:00
        .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}
