//! Feed-side event types.
//!
//! These types mirror one `VEVENT` as it appears in the feed, before
//! recurrence expansion and normalization. Times keep the timezone form
//! they were published in, so the destination can be given local wall-clock
//! times instead of UTC-converted ones.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A single component from the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub uid: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    /// DTEND as published; absent means the default duration applies
    pub end: Option<EventTime>,
    pub status: FeedStatus,

    /// RRULE/RDATE/EXDATE for master events
    pub recurrence: Option<Recurrence>,
    /// Set on instance overrides (RECURRENCE-ID)
    pub recurrence_id: Option<EventTime>,
}

/// Recurrence rule with its inclusion and exclusion dates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
    pub rrule: String,
    pub rdates: Vec<EventTime>,
    pub exdates: Vec<EventTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventTime {
    Date(NaiveDate),
    DateTimeUtc(DateTime<Utc>),
    /// No timezone attached; interpreted as UTC
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned {
        datetime: NaiveDateTime,
        tzid: String,
    },
}

impl EventTime {
    /// The IANA zone this time was published in, if it resolves to one.
    pub fn timezone(&self) -> Option<Tz> {
        match self {
            EventTime::DateTimeZoned { tzid, .. } => tzid.parse().ok(),
            _ => None,
        }
    }

    /// The instant this time denotes. Dates map to midnight UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::Date(d) => d.and_time(chrono::NaiveTime::MIN).and_utc(),
            EventTime::DateTimeUtc(dt) => *dt,
            EventTime::DateTimeFloating(dt) => dt.and_utc(),
            EventTime::DateTimeZoned { datetime, tzid } => match tzid.parse::<Tz>() {
                Ok(tz) => resolve_local(&tz, datetime),
                Err(_) => {
                    tracing::warn!(tzid = %tzid, "unknown TZID, treating time as UTC");
                    datetime.and_utc()
                }
            },
        }
    }

    /// Shift by a duration, keeping the published form.
    pub fn shifted(&self, by: Duration) -> EventTime {
        match self {
            EventTime::Date(d) => EventTime::Date(*d + Duration::days(by.num_days())),
            EventTime::DateTimeUtc(dt) => EventTime::DateTimeUtc(*dt + by),
            EventTime::DateTimeFloating(dt) => EventTime::DateTimeFloating(*dt + by),
            EventTime::DateTimeZoned { datetime, tzid } => EventTime::DateTimeZoned {
                datetime: *datetime + by,
                tzid: tzid.clone(),
            },
        }
    }
}

/// Map a local wall-clock time to UTC. Ambiguous times take the earlier
/// instant; times inside a DST gap are pushed past it.
fn resolve_local(tz: &Tz, datetime: &NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(datetime)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(*datetime + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| datetime.and_utc())
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            EventTime::DateTimeUtc(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M UTC")),
            EventTime::DateTimeFloating(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M")),
            EventTime::DateTimeZoned { datetime, tzid } => {
                write!(f, "{} ({})", datetime.format("%Y-%m-%d %H:%M"), tzid)
            }
        }
    }
}
