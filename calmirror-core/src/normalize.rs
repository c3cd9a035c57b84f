//! Canonical event records and identity keys.
//!
//! Feed instances and destination instances are both mapped into
//! [`CanonicalEvent`]s so they can be compared field by field. Timed values
//! become UTC instants at second precision; all-day values stay dates.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, SubsecRound, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::IdentityStrategy;
use crate::destination::{DestinationEvent, DestinationStatus, DestinationTime, EventBody};
use crate::event::{EventTime, FeedEvent};
use crate::window::{SyncWindow, local_midnight};

pub const DEFAULT_TITLE: &str = "(No title)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CanonicalTime {
    Instant(DateTime<Utc>),
    Date(NaiveDate),
}

impl CanonicalTime {
    fn from_event_time(time: &EventTime) -> Self {
        match time {
            EventTime::Date(d) => CanonicalTime::Date(*d),
            other => CanonicalTime::Instant(other.to_utc().trunc_subsecs(0)),
        }
    }

    fn from_destination_time(time: &DestinationTime) -> Self {
        match time {
            DestinationTime::Date(d) => CanonicalTime::Date(*d),
            DestinationTime::DateTime { value, .. } => {
                CanonicalTime::Instant(value.with_timezone(&Utc).trunc_subsecs(0))
            }
        }
    }

    /// Dates map to midnight UTC.
    pub fn as_instant(&self) -> DateTime<Utc> {
        match self {
            CanonicalTime::Instant(dt) => *dt,
            CanonicalTime::Date(d) => d.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    fn as_date(&self) -> NaiveDate {
        match self {
            CanonicalTime::Instant(dt) => dt.date_naive(),
            CanonicalTime::Date(d) => *d,
        }
    }

    fn shifted_default(&self) -> Self {
        match self {
            CanonicalTime::Instant(dt) => CanonicalTime::Instant(*dt + Duration::hours(1)),
            CanonicalTime::Date(d) => CanonicalTime::Date(*d + Duration::days(1)),
        }
    }
}

impl fmt::Display for CanonicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalTime::Instant(dt) => {
                write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            CanonicalTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalStatus {
    Confirmed,
    Cancelled,
}

/// Where a canonical record came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Feed(Box<FeedEvent>),
    Destination { event_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalEvent {
    pub identity_key: String,
    pub feed_uid: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: CanonicalTime,
    pub end: CanonicalTime,
    pub is_all_day: bool,
    /// Display timezone of the original start, used when writing back
    pub source_timezone: Option<String>,
    pub origin: Origin,
    pub status: CanonicalStatus,
}

impl CanonicalEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status == CanonicalStatus::Cancelled
    }

    pub fn destination_id(&self) -> Option<&str> {
        match &self.origin {
            Origin::Destination { event_id } => Some(event_id),
            Origin::Feed(_) => None,
        }
    }

    /// Fields compared by the differencer, excluding status.
    pub fn same_content(&self, other: &CanonicalEvent) -> bool {
        self.title == other.title
            && self.description == other.description
            && self.location == other.location
            && self.start == other.start
            && self.end == other.end
    }

    /// Body written to the destination for this (feed-side) record.
    ///
    /// Timed values are emitted in the source timezone so the destination
    /// shows the publisher's local time.
    pub fn to_body(&self) -> EventBody {
        EventBody {
            id: Some(event_id_for(&self.identity_key)),
            feed_uid: self.feed_uid.clone(),
            summary: self.title.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            start: self.emit(&self.start),
            end: self.emit(&self.end),
            status: DestinationStatus::Confirmed,
        }
    }

    fn emit(&self, time: &CanonicalTime) -> DestinationTime {
        match time {
            CanonicalTime::Date(d) => DestinationTime::Date(*d),
            CanonicalTime::Instant(dt) => {
                match self.source_timezone.as_deref().and_then(|n| n.parse::<Tz>().ok()) {
                    Some(tz) => DestinationTime::DateTime {
                        value: dt.with_timezone(&tz).fixed_offset(),
                        time_zone: Some(tz.name().to_string()),
                    },
                    None => DestinationTime::DateTime {
                        value: dt.fixed_offset(),
                        time_zone: Some("UTC".to_string()),
                    },
                }
            }
        }
    }
}

impl fmt::Display for CanonicalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.start)
    }
}

/// Destination event id derived from an identity key: lowercase hex
/// SHA-256, which is valid base32hex for calendar services that restrict ids.
pub fn event_id_for(identity_key: &str) -> String {
    hex::encode(Sha256::digest(identity_key.as_bytes()))
}

pub fn identity_key(
    strategy: IdentityStrategy,
    uid: &str,
    title: &str,
    start: &CanonicalTime,
    end: &CanonicalTime,
) -> String {
    match strategy {
        IdentityStrategy::UidAndStart => format!("{}|{}", uid, start),
        IdentityStrategy::ContentFingerprint => format!("{}|{}|{}", title, start, end),
    }
}

/// Canonical records keyed by identity.
#[derive(Debug, Default)]
pub struct CanonicalTable {
    pub entries: BTreeMap<String, CanonicalEvent>,
}

impl CanonicalTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CanonicalEvent> {
        self.entries.get(key)
    }
}

/// Destination records plus the redundant live copies found while keying them.
#[derive(Debug, Default)]
pub struct DestinationTable {
    pub table: CanonicalTable,
    pub duplicates: Vec<CanonicalEvent>,
}

/// Maps both sides of one pass into canonical form.
pub struct Normalizer {
    strategy: IdentityStrategy,
    window: SyncWindow,
    tz: Tz,
}

impl Normalizer {
    /// `tz` decides which local day an all-day event falls on for window checks.
    pub fn new(strategy: IdentityStrategy, window: SyncWindow, tz: Tz) -> Self {
        Normalizer {
            strategy,
            window,
            tz,
        }
    }

    pub fn feed_event(&self, event: &FeedEvent) -> CanonicalEvent {
        let start = CanonicalTime::from_event_time(&event.start);
        let end = event
            .end
            .as_ref()
            .map(|end| align_end(&start, CanonicalTime::from_event_time(end)));
        let end = settle_end(&start, end);

        let title = title_or_default(event.summary.as_deref());
        let identity_key = identity_key(self.strategy, &event.uid, &title, &start, &end);

        CanonicalEvent {
            identity_key,
            feed_uid: event.uid.clone(),
            title,
            description: non_empty(event.description.as_deref()),
            location: non_empty(event.location.as_deref()),
            is_all_day: matches!(start, CanonicalTime::Date(_)),
            start,
            end,
            source_timezone: event.start.timezone().map(|tz| tz.name().to_string()),
            origin: Origin::Feed(Box::new(event.clone())),
            status: CanonicalStatus::Confirmed,
        }
    }

    /// None when the record has no usable start at all.
    pub fn destination_event(&self, event: &DestinationEvent) -> Option<CanonicalEvent> {
        let start_time = event.start.as_ref().or(event.original_start.as_ref())?;
        let start = CanonicalTime::from_destination_time(start_time);
        let end = event
            .end
            .as_ref()
            .filter(|_| event.start.is_some())
            .map(|end| align_end(&start, CanonicalTime::from_destination_time(end)));
        let end = settle_end(&start, end);

        let title = title_or_default(event.summary.as_deref());
        // Events without a recorded feed UID can never match the feed
        let uid = event.feed_uid.clone().unwrap_or_else(|| event.id.clone());
        let identity_key = identity_key(self.strategy, &uid, &title, &start, &end);

        let source_timezone = match start_time {
            DestinationTime::DateTime { time_zone, .. } => time_zone.clone(),
            DestinationTime::Date(_) => None,
        };

        Some(CanonicalEvent {
            identity_key,
            feed_uid: uid,
            title,
            description: non_empty(event.description.as_deref()),
            location: non_empty(event.location.as_deref()),
            is_all_day: matches!(start, CanonicalTime::Date(_)),
            start,
            end,
            source_timezone,
            origin: Origin::Destination {
                event_id: event.id.clone(),
            },
            status: match event.status {
                DestinationStatus::Confirmed => CanonicalStatus::Confirmed,
                DestinationStatus::Cancelled => CanonicalStatus::Cancelled,
            },
        })
    }

    /// Whether the record's start lies in the pass window.
    pub fn in_window(&self, event: &CanonicalEvent) -> bool {
        match event.start {
            CanonicalTime::Instant(dt) => self.window.contains(dt),
            CanonicalTime::Date(d) => self.window.contains(local_midnight(self.tz, d)),
        }
    }

    /// Key the feed instances. On collision the first instance wins.
    pub fn feed_table(&self, events: &[FeedEvent]) -> CanonicalTable {
        let mut table = CanonicalTable::default();
        for event in events {
            let canonical = self.feed_event(event);
            if !self.in_window(&canonical) {
                continue;
            }
            if table.entries.contains_key(&canonical.identity_key) {
                tracing::debug!(key = %canonical.identity_key, "duplicate feed instance ignored");
                continue;
            }
            table.entries.insert(canonical.identity_key.clone(), canonical);
        }
        table
    }

    /// Key the destination instances. A live record is preferred over a
    /// cancelled one; extra live copies of a key are returned as duplicates.
    pub fn destination_table(&self, events: &[DestinationEvent]) -> DestinationTable {
        let mut out = DestinationTable::default();
        for event in events {
            let Some(canonical) = self.destination_event(event) else {
                tracing::debug!(id = %event.id, "destination event without start ignored");
                continue;
            };
            if !self.in_window(&canonical) {
                continue;
            }

            let key = canonical.identity_key.clone();
            match out.table.entries.get(&key) {
                None => {
                    out.table.entries.insert(key, canonical);
                }
                Some(existing) if existing.is_cancelled() => {
                    out.table.entries.insert(key, canonical);
                }
                Some(_) if canonical.is_cancelled() => {}
                Some(_) => out.duplicates.push(canonical),
            }
        }
        out
    }
}

fn title_or_default(summary: Option<&str>) -> String {
    match summary {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => DEFAULT_TITLE.to_string(),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty()).map(str::to_string)
}

/// Express `end` in the same form as `start`.
fn align_end(start: &CanonicalTime, end: CanonicalTime) -> CanonicalTime {
    match (start, end) {
        (CanonicalTime::Date(_), CanonicalTime::Instant(_)) => CanonicalTime::Date(end.as_date()),
        (CanonicalTime::Instant(_), CanonicalTime::Date(_)) => {
            CanonicalTime::Instant(end.as_instant())
        }
        _ => end,
    }
}

/// Apply the default duration when the end is missing or before the start.
fn settle_end(start: &CanonicalTime, end: Option<CanonicalTime>) -> CanonicalTime {
    match end {
        Some(end) if end >= *start => end,
        _ => start.shifted_default(),
    }
}
