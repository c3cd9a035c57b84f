//! RRULE expansion for recurring feed events.
//!
//! Turns the feed's master events into one `FeedEvent` per occurrence inside
//! the pass window. Instance overrides (`RECURRENCE-ID`) replace the
//! occurrence they name; cancelled overrides and cancelled masters vanish.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;

use crate::event::{EventTime, FeedEvent, FeedStatus, Recurrence};
use crate::window::SyncWindow;

/// Upper bound on occurrences generated per series.
const MAX_OCCURRENCES: u16 = 5000;

/// Expand every recurring master in `events` into its occurrences within `window`.
///
/// Non-recurring events and overrides are passed through (minus cancelled ones).
/// Overrides come before generated occurrences so they win identity collisions.
pub fn expand_feed(events: &[FeedEvent], window: &SyncWindow) -> Vec<FeedEvent> {
    let mut overridden: HashSet<(String, DateTime<Utc>)> = HashSet::new();
    let mut out = Vec::new();

    for event in events.iter().filter(|e| e.recurrence_id.is_some()) {
        if let Some(rid) = &event.recurrence_id {
            overridden.insert((event.uid.clone(), rid.to_utc()));
        }
        if event.status != FeedStatus::Cancelled {
            out.push(event.clone());
        }
    }

    for event in events.iter().filter(|e| e.recurrence_id.is_none()) {
        if event.status == FeedStatus::Cancelled {
            tracing::debug!(uid = %event.uid, "dropping cancelled event");
            continue;
        }
        match &event.recurrence {
            None => out.push(event.clone()),
            Some(recurrence) => {
                for instance in expand_series(event, recurrence, window) {
                    let key = (instance.uid.clone(), instance.start.to_utc());
                    if !overridden.contains(&key) {
                        out.push(instance);
                    }
                }
            }
        }
    }

    out
}

/// Expand one master into instances. A rule that cannot be parsed yields
/// just the master's own first occurrence.
fn expand_series(master: &FeedEvent, recurrence: &Recurrence, window: &SyncWindow) -> Vec<FeedEvent> {
    let rrule_str = build_rrule_string(&master.start, recurrence);

    let rrule_set: RRuleSet = match rrule_str.parse() {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(
                uid = %master.uid,
                rrule = %recurrence.rrule,
                error = %e,
                "could not expand recurrence, keeping first occurrence only"
            );
            return vec![instance_at(master, master.start.clone())];
        }
    };

    // All-day occurrences sit at midnight UTC, which can fall a day outside a
    // window built from local midnights. Expand a day wide on each side and
    // leave the exact cut to the normalizer.
    let span = window.padded(Duration::days(1));
    let tz: rrule::Tz = Utc.into();
    let after = span.start.with_timezone(&tz);
    let before = span.end.with_timezone(&tz);

    let result = rrule_set.after(after).before(before).all(MAX_OCCURRENCES);
    if result.limited {
        tracing::warn!(uid = %master.uid, "recurrence hit the occurrence limit, window truncated");
    }

    result
        .dates
        .iter()
        .map(|occ| instance_at(master, occurrence_to_event_time(occ, &master.start)))
        .collect()
}

/// A copy of the master moved to `start`, keeping its duration.
fn instance_at(master: &FeedEvent, start: EventTime) -> FeedEvent {
    let end = master.end.as_ref().map(|end| match (&master.start, end) {
        (EventTime::Date(s), EventTime::Date(e)) => start.shifted(Duration::days((*e - *s).num_days())),
        _ => start.shifted(end.to_utc() - master.start.to_utc()),
    });

    FeedEvent {
        uid: master.uid.clone(),
        summary: master.summary.clone(),
        description: master.description.clone(),
        location: master.location.clone(),
        start: start.clone(),
        end,
        status: master.status,
        recurrence: None,
        recurrence_id: Some(start),
    }
}

/// Build an iCalendar-format rule block for the rrule crate parser.
fn build_rrule_string(start: &EventTime, recurrence: &Recurrence) -> String {
    let mut lines = Vec::new();

    lines.push(format!("DTSTART{}", rrule_value(start)));
    lines.push(format!("RRULE:{}", utc_until(&recurrence.rrule, start)));
    for rdate in &recurrence.rdates {
        lines.push(format!("RDATE{}", rrule_value(rdate)));
    }
    for exdate in &recurrence.exdates {
        lines.push(format!("EXDATE{}", rrule_value(exdate)));
    }

    lines.join("\n")
}

/// Rewrite a floating or date-only `UNTIL` into UTC, read in the same frame
/// as the series start. A date bound includes the whole of its last day.
fn utc_until(rule: &str, start: &EventTime) -> String {
    rule.split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") => match until_instant(value, start) {
                Some(until) => format!("{key}={}", until.format("%Y%m%dT%H%M%SZ")),
                None => part.to_string(),
            },
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn until_instant(value: &str, start: &EventTime) -> Option<DateTime<Utc>> {
    if value.ends_with('Z') || value.ends_with('z') {
        return None;
    }
    let naive = if value.len() == 8 {
        NaiveDate::parse_from_str(value, "%Y%m%d").ok()?.and_hms_opt(23, 59, 59)?
    } else {
        NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?
    };
    match start {
        EventTime::DateTimeZoned { tzid, .. } => Some(
            EventTime::DateTimeZoned {
                datetime: naive,
                tzid: tzid.clone(),
            }
            .to_utc(),
        ),
        _ => Some(naive.and_utc()),
    }
}

/// Parameters and value for one date line. The rrule crate needs datetimes,
/// so all-day dates become midnight UTC; unknown zones are treated as UTC.
fn rrule_value(time: &EventTime) -> String {
    match time {
        EventTime::Date(d) => format!(":{}T000000Z", d.format("%Y%m%d")),
        EventTime::DateTimeUtc(dt) => format!(":{}", dt.format("%Y%m%dT%H%M%SZ")),
        EventTime::DateTimeFloating(dt) => format!(":{}Z", dt.format("%Y%m%dT%H%M%S")),
        EventTime::DateTimeZoned { datetime, tzid } => {
            if tzid.parse::<Tz>().is_ok() {
                format!(";TZID={}:{}", tzid, datetime.format("%Y%m%dT%H%M%S"))
            } else {
                format!(":{}Z", datetime.format("%Y%m%dT%H%M%S"))
            }
        }
    }
}

/// Convert an rrule occurrence back to an EventTime matching the master's variant.
fn occurrence_to_event_time(dt: &DateTime<rrule::Tz>, master_start: &EventTime) -> EventTime {
    match master_start {
        EventTime::Date(_) => EventTime::Date(dt.date_naive()),
        EventTime::DateTimeUtc(_) => EventTime::DateTimeUtc(dt.with_timezone(&Utc)),
        EventTime::DateTimeFloating(_) => EventTime::DateTimeFloating(dt.naive_utc()),
        EventTime::DateTimeZoned { tzid, .. } => EventTime::DateTimeZoned {
            datetime: dt.naive_local(),
            tzid: tzid.clone(),
        },
    }
}

/// Count of instances per UID, for logging.
pub fn instances_per_uid(events: &[FeedEvent]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for event in events {
        *counts.entry(event.uid.as_str()).or_insert(0) += 1;
    }
    counts
}
