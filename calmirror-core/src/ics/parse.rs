//! Feed parsing using the icalendar crate's parser.

use chrono::{NaiveDate, NaiveDateTime};
use icalendar::{
    DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};

use crate::error::{SyncError, SyncResult};
use crate::event::{EventTime, FeedEvent, FeedStatus, Recurrence};

/// Parse a whole feed into its VEVENT components.
///
/// Components missing a UID or DTSTART cannot be identified and are skipped.
pub fn parse_feed(content: &str) -> SyncResult<Vec<FeedEvent>> {
    if !content.contains("BEGIN:VCALENDAR") {
        return Err(SyncError::Parse(
            "payload is not an iCalendar document (no BEGIN:VCALENDAR)".to_string(),
        ));
    }

    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(SyncError::Parse)?;

    let mut vevents = Vec::new();
    collect_vevents(&calendar.components, &mut vevents);

    let mut events = Vec::with_capacity(vevents.len());
    for vevent in vevents {
        match parse_vevent(vevent) {
            Some(event) => events.push(event),
            None => {
                let uid = vevent.find_prop("UID").map(|p| p.val.to_string());
                tracing::warn!(uid = ?uid, "skipping VEVENT without UID or DTSTART");
            }
        }
    }

    Ok(events)
}

fn collect_vevents<'a, 'b>(components: &'b [Component<'a>], out: &mut Vec<&'b Component<'a>>) {
    for component in components {
        if component.name == "VEVENT" {
            out.push(component);
        } else {
            collect_vevents(&component.components, out);
        }
    }
}

fn parse_vevent(vevent: &Component) -> Option<FeedEvent> {
    let uid = vevent.find_prop("UID")?.val.to_string();
    if uid.trim().is_empty() {
        return None;
    }

    let start = to_event_time(DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?);
    let end = vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    let summary = text_prop(vevent, "SUMMARY");
    let description = text_prop(vevent, "DESCRIPTION");
    let location = text_prop(vevent, "LOCATION");

    let status = vevent
        .find_prop("STATUS")
        .map(|p| match p.val.as_ref() {
            "TENTATIVE" => FeedStatus::Tentative,
            "CANCELLED" => FeedStatus::Cancelled,
            _ => FeedStatus::Confirmed,
        })
        .unwrap_or(FeedStatus::Confirmed);

    // Recurrence (RRULE, RDATE, EXDATE)
    let rrule = vevent.find_prop("RRULE").map(|p| p.val.to_string());
    let rdates = date_list(vevent, "RDATE");
    let exdates = date_list(vevent, "EXDATE");
    let recurrence = rrule.map(|rrule| Recurrence {
        rrule,
        rdates,
        exdates,
    });

    let recurrence_id = vevent
        .find_prop("RECURRENCE-ID")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    Some(FeedEvent {
        uid,
        summary,
        description,
        location,
        start,
        end,
        status,
        recurrence,
        recurrence_id,
    })
}

fn text_prop(vevent: &Component, name: &str) -> Option<String> {
    vevent
        .find_prop(name)
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|s| !s.trim().is_empty())
}

/// Undo RFC 5545 TEXT escaping (`\n`, `\,`, `\;`, `\\`).
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Convert icalendar's DatePerhapsTime to our EventTime, preserving timezone info
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            icalendar::CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            icalendar::CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                EventTime::DateTimeZoned {
                    datetime: date_time,
                    tzid,
                }
            }
        },
    }
}

/// Every value of the repeatable `RDATE`/`EXDATE` property `name`.
/// Unparseable entries and `PERIOD` values are dropped.
fn date_list(vevent: &Component, name: &str) -> Vec<EventTime> {
    let mut times = Vec::new();
    for prop in vevent.properties.iter().filter(|p| p.name == name) {
        let all_day = param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));
        let tzid = param(prop, "TZID");
        times.extend(
            prop.val
                .as_ref()
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .filter_map(|v| list_value(v, all_day, tzid.as_deref())),
        );
    }
    times
}

fn param(prop: &Property, key: &str) -> Option<String> {
    prop.params
        .iter()
        .find(|p| {
            let name: &str = p.key.as_ref();
            name.eq_ignore_ascii_case(key)
        })
        .and_then(|p| p.val.as_ref())
        .map(|v| v.to_string())
}

fn list_value(value: &str, all_day: bool, tzid: Option<&str>) -> Option<EventTime> {
    if all_day || value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d").ok().map(EventTime::Date);
    }
    let (local, utc) = match value.strip_suffix('Z') {
        Some(local) => (local, true),
        None => (value, false),
    };
    let datetime = NaiveDateTime::parse_from_str(local, "%Y%m%dT%H%M%S").ok()?;
    Some(match (utc, tzid) {
        (true, _) => EventTime::DateTimeUtc(datetime.and_utc()),
        (false, Some(tzid)) => EventTime::DateTimeZoned {
            datetime,
            tzid: tzid.to_string(),
        },
        (false, None) => EventTime::DateTimeFloating(datetime),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_feed_reads_every_vevent() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:TEST\r\n\
BEGIN:VEVENT\r\n\
UID:one@example.com\r\n\
SUMMARY:Standup\r\n\
DTSTART:20250110T090000Z\r\n\
DTEND:20250110T091500Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:two@example.com\r\n\
SUMMARY:Holiday\r\n\
DTSTART;VALUE=DATE:20250112\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_feed(ics).expect("Should parse");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].uid, "one@example.com");
        assert_eq!(
            events[0].start,
            EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap())
        );
        assert_eq!(
            events[1].start,
            EventTime::Date(NaiveDate::from_ymd_opt(2025, 1, 12).unwrap())
        );
        assert!(events[1].end.is_none());
    }

    #[test]
    fn test_parse_feed_rejects_non_calendar_payload() {
        let err = parse_feed("<html><body>Login required</body></html>").unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }

    #[test]
    fn test_parse_feed_skips_events_without_uid() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:Anonymous\r\n\
DTSTART:20250110T090000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_feed(ics).expect("Should parse");
        assert!(events.is_empty());
    }

    #[test]
    fn test_parse_preserves_tzid_and_recurrence() {
        let ics = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:TEST
BEGIN:VEVENT
UID:weekly-123
SUMMARY:Recurring Event
DTSTART;TZID=America/New_York:20240101T100000
DTEND;TZID=America/New_York:20240101T110000
RRULE:FREQ=WEEKLY;BYDAY=MO
EXDATE;TZID=America/New_York:20240108T100000,20240115T100000
END:VEVENT
END:VCALENDAR"#;

        let events = parse_feed(ics).expect("Should parse");
        let event = &events[0];

        match &event.start {
            EventTime::DateTimeZoned { tzid, .. } => assert_eq!(tzid, "America/New_York"),
            other => panic!("Expected DateTimeZoned, got {:?}", other),
        }

        let recurrence = event.recurrence.as_ref().expect("Should have recurrence");
        assert_eq!(recurrence.rrule, "FREQ=WEEKLY;BYDAY=MO");
        assert_eq!(recurrence.exdates.len(), 2);
    }

    #[test]
    fn test_parse_unescapes_text_values() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:text-1\r\n\
SUMMARY:Lunch\\, then walk\r\n\
DESCRIPTION:Line one\\nLine two\r\n\
LOCATION:Room 4\\; floor 2\r\n\
DTSTART:20250110T120000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_feed(ics).expect("Should parse");
        let event = &events[0];

        assert_eq!(event.summary.as_deref(), Some("Lunch, then walk"));
        assert_eq!(event.description.as_deref(), Some("Line one\nLine two"));
        assert_eq!(event.location.as_deref(), Some("Room 4; floor 2"));
    }

    #[test]
    fn test_parse_reads_recurrence_id_and_cancelled_status() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:series-1\r\n\
RECURRENCE-ID:20250113T090000Z\r\n\
STATUS:CANCELLED\r\n\
DTSTART:20250113T090000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_feed(ics).expect("Should parse");
        let event = &events[0];

        assert_eq!(event.status, FeedStatus::Cancelled);
        assert_eq!(
            event.recurrence_id,
            Some(EventTime::DateTimeUtc(
                Utc.with_ymd_and_hms(2025, 1, 13, 9, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn test_date_lists_keep_their_value_types() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:lists-1\r\n\
DTSTART;VALUE=DATE:20250106\r\n\
RRULE:FREQ=DAILY\r\n\
EXDATE;VALUE=DATE:20250107,20250108\r\n\
RDATE:20250201T090000Z,20250202T090000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let events = parse_feed(ics).expect("Should parse");
        let recurrence = events[0].recurrence.as_ref().expect("Should have recurrence");

        assert_eq!(
            recurrence.exdates,
            vec![
                EventTime::Date(NaiveDate::from_ymd_opt(2025, 1, 7).unwrap()),
                EventTime::Date(NaiveDate::from_ymd_opt(2025, 1, 8).unwrap()),
            ]
        );
        assert_eq!(
            recurrence.rdates,
            vec![
                EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()),
                EventTime::DateTimeFloating(
                    NaiveDate::from_ymd_opt(2025, 2, 2).unwrap().and_hms_opt(9, 0, 0).unwrap()
                ),
            ]
        );
    }
}
