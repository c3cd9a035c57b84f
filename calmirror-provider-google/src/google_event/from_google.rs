use calmirror_core::{DestinationEvent, DestinationStatus, DestinationTime, SyncError, SyncResult};

use crate::types::{EventDateTime, FEED_UID_PROPERTY, GoogleEvent};

pub trait FromGoogle {
    fn from_google(event: GoogleEvent) -> SyncResult<Self>
    where
        Self: Sized;
}

impl FromGoogle for DestinationEvent {
    fn from_google(event: GoogleEvent) -> SyncResult<Self> {
        let id = event
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SyncError::Unexpected("Google returned an event without an id".into()))?;

        // Events we wrote carry the feed UID privately; anything else
        // (imports, manual copies) is matched by its iCalUID.
        let feed_uid = event
            .private_property(FEED_UID_PROPERTY)
            .map(str::to_string)
            .or_else(|| event.ical_uid.clone());

        let status = match event.status.as_deref() {
            Some("cancelled") => DestinationStatus::Cancelled,
            _ => DestinationStatus::Confirmed,
        };

        Ok(DestinationEvent {
            id,
            feed_uid,
            summary: event.summary,
            description: event.description.filter(|d| !d.is_empty()),
            location: event.location.filter(|l| !l.is_empty()),
            start: event.start.as_ref().and_then(time_from_google),
            end: event.end.as_ref().and_then(time_from_google),
            original_start: event.original_start_time.as_ref().and_then(time_from_google),
            status,
        })
    }
}

fn time_from_google(time: &EventDateTime) -> Option<DestinationTime> {
    if let Some(value) = time.date_time {
        Some(DestinationTime::DateTime {
            value,
            time_zone: time.time_zone.clone(),
        })
    } else {
        time.date.map(DestinationTime::Date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn parse(json: serde_json::Value) -> GoogleEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_private_uid_wins_over_ical_uid() {
        let event = DestinationEvent::from_google(parse(serde_json::json!({
            "id": "abc",
            "status": "confirmed",
            "summary": "Standup",
            "iCalUID": "abc@google.com",
            "start": {"dateTime": "2025-03-10T09:00:00+01:00", "timeZone": "Europe/Berlin"},
            "end": {"dateTime": "2025-03-10T10:00:00+01:00", "timeZone": "Europe/Berlin"},
            "extendedProperties": {"private": {"calmirrorUid": "feed-1"}}
        })))
        .unwrap();

        assert_eq!(event.id, "abc");
        assert_eq!(event.feed_uid.as_deref(), Some("feed-1"));
        assert_eq!(event.status, DestinationStatus::Confirmed);
        match event.start {
            Some(DestinationTime::DateTime { value, time_zone }) => {
                assert_eq!(value.to_rfc3339(), "2025-03-10T09:00:00+01:00");
                assert_eq!(time_zone.as_deref(), Some("Europe/Berlin"));
            }
            other => panic!("unexpected start {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_instance_without_times() {
        let event = DestinationEvent::from_google(parse(serde_json::json!({
            "id": "abc_20250310",
            "status": "cancelled",
            "iCalUID": "series-uid",
            "originalStartTime": {"date": "2025-03-10"}
        })))
        .unwrap();

        assert_eq!(event.status, DestinationStatus::Cancelled);
        assert_eq!(event.feed_uid.as_deref(), Some("series-uid"));
        assert!(event.start.is_none());
        assert_eq!(
            event.original_start,
            Some(DestinationTime::Date(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()))
        );
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let result = DestinationEvent::from_google(parse(serde_json::json!({"summary": "x"})));
        assert!(matches!(result, Err(SyncError::Unexpected(_))));
    }
}
