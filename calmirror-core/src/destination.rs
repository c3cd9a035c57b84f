//! The destination calendar as the reconciler sees it.
//!
//! `Destination` is the seam between the engine and a calendar service.
//! Implementations map their wire format to the types here and their
//! failures onto [`SyncError`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::window::SyncWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationStatus {
    Confirmed,
    /// Logically deleted but still listed
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DestinationTime {
    Date(NaiveDate),
    DateTime {
        value: DateTime<FixedOffset>,
        time_zone: Option<String>,
    },
}

impl fmt::Display for DestinationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            DestinationTime::DateTime { value, .. } => write!(f, "{}", value.to_rfc3339()),
        }
    }
}

/// One event instance as stored in the destination calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationEvent {
    pub id: String,
    /// Feed UID this event was created from, if the destination kept it
    pub feed_uid: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    /// Cancelled instances may carry no start of their own
    pub start: Option<DestinationTime>,
    pub end: Option<DestinationTime>,
    /// Start of the series occurrence this instance came from
    pub original_start: Option<DestinationTime>,
    pub status: DestinationStatus,
}

/// What is written on insert and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    /// Caller-chosen event id; only honoured on insert
    pub id: Option<String>,
    pub feed_uid: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DestinationTime,
    pub end: DestinationTime,
    pub status: DestinationStatus,
}

#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<DestinationEvent>,
    pub next_page_token: Option<String>,
}

/// Operations consumed from a destination calendar service.
#[async_trait]
pub trait Destination: Send + Sync {
    /// One page of event instances overlapping `window`, recurring
    /// entries expanded and cancelled instances included.
    async fn list_events(
        &self,
        calendar_id: &str,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> SyncResult<EventPage>;

    async fn get_event(&self, calendar_id: &str, event_id: &str) -> SyncResult<DestinationEvent>;

    async fn insert_event(&self, calendar_id: &str, body: &EventBody)
    -> SyncResult<DestinationEvent>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        body: &EventBody,
    ) -> SyncResult<DestinationEvent>;

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> SyncResult<()>;

    /// IANA timezone of the calendar, if the service reports one.
    async fn calendar_timezone(&self, _calendar_id: &str) -> SyncResult<Option<String>> {
        Ok(None)
    }
}

/// Read every page of events in `window`.
pub async fn read_all(
    destination: &dyn Destination,
    calendar_id: &str,
    window: &SyncWindow,
) -> SyncResult<Vec<DestinationEvent>> {
    let mut events = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = destination
            .list_events(calendar_id, window, page_token.as_deref())
            .await
            .map_err(SyncError::into_read_failure)?;
        pages += 1;
        events.extend(page.events);

        match page.next_page_token {
            Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                return Err(SyncError::Unexpected(format!(
                    "destination returned the same page token twice ({})",
                    next
                )));
            }
            Some(next) => page_token = Some(next),
            None => break,
        }
    }

    tracing::debug!(pages, events = events.len(), "read destination");
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDestination, timed_event};
    use chrono::{TimeZone, Utc};

    fn january() -> SyncWindow {
        SyncWindow::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_read_all_follows_page_tokens() {
        let dest = MemoryDestination::new().with_page_size(2);
        for day in 1..=5 {
            dest.seed(timed_event(&format!("e{}", day), "uid", 2025, 1, day, 9));
        }

        let events = read_all(&dest, "primary", &january()).await.unwrap();

        assert_eq!(events.len(), 5);
        assert_eq!(dest.calls().lists, 3);
    }

    #[tokio::test]
    async fn test_read_failures_surface_as_fetch_errors() {
        let dest = MemoryDestination::new();
        dest.fail_next_list(SyncError::Transient("backend error".into()));

        let err = read_all(&dest, "primary", &january()).await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_auth_failures_are_kept_distinct() {
        let dest = MemoryDestination::new();
        dest.fail_next_list(SyncError::Auth("invalid_grant".into()));

        let err = read_all(&dest, "primary", &january()).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }
}
