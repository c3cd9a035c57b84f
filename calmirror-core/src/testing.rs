//! In-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Notify;

use crate::destination::{
    Destination, DestinationEvent, DestinationStatus, DestinationTime, EventBody, EventPage,
};
use crate::error::{SyncError, SyncResult};
use crate::feed::FeedSource;
use crate::window::SyncWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Get,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calls {
    pub lists: usize,
    pub gets: usize,
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl Calls {
    pub fn mutations(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

#[derive(Default)]
struct State {
    events: Vec<DestinationEvent>,
    hidden: HashSet<String>,
    failures: HashMap<Op, VecDeque<SyncError>>,
    calls: Calls,
    history: Vec<Op>,
    next_id: usize,
}

/// Destination backed by a Vec. Deleting marks events cancelled, and
/// inserting an id that already exists (even cancelled) is a conflict.
pub struct MemoryDestination {
    state: Mutex<State>,
    page_size: usize,
    timezone: Option<String>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        MemoryDestination {
            state: Mutex::new(State::default()),
            page_size: 250,
            timezone: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_timezone(mut self, tz: &str) -> Self {
        self.timezone = Some(tz.to_string());
        self
    }

    pub fn seed(&self, event: DestinationEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    /// Keep `id` out of listings, as a stale index would.
    pub fn hide_from_list(&self, id: &str) {
        self.state.lock().unwrap().hidden.insert(id.to_string());
    }

    pub fn fail_next(&self, op: Op, err: SyncError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn fail_next_list(&self, err: SyncError) {
        self.fail_next(Op::List, err);
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }

    /// Every operation attempted, in order.
    pub fn history(&self) -> Vec<Op> {
        self.state.lock().unwrap().history.clone()
    }

    pub fn events(&self) -> Vec<DestinationEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn live_events(&self) -> Vec<DestinationEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.status == DestinationStatus::Confirmed)
            .collect()
    }

    fn begin(&self, op: Op) -> SyncResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().unwrap();
        match op {
            Op::List => state.calls.lists += 1,
            Op::Get => state.calls.gets += 1,
            Op::Insert => state.calls.inserts += 1,
            Op::Update => state.calls.updates += 1,
            Op::Delete => state.calls.deletes += 1,
        }
        state.history.push(op);
        if let Some(err) = state.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        Ok(state)
    }
}

fn instant(time: &DestinationTime) -> Option<DateTime<Utc>> {
    match time {
        DestinationTime::Date(d) => Some(d.and_hms_opt(0, 0, 0)?.and_utc()),
        DestinationTime::DateTime { value, .. } => Some(value.with_timezone(&Utc)),
    }
}

/// Listed like the real service: anything overlapping the window.
fn overlaps(event: &DestinationEvent, window: &SyncWindow) -> bool {
    let Some(start) = event.start.as_ref().or(event.original_start.as_ref()).and_then(instant) else {
        return false;
    };
    let end = event.end.as_ref().and_then(instant).unwrap_or(start);
    start < window.end && (end > window.start || start >= window.start)
}

fn apply_body(event: &mut DestinationEvent, body: &EventBody) {
    event.feed_uid = Some(body.feed_uid.clone());
    event.summary = Some(body.summary.clone());
    event.description = body.description.clone();
    event.location = body.location.clone();
    event.start = Some(body.start.clone());
    event.end = Some(body.end.clone());
    event.status = body.status;
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn list_events(
        &self,
        _calendar_id: &str,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> SyncResult<EventPage> {
        let state = self.begin(Op::List)?;
        let matching: Vec<DestinationEvent> = state
            .events
            .iter()
            .filter(|e| !state.hidden.contains(&e.id))
            .filter(|e| overlaps(e, window))
            .cloned()
            .collect();

        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + self.page_size).min(matching.len());
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(EventPage {
            events: matching[offset.min(end)..end].to_vec(),
            next_page_token,
        })
    }

    async fn get_event(&self, _calendar_id: &str, event_id: &str) -> SyncResult<DestinationEvent> {
        let state = self.begin(Op::Get)?;
        state
            .events
            .iter()
            .find(|e| e.id == event_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(event_id.to_string()))
    }

    async fn insert_event(
        &self,
        _calendar_id: &str,
        body: &EventBody,
    ) -> SyncResult<DestinationEvent> {
        let mut state = self.begin(Op::Insert)?;
        let id = match &body.id {
            Some(id) if state.events.iter().any(|e| &e.id == id) => {
                return Err(SyncError::Conflict(format!("{} already exists", id)));
            }
            Some(id) => id.clone(),
            None => {
                state.next_id += 1;
                format!("mem{}", state.next_id)
            }
        };

        let mut event = DestinationEvent {
            id,
            feed_uid: None,
            summary: None,
            description: None,
            location: None,
            start: None,
            end: None,
            original_start: None,
            status: DestinationStatus::Confirmed,
        };
        apply_body(&mut event, body);
        state.events.push(event.clone());
        Ok(event)
    }

    async fn update_event(
        &self,
        _calendar_id: &str,
        event_id: &str,
        body: &EventBody,
    ) -> SyncResult<DestinationEvent> {
        let mut state = self.begin(Op::Update)?;
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .ok_or_else(|| SyncError::NotFound(event_id.to_string()))?;
        apply_body(event, body);
        Ok(event.clone())
    }

    async fn delete_event(&self, _calendar_id: &str, event_id: &str) -> SyncResult<()> {
        let mut state = self.begin(Op::Delete)?;
        match state
            .events
            .iter_mut()
            .find(|e| e.id == event_id && e.status == DestinationStatus::Confirmed)
        {
            Some(event) => {
                event.status = DestinationStatus::Cancelled;
                Ok(())
            }
            None => Err(SyncError::NotFound(format!("{} is gone", event_id))),
        }
    }

    async fn calendar_timezone(&self, _calendar_id: &str) -> SyncResult<Option<String>> {
        Ok(self.timezone.clone())
    }
}

/// A confirmed one-hour event starting at `hour:00` UTC.
pub fn timed_event(id: &str, uid: &str, year: i32, month: u32, day: u32, hour: u32) -> DestinationEvent {
    let start = Utc.with_ymd_and_hms(year, month, day, hour, 0, 0).unwrap();
    DestinationEvent {
        id: id.to_string(),
        feed_uid: Some(uid.to_string()),
        summary: Some("Standup".to_string()),
        description: None,
        location: None,
        start: Some(DestinationTime::DateTime {
            value: start.fixed_offset(),
            time_zone: Some("UTC".to_string()),
        }),
        end: Some(DestinationTime::DateTime {
            value: (start + Duration::hours(1)).fixed_offset(),
            time_zone: Some("UTC".to_string()),
        }),
        original_start: None,
        status: DestinationStatus::Confirmed,
    }
}

/// One VEVENT block with UTC times.
pub fn ics_event(uid: &str, summary: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        "BEGIN:VEVENT\r\nUID:{}\r\nSUMMARY:{}\r\nDTSTART:{}\r\nDTEND:{}\r\nEND:VEVENT\r\n",
        uid,
        summary,
        start.format("%Y%m%dT%H%M%SZ"),
        end.format("%Y%m%dT%H%M%SZ"),
    )
}

pub fn ics_calendar(events: &[String]) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//calmirror//test//EN\r\n{}END:VCALENDAR\r\n",
        events.concat()
    )
}

/// Feed that serves a fixed body.
pub struct StaticFeed {
    body: String,
    fetches: AtomicUsize,
}

impl StaticFeed {
    pub fn new(body: impl Into<String>) -> Self {
        StaticFeed {
            body: body.into(),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn fetch(&self) -> SyncResult<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.clone())
    }
}

/// Feed that parks inside `fetch` until released, to hold a pass open.
pub struct GatedFeed {
    pub inner: StaticFeed,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedFeed {
    pub fn new(body: impl Into<String>) -> Self {
        GatedFeed {
            inner: StaticFeed::new(body),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl FeedSource for GatedFeed {
    async fn fetch(&self) -> SyncResult<String> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.fetch().await
    }
}

/// Feed that always fails.
pub struct FailingFeed;

#[async_trait]
impl FeedSource for FailingFeed {
    async fn fetch(&self) -> SyncResult<String> {
        Err(SyncError::Fetch("connection refused".into()))
    }
}
