//! Google Calendar as a calmirror destination, over the v3 REST API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calmirror_core::config::GoogleSettings;
use calmirror_core::{
    Destination, DestinationEvent, EventBody, EventPage, SyncError, SyncResult, SyncWindow,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::google_event::{FromGoogle, ToGoogle};
use crate::token::{StaticToken, TokenFile, TokenSource};
use crate::types::{CalendarResource, ErrorEnvelope, EventList, GoogleEvent};

const USER_AGENT: &str = concat!("calmirror/", env!("CARGO_PKG_VERSION"));
const MAX_RESULTS: &str = "2500";
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

pub struct GoogleCalendar {
    http: reqwest::Client,
    api_base: Url,
    token: Arc<dyn TokenSource>,
}

impl GoogleCalendar {
    pub fn new(api_base: &str, token: Arc<dyn TokenSource>, timeout: Duration) -> SyncResult<Self> {
        let api_base = Url::parse(api_base)
            .map_err(|e| SyncError::Config(format!("Invalid API base {}: {}", api_base, e)))?;
        if api_base.cannot_be_a_base() {
            return Err(SyncError::Config(format!("Invalid API base {}", api_base)));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(GoogleCalendar {
            http,
            api_base,
            token,
        })
    }

    /// A token file takes precedence over an inline token.
    pub fn from_settings(settings: &GoogleSettings, timeout: Duration) -> SyncResult<Self> {
        let token: Arc<dyn TokenSource> = match (&settings.token_file, &settings.access_token) {
            (Some(path), _) => Arc::new(TokenFile::new(path)),
            (None, Some(token)) if !token.trim().is_empty() => {
                Arc::new(StaticToken::new(token.trim()))
            }
            _ => {
                return Err(SyncError::Config(
                    "Set google.access_token or google.token_file".into(),
                ));
            }
        };
        Self::new(&settings.api_base, token, timeout)
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn events_url(&self, calendar_id: &str) -> Url {
        self.url(&["calendars", calendar_id, "events"])
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> Url {
        self.url(&["calendars", calendar_id, "events", event_id])
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        let token = self.token.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, url: Url) -> SyncResult<T> {
        let response = self.send(self.http.request(method, url)).await?;
        read_json(response).await
    }

    async fn write(&self, method: Method, url: Url, event: &GoogleEvent) -> SyncResult<DestinationEvent> {
        let request = self.http.request(method, url).json(event);
        let event: GoogleEvent = read_json(self.send(request).await?).await?;
        DestinationEvent::from_google(event)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    response
        .json()
        .await
        .map_err(|e| SyncError::Unexpected(format!("Malformed Google response: {}", e)))
}

fn transport_error(err: reqwest::Error) -> SyncError {
    SyncError::Transient(format!("Google Calendar request failed: {}", err))
}

/// Map an HTTP failure onto the engine's error kinds.
fn status_error(status: StatusCode, body: &str) -> SyncError {
    let api = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_default();
    let message = if api.message.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, api.message)
    };

    match status.as_u16() {
        401 => SyncError::Auth(message),
        403 if api.has_reason(RATE_LIMIT_REASONS) => SyncError::RateLimited(message),
        403 => SyncError::Auth(message),
        429 => SyncError::RateLimited(message),
        409 => SyncError::Conflict(message),
        404 | 410 => SyncError::NotFound(message),
        500..=599 => SyncError::Transient(message),
        _ => SyncError::Unexpected(message),
    }
}

#[async_trait]
impl Destination for GoogleCalendar {
    async fn list_events(
        &self,
        calendar_id: &str,
        window: &SyncWindow,
        page_token: Option<&str>,
    ) -> SyncResult<EventPage> {
        let mut url = self.events_url(calendar_id);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("timeMin", &window.start_rfc3339())
                .append_pair("timeMax", &window.end_rfc3339())
                .append_pair("singleEvents", "true")
                .append_pair("showDeleted", "true")
                .append_pair("maxResults", MAX_RESULTS);
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let list: EventList = self.call(Method::GET, url).await?;
        let mut events = Vec::with_capacity(list.items.len());
        for item in list.items {
            match DestinationEvent::from_google(item) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("Skipping unreadable Google event: {}", e),
            }
        }

        Ok(EventPage {
            events,
            next_page_token: list.next_page_token,
        })
    }

    async fn get_event(&self, calendar_id: &str, event_id: &str) -> SyncResult<DestinationEvent> {
        let event: GoogleEvent = self
            .call(Method::GET, self.event_url(calendar_id, event_id))
            .await?;
        DestinationEvent::from_google(event)
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        body: &EventBody,
    ) -> SyncResult<DestinationEvent> {
        self.write(Method::POST, self.events_url(calendar_id), &body.to_google())
            .await
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        body: &EventBody,
    ) -> SyncResult<DestinationEvent> {
        // The URL carries the id on update
        let event = GoogleEvent {
            id: None,
            ..body.to_google()
        };
        self.write(Method::PUT, self.event_url(calendar_id, event_id), &event)
            .await
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> SyncResult<()> {
        let request = self
            .http
            .request(Method::DELETE, self.event_url(calendar_id, event_id));
        self.send(request).await?;
        Ok(())
    }

    async fn calendar_timezone(&self, calendar_id: &str) -> SyncResult<Option<String>> {
        let calendar: CalendarResource = self
            .call(Method::GET, self.url(&["calendars", calendar_id]))
            .await?;
        Ok(calendar.time_zone.filter(|tz| !tz.is_empty()))
    }
}
