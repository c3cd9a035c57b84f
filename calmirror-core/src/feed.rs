//! Fetching the source feed.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SyncError, SyncResult};

const USER_AGENT: &str = concat!("calmirror/", env!("CARGO_PKG_VERSION"));

/// Where the raw feed text comes from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> SyncResult<String>;
}

/// Feed served over HTTP(S). `webcal://` URLs are fetched over HTTPS.
pub struct HttpFeed {
    url: String,
    client: reqwest::Client,
}

impl HttpFeed {
    pub fn new(url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SyncError::Fetch(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpFeed {
            url: normalize_feed_url(url),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    async fn fetch(&self) -> SyncResult<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SyncError::Fetch(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Fetch(format!(
                "{} returned HTTP {}",
                self.url, status
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SyncError::Fetch(format!("Failed to read feed body: {}", e)))
    }
}

fn normalize_feed_url(url: &str) -> String {
    let url = url.trim();
    match url.strip_prefix("webcal://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_webcal_urls_use_https() {
        assert_eq!(
            normalize_feed_url("webcal://example.com/cal.ics"),
            "https://example.com/cal.ics"
        );
        assert_eq!(
            normalize_feed_url(" http://example.com/cal.ics "),
            "http://example.com/cal.ics"
        );
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cal.ics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n"))
            .mount(&server)
            .await;

        let feed = HttpFeed::new(&format!("{}/cal.ics", server.uri()), Duration::from_secs(5)).unwrap();
        let body = feed.fetch().await.expect("Should fetch");

        assert!(body.starts_with("BEGIN:VCALENDAR"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let feed = HttpFeed::new(&format!("{}/cal.ics", server.uri()), Duration::from_secs(5)).unwrap();
        let err = feed.fetch().await.unwrap_err();

        assert!(matches!(err, SyncError::Fetch(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_slow_feed_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let feed =
            HttpFeed::new(&format!("{}/cal.ics", server.uri()), Duration::from_millis(200)).unwrap();
        let err = feed.fetch().await.unwrap_err();

        assert!(matches!(err, SyncError::Fetch(_)), "got {:?}", err);
    }
}
