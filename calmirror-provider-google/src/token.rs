//! Access tokens for the Calendar API.
//!
//! calmirror never runs an OAuth flow itself. A token is either configured
//! directly or kept in a file that some other process refreshes.

use std::path::PathBuf;

use async_trait::async_trait;
use calmirror_core::{SyncError, SyncResult};
use serde::Deserialize;

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> SyncResult<String>;
}

/// A fixed bearer token.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> SyncResult<String> {
        Ok(self.0.clone())
    }
}

/// Token read from disk on every request, so an external refresher can
/// rotate it without restarting the service.
///
/// The file holds either the bare token or a JSON object with an
/// `access_token` field.
pub struct TokenFile {
    path: PathBuf,
}

#[derive(Deserialize)]
struct StoredToken {
    access_token: String,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenFile { path: path.into() }
    }
}

#[async_trait]
impl TokenSource for TokenFile {
    async fn access_token(&self) -> SyncResult<String> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SyncError::Auth(format!("Cannot read token file {}: {}", self.path.display(), e))
        })?;
        parse_token(&contents)
            .ok_or_else(|| SyncError::Auth(format!("No access token in {}", self.path.display())))
    }
}

fn parse_token(contents: &str) -> Option<String> {
    let contents = contents.trim();
    let token = if contents.starts_with('{') {
        serde_json::from_str::<StoredToken>(contents).ok()?.access_token
    } else {
        contents.to_string()
    };
    let token = token.trim().to_string();
    (!token.is_empty()).then_some(token)
}
