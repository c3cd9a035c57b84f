//! Service configuration.
//!
//! Read from `~/.config/calmirror/config.toml` (or an explicit path) and
//! layered with `CALMIRROR_*` environment variables. Nested keys use a double
//! underscore, e.g. `CALMIRROR_RETRY__MAX_RETRIES=5`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

fn default_calendar_id() -> String {
    "primary".to_string()
}
fn default_quick_interval() -> u64 {
    900
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_quick_window_days() -> u32 {
    7
}
fn default_past_days() -> u32 {
    30
}
fn default_future_days() -> u32 {
    365
}
fn default_mutation_delay_ms() -> u64 {
    300
}
fn default_cooldown() -> u64 {
    60
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_log_retention() -> usize {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    5
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

/// How a canonical event's identity key is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Feed UID plus UTC start instant (or date for all-day events)
    #[default]
    UidAndStart,
    /// Title plus normalized start and end, for destinations that drop the UID
    ContentFingerprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_seconds: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_retries: default_max_retries(),
            base_delay_seconds: default_base_delay(),
        }
    }
}

/// Destination credentials. Acquiring and refreshing tokens happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleSettings {
    pub access_token: Option<String>,
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        GoogleSettings {
            access_token: None,
            token_file: None,
            api_base: default_api_base(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Empty means "not configured yet"; the scheduler idles.
    #[serde(default)]
    pub feed_url: String,

    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,

    #[serde(default = "default_quick_interval")]
    pub quick_sync_interval_seconds: u64,

    #[serde(default)]
    pub full_sync_hour: u32,

    #[serde(default = "default_timezone")]
    pub full_sync_timezone: String,

    #[serde(default = "default_quick_window_days")]
    pub quick_window_days: u32,

    #[serde(default = "default_past_days")]
    pub full_window_past_days: u32,

    #[serde(default = "default_future_days")]
    pub full_window_future_days: u32,

    #[serde(default)]
    pub identity_strategy: IdentityStrategy,

    #[serde(default = "default_mutation_delay_ms")]
    pub mutation_delay_ms: u64,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_seconds: u64,

    #[serde(default = "default_log_retention")]
    pub log_retention: usize,

    /// Destination calendar timezone seen on the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_timezone: Option<String>,

    #[serde(default)]
    pub google: GoogleSettings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed_url: String::new(),
            calendar_id: default_calendar_id(),
            quick_sync_interval_seconds: default_quick_interval(),
            full_sync_hour: 0,
            full_sync_timezone: default_timezone(),
            quick_window_days: default_quick_window_days(),
            full_window_past_days: default_past_days(),
            full_window_future_days: default_future_days(),
            identity_strategy: IdentityStrategy::default(),
            mutation_delay_ms: default_mutation_delay_ms(),
            retry: RetrySettings::default(),
            cooldown_seconds: default_cooldown(),
            fetch_timeout_seconds: default_fetch_timeout(),
            log_retention: default_log_retention(),
            detected_timezone: None,
            google: GoogleSettings::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> SyncResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SyncError::Config("Could not determine config directory".into()))?
            .join("calmirror");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from `path` (missing file is fine) with environment overrides, then validate.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path.to_path_buf())
                    .format(::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                ::config::Environment::with_prefix("CALMIRROR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        let cfg: Config = settings
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(content: &str) -> SyncResult<Self> {
        let cfg: Config = toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write `detected_timezone` into the file at `path`, leaving every other
    /// key as the user wrote it. Values layered from the environment are
    /// never copied to disk.
    pub fn persist_detected_timezone(&self, path: &Path) -> SyncResult<()> {
        let mut table = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str::<toml::Table>(&content)
                .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(e.into()),
        };

        match &self.detected_timezone {
            Some(tz) => {
                table.insert("detected_timezone".into(), toml::Value::String(tz.clone()));
            }
            None => {
                table.remove("detected_timezone");
            }
        }

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content =
            toml::to_string_pretty(&table).map_err(|e| SyncError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.full_sync_hour > 23 {
            return Err(SyncError::Config(format!(
                "full_sync_hour must be 0-23, got {}",
                self.full_sync_hour
            )));
        }
        self.full_sync_tz()?;
        if self.quick_sync_interval_seconds == 0 {
            return Err(SyncError::Config(
                "quick_sync_interval_seconds must be positive".into(),
            ));
        }
        if self.log_retention == 0 {
            return Err(SyncError::Config("log_retention must be positive".into()));
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.feed_url.trim().is_empty()
    }

    pub fn full_sync_tz(&self) -> SyncResult<Tz> {
        self.full_sync_timezone.parse().map_err(|_| {
            SyncError::Config(format!("Unknown timezone: {}", self.full_sync_timezone))
        })
    }

    pub fn quick_interval(&self) -> Duration {
        Duration::from_secs(self.quick_sync_interval_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn mutation_delay(&self) -> Duration {
        Duration::from_millis(self.mutation_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// Record the destination's timezone. Returns true if it changed.
    pub fn remember_timezone(&mut self, tz: &str) -> bool {
        if self.detected_timezone.as_deref() == Some(tz) {
            return false;
        }
        self.detected_timezone = Some(tz.to_string());
        true
    }
}
