pub mod check;
pub mod run;
pub mod sync;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use calmirror_core::{ActivityLog, Config, Destination, HttpFeed, Reconciler, Scheduler};
use calmirror_provider_google::GoogleCalendar;

pub fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Wire the feed, the Google destination and the activity log into a scheduler.
pub async fn build_scheduler(mut config: Config, config_path: &Path) -> Result<Scheduler> {
    let destination = GoogleCalendar::from_settings(&config.google, config.fetch_timeout())
        .context("Failed to set up Google Calendar access")?;
    remember_destination_timezone(&mut config, config_path, &destination).await;

    let feed = HttpFeed::new(&config.feed_url, config.fetch_timeout())
        .context("Failed to set up feed client")?;
    let log = Arc::new(ActivityLog::new(config.log_retention));

    let reconciler = Reconciler::new(config, Arc::new(feed), Arc::new(destination), log);
    Scheduler::new(reconciler).context("Invalid scheduler settings")
}

/// Cache the destination calendar's timezone in the config file, so passes
/// still get a sensible window if the calendar cannot be asked later.
async fn remember_destination_timezone(
    config: &mut Config,
    config_path: &Path,
    destination: &dyn Destination,
) {
    let tz = match destination.calendar_timezone(&config.calendar_id).await {
        Ok(Some(tz)) if tz.parse::<chrono_tz::Tz>().is_ok() => tz,
        Ok(_) => return,
        Err(err) => {
            tracing::warn!(error = %err, "could not read calendar timezone");
            return;
        }
    };

    if !config.remember_timezone(&tz) {
        return;
    }
    match config.persist_detected_timezone(config_path) {
        Ok(()) => tracing::info!(timezone = %tz, "saved calendar timezone to config"),
        Err(err) => tracing::warn!(error = %err, "could not save detected timezone"),
    }
}
