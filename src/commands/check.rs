use std::path::Path;

use anyhow::{Context, Result};
use calmirror_core::feed::FeedSource;
use calmirror_core::recurrence::{expand_feed, instances_per_uid};
use calmirror_core::{HttpFeed, SyncWindow, ics};
use chrono::Utc;

use super::load_config;

pub async fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Config: {}", config_path.display());

    if !config.is_configured() {
        anyhow::bail!("No feed_url configured");
    }

    let tz = match config.detected_timezone.as_deref().map(str::parse::<chrono_tz::Tz>) {
        Some(Ok(tz)) => tz,
        _ => config.full_sync_tz()?,
    };
    println!("Calendar: {}", config.calendar_id);
    println!("Timezone: {}", tz);

    let feed = HttpFeed::new(&config.feed_url, config.fetch_timeout())?;
    let content = feed
        .fetch()
        .await
        .with_context(|| format!("Failed to fetch {}", feed.url()))?;
    let events = ics::parse_feed(&content).context("Feed did not parse")?;
    println!("Feed: {} ({} events)", feed.url(), events.len());

    let today = Utc::now().with_timezone(&tz).date_naive();
    let windows = [
        ("quick", SyncWindow::quick(today, tz, config.quick_window_days)),
        (
            "full",
            SyncWindow::full(
                today,
                tz,
                config.full_window_past_days,
                config.full_window_future_days,
            ),
        ),
    ];
    for (name, window) in windows {
        let instances = expand_feed(&events, &window);
        let series = instances_per_uid(&instances).len();
        println!(
            "  {} window {}: {} instances from {} uids",
            name,
            window,
            instances.len(),
            series
        );
    }

    Ok(())
}
