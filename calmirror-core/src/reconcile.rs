//! One reconciliation pass: fetch, read, normalize, diff, apply.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::activity::{ActivityLog, LogLevel};
use crate::apply::{Applier, EventError, Pacer, RetryPolicy};
use crate::config::Config;
use crate::destination::{Destination, read_all};
use crate::diff::SyncDiff;
use crate::error::SyncResult;
use crate::feed::FeedSource;
use crate::ics::parse_feed;
use crate::normalize::Normalizer;
use crate::recurrence::{expand_feed, instances_per_uid};
use crate::window::SyncWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    Quick,
    Full,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassKind::Quick => write!(f, "quick"),
            PassKind::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub kind: PassKind,
    pub window: SyncWindow,
    /// Timezone the window was computed in
    pub timezone: String,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub errors: Vec<EventError>,
}

/// Which timezone a pass used, and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimezoneSource {
    Destination,
    Cached,
    Configured,
}

pub struct Reconciler {
    config: Config,
    feed: Arc<dyn FeedSource>,
    destination: Arc<dyn Destination>,
    log: Arc<ActivityLog>,
    policy: RetryPolicy,
    pacer: Pacer,
}

impl Reconciler {
    pub fn new(
        config: Config,
        feed: Arc<dyn FeedSource>,
        destination: Arc<dyn Destination>,
        log: Arc<ActivityLog>,
    ) -> Self {
        let policy = RetryPolicy::from(&config.retry);
        let pacer = Pacer::new(config.mutation_delay());
        Reconciler {
            config,
            feed,
            destination,
            log,
            policy,
            pacer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &Arc<ActivityLog> {
        &self.log
    }

    /// Destination calendar timezone, then the cached one, then the configured one.
    pub async fn resolve_timezone(&self) -> SyncResult<(Tz, TimezoneSource)> {
        match self.destination.calendar_timezone(&self.config.calendar_id).await {
            Ok(Some(name)) => match name.parse::<Tz>() {
                Ok(tz) => return Ok((tz, TimezoneSource::Destination)),
                Err(_) => tracing::warn!(timezone = %name, "destination reported unknown timezone"),
            },
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "could not read destination timezone"),
        }

        if let Some(tz) = self
            .config
            .detected_timezone
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
        {
            return Ok((tz, TimezoneSource::Cached));
        }

        Ok((self.config.full_sync_tz()?, TimezoneSource::Configured))
    }

    pub fn window_for(&self, kind: PassKind, now: DateTime<Utc>, tz: Tz) -> SyncWindow {
        let today = now.with_timezone(&tz).date_naive();
        match kind {
            PassKind::Quick => SyncWindow::quick(today, tz, self.config.quick_window_days),
            PassKind::Full => SyncWindow::full(
                today,
                tz,
                self.config.full_window_past_days,
                self.config.full_window_future_days,
            ),
        }
    }

    pub async fn run_pass(&self, kind: PassKind) -> SyncResult<PassSummary> {
        self.run_pass_at(kind, Utc::now()).await
    }

    /// Run a pass as if the current time were `now`.
    pub async fn run_pass_at(&self, kind: PassKind, now: DateTime<Utc>) -> SyncResult<PassSummary> {
        let (tz, tz_source) = self.resolve_timezone().await?;
        let window = self.window_for(kind, now, tz);
        self.log.record(
            LogLevel::Info,
            format!("Starting {} sync", kind),
            Some(json!({
                "window": window.to_string(),
                "timezone": tz.name(),
                "timezone_source": format!("{:?}", tz_source),
            })),
        );

        let body = self.feed.fetch().await?;
        self.log
            .success(format!("Fetched feed ({} bytes)", body.len()));

        let feed_events = parse_feed(&body)?;
        let instances = expand_feed(&feed_events, &window);
        self.log.info(format!(
            "Feed has {} components, {} instances from {} series after expansion",
            feed_events.len(),
            instances.len(),
            instances_per_uid(&instances).len()
        ));

        let dest_events =
            read_all(self.destination.as_ref(), &self.config.calendar_id, &window).await?;

        let normalizer = Normalizer::new(self.config.identity_strategy, window, tz);
        let feed_table = normalizer.feed_table(&instances);
        let dest_table = normalizer.destination_table(&dest_events);
        self.log.info(format!(
            "In window: {} feed events, {} destination events ({} duplicates)",
            feed_table.len(),
            dest_table.table.len(),
            dest_table.duplicates.len()
        ));

        let diff = SyncDiff::compute(&feed_table, &dest_table);
        let (to_add, to_update, to_delete) = diff.counts();
        tracing::info!(to_add, to_update, to_delete, unchanged = diff.unchanged, "planned changes");

        let outcome = Applier::new(
            self.destination.as_ref(),
            &self.config.calendar_id,
            &normalizer,
            &self.policy,
            &self.pacer,
            &self.log,
        )
        .apply(&diff)
        .await?;

        let summary = PassSummary {
            kind,
            window,
            timezone: tz.name().to_string(),
            added: outcome.added,
            updated: outcome.updated,
            deleted: outcome.deleted,
            unchanged: outcome.unchanged,
            errors: outcome.errors,
        };

        let level = if summary.errors.is_empty() {
            LogLevel::Success
        } else {
            LogLevel::Warning
        };
        self.log.record(
            level,
            format!(
                "{} sync complete: {} added, {} updated, {} deleted, {} errors",
                kind,
                summary.added,
                summary.updated,
                summary.deleted,
                summary.errors.len()
            ),
            Some(json!({ "unchanged": summary.unchanged })),
        );

        Ok(summary)
    }
}
