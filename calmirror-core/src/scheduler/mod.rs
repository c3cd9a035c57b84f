//! Dual-cadence scheduler: frequent quick passes, one full pass per day.
//!
//! The periodic loop and manual triggers share one [`SyncGuard`], so only a
//! single pass ever runs at a time. A failed pass is logged and followed by a
//! cool-down; the loop itself only stops on shutdown.

mod guard;

pub use guard::{SyncGuard, SyncPermit};

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;

use crate::activity::ActivityLog;
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{PassKind, PassSummary, Reconciler};

/// Result of one trigger, as reported to callers of the manual interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub kind: Option<PassKind>,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: usize,
    pub skipped_due_to_lock: bool,
    /// Set when the pass aborted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl PassReport {
    fn skipped(kind: PassKind) -> Self {
        PassReport {
            kind: Some(kind),
            skipped_due_to_lock: true,
            ..PassReport::default()
        }
    }

    fn failed(kind: PassKind, err: &SyncError) -> Self {
        PassReport {
            kind: Some(kind),
            errors: 1,
            failure: Some(err.to_string()),
            ..PassReport::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

impl From<&PassSummary> for PassReport {
    fn from(summary: &PassSummary) -> Self {
        PassReport {
            kind: Some(summary.kind),
            added: summary.added,
            updated: summary.updated,
            deleted: summary.deleted,
            errors: summary.errors.len(),
            skipped_due_to_lock: false,
            failure: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub configured: bool,
    pub last_report: Option<PassReport>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_full_sync_day: Option<NaiveDate>,
    pub rejected_attempts: u64,
    /// Timezone of the most recent completed pass
    pub timezone: Option<String>,
}

#[derive(Debug, Default)]
struct SchedulerState {
    last_report: Option<PassReport>,
    last_run_at: Option<DateTime<Utc>>,
    last_full_day: Option<NaiveDate>,
    timezone: Option<String>,
}

/// Whether a scheduled pass at `now` should be a full one: the local hour in
/// `tz` matches `hour` and no full pass has run on this local day yet.
pub fn should_run_full(
    now: DateTime<Utc>,
    tz: Tz,
    hour: u32,
    last_full_day: Option<NaiveDate>,
) -> bool {
    let local = now.with_timezone(&tz);
    local.hour() == hour && last_full_day != Some(local.date_naive())
}

pub struct Scheduler {
    reconciler: Reconciler,
    guard: SyncGuard,
    full_sync_tz: Tz,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(reconciler: Reconciler) -> SyncResult<Self> {
        let full_sync_tz = reconciler.config().full_sync_tz()?;
        Ok(Scheduler {
            reconciler,
            guard: SyncGuard::new(),
            full_sync_tz,
            state: Mutex::new(SchedulerState::default()),
        })
    }

    pub fn log(&self) -> &Arc<ActivityLog> {
        self.reconciler.log()
    }

    /// Manual trigger. Participates in the same guard as the loop; a manual
    /// full pass does not count as the day's scheduled one.
    pub async fn trigger(&self, kind: PassKind) -> PassReport {
        self.execute(kind, Utc::now()).await.0
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        SchedulerStatus {
            running: self.guard.is_running(),
            configured: self.reconciler.config().is_configured(),
            last_report: state.last_report.clone(),
            last_run_at: state.last_run_at,
            last_full_sync_day: state.last_full_day,
            rejected_attempts: self.guard.rejected(),
            timezone: state.timezone.clone(),
        }
    }

    /// Which pass the loop should run at `now`.
    pub fn next_kind(&self, now: DateTime<Utc>) -> PassKind {
        let last_full_day = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_full_day;
        let hour = self.reconciler.config().full_sync_hour;
        if should_run_full(now, self.full_sync_tz, hour, last_full_day) {
            PassKind::Full
        } else {
            PassKind::Quick
        }
    }

    /// A pass started by the loop. A successful full pass marks the day.
    pub async fn run_scheduled(&self, kind: PassKind, now: DateTime<Utc>) -> PassReport {
        let (report, completed) = self.execute(kind, now).await;
        if kind == PassKind::Full && completed {
            let day = now.with_timezone(&self.full_sync_tz).date_naive();
            self.state
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .last_full_day = Some(day);
        }
        report
    }

    /// Returns the report and whether a pass actually completed.
    async fn execute(&self, kind: PassKind, now: DateTime<Utc>) -> (PassReport, bool) {
        let Some(_permit) = self.guard.try_acquire() else {
            self.log().warning(format!(
                "{} sync requested while another sync is running, skipped",
                kind
            ));
            return (PassReport::skipped(kind), false);
        };

        let result = self.reconciler.run_pass_at(kind, now).await;
        let (report, completed, timezone) = match &result {
            Ok(summary) => (PassReport::from(summary), true, Some(summary.timezone.clone())),
            Err(err) => {
                self.report_failure(kind, err);
                (PassReport::failed(kind, err), false, None)
            }
        };

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.last_report = Some(report.clone());
        state.last_run_at = Some(now);
        if timezone.is_some() {
            state.timezone = timezone;
        }
        (report, completed)
    }

    fn report_failure(&self, kind: PassKind, err: &SyncError) {
        let message = match err {
            SyncError::Auth(_) => format!(
                "{} sync failed, destination credentials need attention: {}",
                kind, err
            ),
            _ => format!("{} sync failed: {}", kind, err),
        };
        self.log().error(
            message,
            Some(json!({ "kind": kind, "error": format!("{:?}", err) })),
        );
    }

    /// The periodic loop. Runs until `shutdown` resolves; an in-flight pass
    /// is abandoned at that point.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let config = self.reconciler.config();
        let interval = config.quick_interval();
        let cooldown = config.cooldown();
        tracing::info!(
            interval_secs = interval.as_secs(),
            full_sync_hour = config.full_sync_hour,
            full_sync_timezone = %self.full_sync_tz,
            "scheduler started"
        );

        loop {
            let delay = if !config.is_configured() {
                self.log()
                    .warning("No feed URL configured, waiting for configuration");
                interval
            } else {
                let now = Utc::now();
                let kind = self.next_kind(now);
                let report = tokio::select! {
                    _ = &mut shutdown => break,
                    report = self.run_scheduled(kind, now) => report,
                };
                pause_after(&report, interval, cooldown)
            };

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("scheduler stopped");
    }
}

fn pause_after(report: &PassReport, interval: Duration, cooldown: Duration) -> Duration {
    if report.is_failure() {
        cooldown
    } else {
        interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::LogLevel;
    use crate::config::Config;
    use crate::feed::FeedSource;
    use crate::testing::{
        FailingFeed, GatedFeed, MemoryDestination, StaticFeed, ics_calendar, ics_event,
    };
    use chrono::TimeZone;

    fn configured() -> Config {
        Config {
            feed_url: "https://example.com/cal.ics".to_string(),
            mutation_delay_ms: 0,
            ..Config::default()
        }
    }

    fn scheduler(config: Config, feed: Arc<dyn FeedSource>, dest: Arc<MemoryDestination>) -> Scheduler {
        let reconciler = Reconciler::new(config, feed, dest, Arc::new(ActivityLog::default()));
        Scheduler::new(reconciler).unwrap()
    }

    fn one_event_feed() -> String {
        let start = Utc::now() + chrono::Duration::hours(2);
        ics_calendar(&[ics_event(
            "e1",
            "Standup",
            start,
            start + chrono::Duration::hours(1),
        )])
    }

    #[test]
    fn test_full_pass_runs_once_in_configured_hour() {
        let tz = chrono_tz::Europe::Berlin;
        // 03:30 in Berlin
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 2, 30, 0).unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();

        assert!(should_run_full(now, tz, 3, None));
        assert!(should_run_full(now, tz, 3, today.pred_opt()));
        assert!(!should_run_full(now, tz, 3, Some(today)));
        assert!(!should_run_full(now, tz, 4, None));
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_skipped() {
        let feed = Arc::new(GatedFeed::new(one_event_feed()));
        let dest = Arc::new(MemoryDestination::new());
        let scheduler = Arc::new(scheduler(configured(), feed.clone(), dest.clone()));

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.trigger(PassKind::Quick).await })
        };
        feed.entered.notified().await;

        let second = scheduler.trigger(PassKind::Quick).await;
        assert!(second.skipped_due_to_lock);
        assert_eq!((second.added, second.updated, second.deleted, second.errors), (0, 0, 0, 0));
        assert!(scheduler.status().running);

        feed.release.notify_one();
        let first = first.await.unwrap();

        assert!(!first.skipped_due_to_lock);
        assert_eq!(first.added, 1);
        assert_eq!(feed.inner.fetches(), 1);
        assert_eq!(dest.calls().inserts, 1);
        assert_eq!(scheduler.status().rejected_attempts, 1);
        assert!(!scheduler.status().running);
    }

    #[tokio::test]
    async fn test_failed_pass_releases_guard_and_reports() {
        let dest = Arc::new(MemoryDestination::new());
        let scheduler = scheduler(configured(), Arc::new(FailingFeed), dest);

        let report = scheduler.trigger(PassKind::Quick).await;
        assert!(report.is_failure());
        assert!(!report.skipped_due_to_lock);

        let again = scheduler.trigger(PassKind::Quick).await;
        assert!(!again.skipped_due_to_lock, "Guard must be free after a failure");
        assert!(!scheduler.status().running);
    }

    #[tokio::test]
    async fn test_scheduled_full_pass_marks_the_day() {
        let config = Config {
            full_sync_hour: 9,
            ..configured()
        };
        let feed = Arc::new(StaticFeed::new(ics_calendar(&[])));
        let scheduler = scheduler(config, feed, Arc::new(MemoryDestination::new()));
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 9, 15, 0).unwrap();

        assert_eq!(scheduler.next_kind(now), PassKind::Full);
        scheduler.run_scheduled(PassKind::Full, now).await;

        assert_eq!(
            scheduler.status().last_full_sync_day,
            NaiveDate::from_ymd_opt(2025, 1, 10)
        );
        assert_eq!(scheduler.next_kind(now), PassKind::Quick);
    }

    #[tokio::test]
    async fn test_manual_full_pass_does_not_mark_the_day() {
        let feed = Arc::new(StaticFeed::new(ics_calendar(&[])));
        let scheduler = scheduler(configured(), feed, Arc::new(MemoryDestination::new()));

        let report = scheduler.trigger(PassKind::Full).await;

        assert_eq!(report.kind, Some(PassKind::Full));
        assert_eq!(scheduler.status().last_full_sync_day, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_repeats_at_the_quick_interval() {
        let feed = Arc::new(StaticFeed::new(ics_calendar(&[])));
        let scheduler = scheduler(configured(), feed.clone(), Arc::new(MemoryDestination::new()));

        scheduler
            .run(tokio::time::sleep(Duration::from_secs(1000)))
            .await;

        // t = 0 and t = 900
        assert_eq!(feed.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_cools_down_after_failure() {
        let scheduler = scheduler(configured(), Arc::new(FailingFeed), Arc::new(MemoryDestination::new()));

        scheduler
            .run(tokio::time::sleep(Duration::from_secs(130)))
            .await;

        // t = 0, 60 and 120
        let failures = scheduler
            .log()
            .recent(100)
            .iter()
            .filter(|e| e.level == LogLevel::Error)
            .count();
        assert_eq!(failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_idles_without_feed_url() {
        let feed = Arc::new(StaticFeed::new(ics_calendar(&[])));
        let scheduler = scheduler(
            Config::default(),
            feed.clone(),
            Arc::new(MemoryDestination::new()),
        );

        scheduler
            .run(tokio::time::sleep(Duration::from_secs(1000)))
            .await;

        assert_eq!(feed.fetches(), 0);
        assert!(!scheduler.status().configured);
    }
}
