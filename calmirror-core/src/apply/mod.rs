//! Applying a [`SyncDiff`] to the destination.
//!
//! Mutations run one at a time, paced and retried per [`RetryPolicy`].
//! A failing event is recorded and skipped. Lost authorization stops the
//! pass, since every later mutation would fail the same way.

mod retry;

pub use retry::{Pacer, RetryPolicy};

use chrono::Duration;
use serde::Serialize;
use serde_json::json;

use crate::activity::{ActivityLog, LogLevel};
use crate::destination::{Destination, read_all};
use crate::diff::{DiffKind, EventDiff, SyncDiff};
use crate::error::{SyncError, SyncResult};
use crate::normalize::{CanonicalEvent, Normalizer, event_id_for};
use crate::window::SyncWindow;

/// A mutation that could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventError {
    pub kind: DiffKind,
    pub identity_key: String,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub errors: Vec<EventError>,
}

/// What a single mutation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Added,
    Updated,
    Deleted,
    /// Conflict resolved to an identical existing event
    Unchanged,
}

pub struct Applier<'a> {
    destination: &'a dyn Destination,
    calendar_id: &'a str,
    normalizer: &'a Normalizer,
    policy: &'a RetryPolicy,
    pacer: &'a Pacer,
    log: &'a ActivityLog,
}

impl<'a> Applier<'a> {
    pub fn new(
        destination: &'a dyn Destination,
        calendar_id: &'a str,
        normalizer: &'a Normalizer,
        policy: &'a RetryPolicy,
        pacer: &'a Pacer,
        log: &'a ActivityLog,
    ) -> Self {
        Applier {
            destination,
            calendar_id,
            normalizer,
            policy,
            pacer,
            log,
        }
    }

    /// Apply deletes, then updates, then creates.
    pub async fn apply(&self, diff: &SyncDiff) -> SyncResult<ApplyOutcome> {
        let mut outcome = ApplyOutcome {
            unchanged: diff.unchanged,
            ..ApplyOutcome::default()
        };

        if diff.unchanged > 0 {
            self.log.record(
                LogLevel::Skip,
                format!("{} events already up to date", diff.unchanged),
                None,
            );
        }

        for event_diff in diff.in_apply_order() {
            match self.apply_one(event_diff).await {
                Ok(Applied::Added) => outcome.added += 1,
                Ok(Applied::Updated) => outcome.updated += 1,
                Ok(Applied::Deleted) => outcome.deleted += 1,
                Ok(Applied::Unchanged) => outcome.unchanged += 1,
                Err(err) => {
                    let error = event_error(event_diff, &err);
                    self.log.error(
                        format!(
                            "Failed to apply {} for {}: {}",
                            event_diff.kind, error.title, err
                        ),
                        Some(json!({
                            "key": error.identity_key,
                            "kind": event_diff.kind,
                            "error": err.to_string(),
                        })),
                    );
                    if matches!(err, SyncError::Auth(_)) {
                        return Err(err);
                    }
                    outcome.errors.push(error);
                }
            }
        }

        Ok(outcome)
    }

    async fn apply_one(&self, diff: &EventDiff) -> SyncResult<Applied> {
        match (diff.kind, &diff.old, &diff.new) {
            (DiffKind::Delete, Some(old), _) => self.delete(old).await,
            (DiffKind::Update, Some(old), Some(new)) => self.update(old, new, diff).await,
            (DiffKind::Create, _, Some(new)) => self.create(new).await,
            _ => Err(SyncError::Unexpected(format!("malformed diff: {}", diff))),
        }
    }

    async fn delete(&self, old: &CanonicalEvent) -> SyncResult<Applied> {
        let event_id = destination_id(old)?;
        let result = self
            .policy
            .run(self.pacer, "delete_event", || {
                self.destination.delete_event(self.calendar_id, event_id)
            })
            .await;

        match result {
            Ok(()) => {
                self.record(DiffKind::Delete, old, None);
                Ok(Applied::Deleted)
            }
            Err(SyncError::NotFound(_)) => {
                tracing::debug!(event_id, "already gone");
                self.record(DiffKind::Delete, old, Some("already gone"));
                Ok(Applied::Deleted)
            }
            Err(err) => Err(err),
        }
    }

    async fn update(
        &self,
        old: &CanonicalEvent,
        new: &CanonicalEvent,
        diff: &EventDiff,
    ) -> SyncResult<Applied> {
        let event_id = destination_id(old)?;
        let body = new.to_body();
        let result = self
            .policy
            .run(self.pacer, "update_event", || {
                self.destination.update_event(self.calendar_id, event_id, &body)
            })
            .await;

        match result {
            Ok(_) => {
                let fields = diff.changed_fields().join(", ");
                self.record(DiffKind::Update, new, Some(fields.as_str()));
                Ok(Applied::Updated)
            }
            Err(SyncError::NotFound(_)) => {
                tracing::info!(event_id, "update target vanished, inserting instead");
                self.create(new).await
            }
            Err(err) => Err(err),
        }
    }

    async fn create(&self, new: &CanonicalEvent) -> SyncResult<Applied> {
        let body = new.to_body();
        let result = self
            .policy
            .run(self.pacer, "insert_event", || {
                self.destination.insert_event(self.calendar_id, &body)
            })
            .await;

        match result {
            Ok(_) => {
                self.record(DiffKind::Create, new, None);
                Ok(Applied::Added)
            }
            Err(SyncError::Conflict(reason)) => self.resolve_conflict(new, &reason).await,
            Err(err) => Err(err),
        }
    }

    /// The destination already holds this event: bind to it instead of duplicating.
    async fn resolve_conflict(&self, new: &CanonicalEvent, reason: &str) -> SyncResult<Applied> {
        tracing::info!(key = %new.identity_key, reason, "insert conflicted, looking up existing event");

        let existing = match self.find_existing(new).await? {
            Some(existing) => existing,
            None => {
                return Err(SyncError::Conflict(format!(
                    "{} (no matching destination event found)",
                    reason
                )));
            }
        };

        let event_id = destination_id(&existing)?;
        if !existing.is_cancelled() && existing.same_content(new) {
            self.log.record(
                LogLevel::Skip,
                format!("Already present: {}", new),
                Some(json!({ "key": new.identity_key, "event_id": event_id })),
            );
            return Ok(Applied::Unchanged);
        }

        let body = new.to_body();
        self.policy
            .run(self.pacer, "update_event", || {
                self.destination.update_event(self.calendar_id, event_id, &body)
            })
            .await?;
        self.record(DiffKind::Update, new, Some("rebound after conflict"));
        Ok(Applied::Updated)
    }

    /// Look up by deterministic id, then by a time-range search on the identity key.
    async fn find_existing(&self, new: &CanonicalEvent) -> SyncResult<Option<CanonicalEvent>> {
        let event_id = event_id_for(&new.identity_key);
        let by_id = self
            .policy
            .run(self.pacer, "get_event", || {
                self.destination.get_event(self.calendar_id, &event_id)
            })
            .await;

        match by_id {
            Ok(event) => {
                if let Some(canonical) = self.normalizer.destination_event(&event) {
                    return Ok(Some(canonical));
                }
            }
            Err(SyncError::NotFound(_)) => {}
            Err(err) => {
                tracing::warn!(error = %err, "lookup by id failed, searching by time range");
            }
        }

        let window = SyncWindow::new(
            new.start.as_instant() - Duration::days(1),
            new.end.as_instant() + Duration::days(1),
        );
        self.pacer.wait().await;
        let candidates = read_all(self.destination, self.calendar_id, &window).await?;

        let mut matches: Vec<CanonicalEvent> = candidates
            .iter()
            .filter_map(|e| self.normalizer.destination_event(e))
            .filter(|c| c.identity_key == new.identity_key)
            .collect();
        matches.sort_by_key(|c| c.is_cancelled());
        Ok(matches.into_iter().next())
    }

    fn record(&self, kind: DiffKind, event: &CanonicalEvent, note: Option<&str>) {
        let message = match note {
            Some(note) if !note.is_empty() => format!("{}: {} ({})", kind.verb(), event, note),
            _ => format!("{}: {}", kind.verb(), event),
        };
        self.log.record(
            kind.log_level(),
            message,
            Some(json!({
                "key": event.identity_key,
                "start": event.start.to_string(),
            })),
        );
    }
}

fn destination_id(event: &CanonicalEvent) -> SyncResult<&str> {
    event.destination_id().ok_or_else(|| {
        SyncError::Unexpected(format!("{} has no destination id", event.identity_key))
    })
}

fn event_error(diff: &EventDiff, err: &SyncError) -> EventError {
    EventError {
        kind: diff.kind,
        identity_key: diff.identity_key().to_string(),
        title: diff.event().map(|e| e.title.clone()).unwrap_or_default(),
        message: err.to_string(),
    }
}
