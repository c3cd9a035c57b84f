//! Control API for a running service: manual trigger, recent activity, status.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use calmirror_core::{LogEntry, PassKind, Scheduler, SchedulerStatus};
use serde::Deserialize;

const DEFAULT_LOG_LIMIT: usize = 100;

pub fn router(scheduler: Arc<Scheduler>) -> Router {
    Router::new()
        .route("/sync", post(sync))
        .route("/logs", get(logs))
        .route("/status", get(status))
        .with_state(scheduler)
}

#[derive(Deserialize)]
struct SyncParams {
    #[serde(default)]
    quick: bool,
}

/// POST /sync - run a pass now. 409 if one is already running.
async fn sync(State(scheduler): State<Arc<Scheduler>>, Query(params): Query<SyncParams>) -> Response {
    let kind = if params.quick { PassKind::Quick } else { PassKind::Full };
    let report = scheduler.trigger(kind).await;

    let code = if report.skipped_due_to_lock {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    (code, Json(report)).into_response()
}

#[derive(Deserialize)]
struct LogParams {
    limit: Option<usize>,
}

/// GET /logs - the last `limit` entries, oldest first
async fn logs(
    State(scheduler): State<Arc<Scheduler>>,
    Query(params): Query<LogParams>,
) -> Json<Vec<LogEntry>> {
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Json(scheduler.log().recent(limit))
}

async fn status(State(scheduler): State<Arc<Scheduler>>) -> Json<SchedulerStatus> {
    Json(scheduler.status())
}
