//! Web API endpoints.
//!
//! Every response is a JSON object with a `success` flag; failures carry an
//! `error` message.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::database::{CheckSettings, LeaseStore, NewFeed};
use crate::scoring::{DuplicateRanker, ScoringEngine};
use crate::web::state::WebState;

/// Number of history records returned with a single feed.
const FEED_HISTORY_LIMIT: u32 = 20;

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn error_response(e: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({
        "success": false,
        "error": e.to_string()
    }))
}

// ============================================================================
// Feed endpoints
// ============================================================================

/// Get all feeds.
pub async fn get_feeds(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let db = web_state.database.lock().await;

    match db.get_all_feeds() {
        Ok(feeds) => Json(json!({
            "success": true,
            "feeds": feeds
        })),
        Err(e) => error_response(e),
    }
}

/// Create a feed (playlist importer).
pub async fn create_feed(
    State(web_state): State<Arc<WebState>>,
    payload: Result<Json<NewFeed>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    if req.url.trim().is_empty() || req.channel_key.trim().is_empty() {
        return error_response("url and channel_key are required");
    }

    let mut db = web_state.database.lock().await;
    match db.insert_feed(&req, now()) {
        Ok(id) => Json(json!({
            "success": true,
            "id": id
        })),
        Err(e) => error_response(e),
    }
}

/// Get a feed with its lease state and recent checks.
pub async fn get_feed(
    State(web_state): State<Arc<WebState>>,
    id: Result<Path<i64>, PathRejection>,
) -> impl IntoResponse {
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    let db = web_state.database.lock().await;

    let feed = match db.get_feed(id) {
        Ok(Some(feed)) => feed,
        Ok(None) => return error_response("Feed not found"),
        Err(e) => return error_response(e),
    };
    let lease = db.get_check_lease(id);
    let history = db.get_check_history(id, FEED_HISTORY_LIMIT);

    match (lease, history) {
        (Ok(lease), Ok(history)) => Json(json!({
            "success": true,
            "feed": feed,
            "lease": lease,
            "history": history
        })),
        (Err(e), _) | (_, Err(e)) => error_response(e),
    }
}

/// Delete a feed (playlist importer).
pub async fn delete_feed(
    State(web_state): State<Arc<WebState>>,
    id: Result<Path<i64>, PathRejection>,
) -> impl IntoResponse {
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    let db = web_state.database.lock().await;

    match db.delete_feed(id) {
        Ok(true) => Json(json!({
            "success": true,
            "message": "Feed deleted successfully"
        })),
        Ok(false) => error_response("Feed not found"),
        Err(e) => error_response(e),
    }
}

/// Check a feed now.
pub async fn check_feed(
    State(web_state): State<Arc<WebState>>,
    id: Result<Path<i64>, PathRejection>,
) -> impl IntoResponse {
    let Path(id) = match id {
        Ok(id) => id,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    match web_state.scheduler.run_manual_check(id).await {
        Ok(result) => Json(json!({
            "success": true,
            "result": result
        })),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Duplicate ranking endpoints
// ============================================================================

/// Channels served by more than one feed.
pub async fn get_duplicate_channels(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let db = web_state.database.lock().await;

    match DuplicateRanker::channel_keys(&db) {
        Ok(groups) => Json(json!({
            "success": true,
            "channels": groups
        })),
        Err(e) => error_response(e),
    }
}

/// Feeds of a channel, best first.
pub async fn get_channel_feeds(
    State(web_state): State<Arc<WebState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let db = web_state.database.lock().await;

    match DuplicateRanker::rank(&db, &key) {
        Ok(feeds) => Json(json!({
            "success": true,
            "channel_key": key,
            "feeds": feeds
        })),
        Err(e) => error_response(e),
    }
}

/// Best feed of a channel.
pub async fn get_channel_best(
    State(web_state): State<Arc<WebState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let db = web_state.database.lock().await;

    match DuplicateRanker::best(&db, &key) {
        Ok(Some(best)) => Json(json!({
            "success": true,
            "feed": best
        })),
        Ok(None) => error_response("No feeds for channel"),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Preview lock endpoints
// ============================================================================

/// Preview lock request.
#[derive(Debug, Deserialize)]
pub struct PreviewLockRequest {
    pub owner: String,
    pub feed_id: i64,
}

/// Request identifying the preview owner.
#[derive(Debug, Deserialize)]
pub struct OwnerRequest {
    pub owner: String,
}

/// Take the preview lock, preempting any holder.
pub async fn acquire_preview_lock(
    State(web_state): State<Arc<WebState>>,
    payload: Result<Json<PreviewLockRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    match web_state.preview.acquire(&req.owner, req.feed_id).await {
        Ok(lock) => Json(json!({
            "success": true,
            "lock": lock
        })),
        Err(e) => error_response(e),
    }
}

/// Keep the preview lock alive.
pub async fn preview_heartbeat(
    State(web_state): State<Arc<WebState>>,
    payload: Result<Json<OwnerRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    match web_state.preview.heartbeat(&req.owner).await {
        Ok(()) => Json(json!({ "success": true })),
        Err(e) => error_response(e),
    }
}

/// Give the preview lock up.
pub async fn release_preview_lock(
    State(web_state): State<Arc<WebState>>,
    payload: Result<Json<OwnerRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    match web_state.preview.release(&req.owner).await {
        Ok(released) => Json(json!({
            "success": true,
            "released": released
        })),
        Err(e) => error_response(e),
    }
}

/// Player metadata and proxy URL for the locked feed.
pub async fn get_stream_url(
    State(web_state): State<Arc<WebState>>,
    feed_id: Result<Path<i64>, PathRejection>,
    query: Result<Query<OwnerRequest>, QueryRejection>,
) -> impl IntoResponse {
    let Path(feed_id) = match feed_id {
        Ok(feed_id) => feed_id,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    match web_state.preview.stream_info(&query.owner, feed_id).await {
        Ok(stream) => Json(json!({
            "success": true,
            "stream": stream
        })),
        Err(e) => error_response(e),
    }
}

/// Current preview lock holder, if any.
pub async fn get_preview_status(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    match web_state.preview.is_active().await {
        Ok(lock) => Json(json!({
            "success": true,
            "locked": lock.is_some(),
            "lock": lock
        })),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Check settings endpoints
// ============================================================================

/// Get check settings.
pub async fn get_check_settings(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    let db = web_state.database.lock().await;

    match db.get_check_settings() {
        Ok(settings) => Json(json!({
            "success": true,
            "settings": settings
        })),
        Err(e) => error_response(e),
    }
}

/// Update check settings.
pub async fn update_check_settings(
    State(web_state): State<Arc<WebState>>,
    payload: Result<Json<CheckSettings>, JsonRejection>,
) -> impl IntoResponse {
    let Json(settings) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(rejection.body_text()),
    };
    let db = web_state.database.lock().await;

    let previous = match db.get_check_settings() {
        Ok(previous) => previous,
        Err(e) => return error_response(e),
    };
    if let Err(e) = db.update_check_settings(&settings) {
        return error_response(e);
    }
    log::info!("Check settings updated: {:?}", settings);

    if previous.reliability_window_hours != settings.reliability_window_hours {
        if let Err(e) = ScoringEngine::rescore_all(&db, settings.reliability_window_hours, now()) {
            log::warn!("Failed to rescore feeds after window change: {}", e);
        }
    }

    Json(json!({
        "success": true,
        "settings": settings
    }))
}

// ============================================================================
// Scheduler endpoints
// ============================================================================

/// Scheduler state and probes in flight.
pub async fn get_scheduler_status(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "state": web_state.scheduler.state().await,
        "active_checks": web_state.scheduler.active_check_count()
    }))
}

/// Run a sweep now.
pub async fn trigger_sweep(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    match web_state.scheduler.trigger_sweep().await {
        Ok(report) => Json(json!({
            "success": true,
            "report": report
        })),
        Err(e) => error_response(e),
    }
}

/// Pause periodic sweeps in this process.
pub async fn pause_scheduler(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    web_state.scheduler.pause().await;
    Json(json!({
        "success": true,
        "state": web_state.scheduler.state().await
    }))
}

/// Resume periodic sweeps in this process.
pub async fn resume_scheduler(State(web_state): State<Arc<WebState>>) -> impl IntoResponse {
    web_state.scheduler.resume().await;
    Json(json!({
        "success": true,
        "state": web_state.scheduler.state().await
    }))
}
