//! JSON API server.

pub mod api;
pub mod state;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::WebState;

/// Build the API router.
pub fn router(web_state: Arc<WebState>) -> Router {
    Router::new()
        // Feed API (playlist importer)
        .route("/api/feeds", get(api::get_feeds))
        .route("/api/feeds", post(api::create_feed))
        .route("/api/feed/:id", get(api::get_feed))
        .route("/api/feed/:id", delete(api::delete_feed))
        .route("/api/feed/:id/check", post(api::check_feed))
        // Duplicate ranking API
        .route("/api/channels/duplicates", get(api::get_duplicate_channels))
        .route("/api/channel/:key/feeds", get(api::get_channel_feeds))
        .route("/api/channel/:key/best", get(api::get_channel_best))
        // Preview lock API
        .route("/api/preview/lock", post(api::acquire_preview_lock))
        .route("/api/preview/heartbeat", post(api::preview_heartbeat))
        .route("/api/preview/release", post(api::release_preview_lock))
        .route("/api/preview/stream/:feed_id", get(api::get_stream_url))
        .route("/api/preview/status", get(api::get_preview_status))
        // Check settings API
        .route("/api/check-settings", get(api::get_check_settings))
        .route("/api/check-settings", post(api::update_check_settings))
        // Scheduler API
        .route("/api/scheduler/status", get(api::get_scheduler_status))
        .route("/api/scheduler/trigger", post(api::trigger_sweep))
        .route("/api/scheduler/pause", post(api::pause_scheduler))
        .route("/api/scheduler/resume", post(api::resume_scheduler))
        .with_state(web_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Start the API server.
pub async fn start_web_server(
    listen_addr: SocketAddr,
    web_state: Arc<WebState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(web_state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    log::info!("API listening on http://{}", listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
