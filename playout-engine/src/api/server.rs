//! HTTP server setup and routing

use crate::collaborators::TrackResolver;
use crate::error::{Error, Result};
use crate::playback::PlayoutHandle;
use crate::state::SharedState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub handle: PlayoutHandle,
    pub state: Arc<SharedState>,
    /// Resolves track ids in request bodies
    pub resolver: Arc<dyn TrackResolver>,
}

/// Build the router with every control route and the SSE stream
pub fn build_router(ctx: AppContext) -> Router {
    use super::{handlers, sse};

    Router::new()
        .route("/health", get(handlers::health))
        // Observation
        .route("/playout/status", get(handlers::get_status))
        .route("/playout/queue", get(handlers::get_queue))
        // Transport
        .route("/playout/play", post(handlers::play))
        .route("/playout/play-now", post(handlers::play_now))
        .route("/playout/skip-next", post(handlers::skip_next))
        .route("/playout/skip-previous", post(handlers::skip_previous))
        .route("/playout/pause", post(handlers::pause))
        .route("/playout/resume", post(handlers::resume))
        .route("/playout/volume", post(handlers::set_volume))
        .route("/playout/seek", post(handlers::seek))
        // Queue
        .route("/playout/queue/enqueue", post(handlers::enqueue))
        .route("/playout/queue/next", post(handlers::queue_next))
        .route("/playout/queue/move", post(handlers::move_queue_entry))
        .route("/playout/queue/clear", post(handlers::clear_queue))
        .route("/playout/queue/:index", delete(handlers::remove_from_queue))
        // SSE event stream
        .route("/events", get(sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves
pub async fn run(
    addr: SocketAddr,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(ctx);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
