//! HTTP request handlers
//!
//! Thin wrappers: each one resolves its input, forwards to the
//! [`PlayoutHandle`](crate::playback::PlayoutHandle) and maps the result.

use crate::api::server::AppContext;
use crate::error::Error;
use crate::state::PlayoutSnapshot;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use playout_common::Track;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    track_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PlayNowRequest {
    track_id: String,
    #[serde(default)]
    requeue: bool,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    from: usize,
    to: usize,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    volume: u8, // 0-100 user-facing scale
}

#[derive(Debug, Serialize)]
pub struct VolumeResponse {
    volume: u8,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    position_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct SeekResponse {
    position_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    queue: Vec<Track>,
}

#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    removed: Track,
}

type ApiError = (StatusCode, Json<StatusResponse>);
type ApiResult<T> = Result<T, ApiError>;

/// Status code for an engine error
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::QueueOperationOutOfRange { .. } | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::ResourceUnavailable(_) | Error::PlaybackBlocked(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Error::ChannelClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: Error) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!("Request failed: {}", err);
    }
    (
        status,
        Json(StatusResponse {
            status: format!("error: {}", err),
        }),
    )
}

fn ok() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

/// Look a track id up through the resolver; unknown ids are 404
async fn lookup_track(ctx: &AppContext, track_id: &str) -> ApiResult<Track> {
    ctx.resolver.resolve_metadata(track_id).await.map_err(|e| match e {
        Error::NotFound(_) | Error::ResourceUnavailable(_) => api_error(Error::NotFound(format!(
            "track '{}'",
            track_id
        ))),
        other => api_error(other),
    })
}

// ============================================================================
// Health and status
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "playout".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("PLAYOUT_GIT_HASH").to_string(),
        build_timestamp: env!("PLAYOUT_BUILD_TIMESTAMP").to_string(),
        build_profile: env!("PLAYOUT_BUILD_PROFILE").to_string(),
    })
}

/// GET /playout/status - last published snapshot
pub async fn get_status(State(ctx): State<AppContext>) -> Json<PlayoutSnapshot> {
    Json(ctx.state.snapshot().await)
}

/// GET /playout/queue
pub async fn get_queue(State(ctx): State<AppContext>) -> Json<QueueResponse> {
    Json(QueueResponse {
        queue: ctx.state.queue_snapshot().await,
    })
}

// ============================================================================
// Transport intents
// ============================================================================

/// POST /playout/play
pub async fn play(
    State(ctx): State<AppContext>,
    Json(req): Json<TrackRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let track = lookup_track(&ctx, &req.track_id).await?;
    info!("Play request: {}", track.id);
    ctx.handle.play(track).await.map_err(api_error)?;
    Ok(ok())
}

/// POST /playout/play-now
pub async fn play_now(
    State(ctx): State<AppContext>,
    Json(req): Json<PlayNowRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let track = lookup_track(&ctx, &req.track_id).await?;
    info!("Play-now request: {} (requeue: {})", track.id, req.requeue);
    ctx.handle
        .play_now(track, req.requeue)
        .await
        .map_err(api_error)?;
    Ok(ok())
}

/// POST /playout/skip-next
pub async fn skip_next(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.handle.skip_next().await.map_err(api_error)?;
    Ok(ok())
}

/// POST /playout/skip-previous
pub async fn skip_previous(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.handle.skip_previous().await.map_err(api_error)?;
    Ok(ok())
}

/// POST /playout/pause
pub async fn pause(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.handle.pause().await.map_err(api_error)?;
    Ok(ok())
}

/// POST /playout/resume
pub async fn resume(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.handle.resume().await.map_err(api_error)?;
    Ok(ok())
}

/// POST /playout/volume
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> ApiResult<Json<VolumeResponse>> {
    if req.volume > 100 {
        return Err(api_error(Error::BadRequest(format!(
            "volume must be 0-100, got {}",
            req.volume
        ))));
    }
    ctx.handle.set_volume(req.volume).await.map_err(api_error)?;
    Ok(Json(VolumeResponse { volume: req.volume }))
}

/// POST /playout/seek
pub async fn seek(
    State(ctx): State<AppContext>,
    Json(req): Json<SeekRequest>,
) -> ApiResult<Json<SeekResponse>> {
    if !req.position_seconds.is_finite() || req.position_seconds < 0.0 {
        return Err(api_error(Error::BadRequest(
            "position_seconds must be a non-negative number".to_string(),
        )));
    }
    let position_seconds = ctx.handle.seek(req.position_seconds).await.map_err(api_error)?;
    Ok(Json(SeekResponse { position_seconds }))
}

// ============================================================================
// Queue
// ============================================================================

/// POST /playout/queue/enqueue
pub async fn enqueue(
    State(ctx): State<AppContext>,
    Json(req): Json<TrackRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let track = lookup_track(&ctx, &req.track_id).await?;
    ctx.handle.enqueue(track).await.map_err(api_error)?;
    Ok(ok())
}

/// POST /playout/queue/next
pub async fn queue_next(
    State(ctx): State<AppContext>,
    Json(req): Json<TrackRequest>,
) -> ApiResult<Json<StatusResponse>> {
    let track = lookup_track(&ctx, &req.track_id).await?;
    ctx.handle.queue_next(track).await.map_err(api_error)?;
    Ok(ok())
}

/// DELETE /playout/queue/:index
pub async fn remove_from_queue(
    State(ctx): State<AppContext>,
    Path(index): Path<usize>,
) -> ApiResult<Json<RemovedResponse>> {
    let removed = ctx.handle.remove_at(index).await.map_err(api_error)?;
    info!("Removed queue entry {} ('{}')", index, removed.id);
    Ok(Json(RemovedResponse { removed }))
}

/// POST /playout/queue/move
pub async fn move_queue_entry(
    State(ctx): State<AppContext>,
    Json(req): Json<MoveRequest>,
) -> ApiResult<Json<StatusResponse>> {
    ctx.handle
        .move_entry(req.from, req.to)
        .await
        .map_err(api_error)?;
    Ok(ok())
}

/// POST /playout/queue/clear
pub async fn clear_queue(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    ctx.handle.clear_queue().await.map_err(api_error)?;
    Ok(ok())
}
