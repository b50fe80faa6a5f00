use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{PlaybackEventType, SessionIdentity, SyncSnapshot, SyncStatus};
use crate::sync::players::HeadlessPlayer;
use crate::sync::{PlayerAdapter, SyncCoordinator};

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub user_id: Uuid,
    pub is_host: bool,
    /// Content length in seconds; zero means unknown
    #[serde(default)]
    pub duration_secs: f64,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub stream_id: Uuid,
    pub user_id: Uuid,
    pub is_host: bool,
    pub sync_status: SyncStatus,
}

/// Handler for joining a stream's watch party
pub async fn join_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    Json(body): Json<JoinRequest>,
) -> AppResult<(StatusCode, Json<JoinResponse>)> {
    let key = (stream_id, body.user_id);

    let player = Arc::new(HeadlessPlayer::new(body.duration_secs.max(0.0)));
    let adapter = Arc::new(PlayerAdapter::with_player(player));
    let identity = SessionIdentity {
        stream_id,
        user_id: body.user_id,
        is_host: body.is_host,
    };

    let coordinator = Arc::new(
        SyncCoordinator::connect(
            identity,
            state.transport.clone(),
            state.state_store.clone(),
            adapter,
            state.tuning,
        )
        .await?,
    );

    {
        let mut sessions = state.sessions.write().await;
        if sessions.contains_key(&key) {
            coordinator.shutdown().await;
            return Err(AppError::Conflict(format!(
                "User {} already joined stream {}",
                body.user_id, stream_id
            )));
        }
        sessions.insert(key, coordinator.clone());
    }

    let sync_status = coordinator.snapshot().sync_status;
    Ok((
        StatusCode::CREATED,
        Json(JoinResponse {
            stream_id,
            user_id: body.user_id,
            is_host: body.is_host,
            sync_status,
        }),
    ))
}

/// Handler for leaving a stream's watch party
pub async fn leave_stream(
    State(state): State<AppState>,
    Path((stream_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let coordinator = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&(stream_id, user_id))
    };

    match coordinator {
        Some(coordinator) => {
            coordinator.shutdown().await;
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(AppError::NotFound(format!(
            "No session for user {} in stream {}",
            user_id, stream_id
        ))),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub user_id: Uuid,
    pub event_type: PlaybackEventType,
    pub current_time: f64,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    /// False when the sender is not the host or the session has ended
    pub accepted: bool,
}

/// Handler for publishing a host playback event
pub async fn publish_event(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    Json(body): Json<EventRequest>,
) -> AppResult<Json<EventResponse>> {
    if !body.current_time.is_finite() || body.current_time < 0.0 {
        return Err(AppError::InvalidInput(
            "current_time must be a non-negative number of seconds".to_string(),
        ));
    }

    let coordinator = find_session(&state, stream_id, body.user_id).await?;
    let accepted = coordinator
        .broadcast_playback_event(body.event_type, body.current_time, body.metadata)
        .await?;

    Ok(Json(EventResponse { accepted }))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub user_id: Uuid,
    pub is_host: bool,
    pub participant_count: usize,
    #[serde(flatten)]
    pub snapshot: SyncSnapshot,
}

/// Handler for a participant's view of the sync session
pub async fn stream_status(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    Query(params): Query<StatusQuery>,
) -> AppResult<Json<StatusResponse>> {
    let coordinator = find_session(&state, stream_id, params.user_id).await?;
    let identity = coordinator.identity();

    Ok(Json(StatusResponse {
        user_id: identity.user_id,
        is_host: identity.is_host,
        participant_count: state.participant_count(stream_id).await,
        snapshot: coordinator.snapshot(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Correct the local player only if it drifted past the tolerance
    Request,
    /// Apply the host state unconditionally and clear any sync error
    Force,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub user_id: Uuid,
    pub mode: SyncMode,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub applied: bool,
}

/// Handler for manual resync against the stored host state
pub async fn resync(
    State(state): State<AppState>,
    Path(stream_id): Path<Uuid>,
    Json(body): Json<SyncRequest>,
) -> AppResult<Json<SyncResponse>> {
    let coordinator = find_session(&state, stream_id, body.user_id).await?;

    let applied = match body.mode {
        SyncMode::Request => coordinator.request_sync().await?,
        SyncMode::Force => coordinator.force_sync().await?,
    };

    Ok(Json(SyncResponse { applied }))
}

async fn find_session(
    state: &AppState,
    stream_id: Uuid,
    user_id: Uuid,
) -> AppResult<Arc<SyncCoordinator>> {
    state
        .sessions
        .read()
        .await
        .get(&(stream_id, user_id))
        .cloned()
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No session for user {} in stream {}",
                user_id, stream_id
            ))
        })
}
