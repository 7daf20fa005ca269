//! Archive snapshot HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::archive::{ArchiveService, CreateSnapshotInput};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListSnapshotsQuery {
    pub family: Option<String>,
}

/// List snapshot headers, optionally filtered by family
pub async fn list_snapshots(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListSnapshotsQuery>,
) -> impl IntoResponse {
    let service = ArchiveService::new(state.db.clone());

    match service.list_snapshots(current_user.0.farm_id, query.family).await {
        Ok(snapshots) => (
            StatusCode::OK,
            Json(serde_json::json!({ "snapshots": snapshots })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a snapshot with its payload
pub async fn get_snapshot(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(snapshot_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = ArchiveService::new(state.db.clone());

    match service.get_snapshot(current_user.0.farm_id, snapshot_id).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Create a point-in-time snapshot of one table family
pub async fn create_snapshot(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateSnapshotInput>,
) -> impl IntoResponse {
    let service = ArchiveService::new(state.db.clone());

    match service
        .create_snapshot(current_user.0.farm_id, current_user.0.user_id, input)
        .await
    {
        Ok(snapshot) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Delete a snapshot
pub async fn delete_snapshot(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(snapshot_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = ArchiveService::new(state.db.clone());

    match service.delete_snapshot(current_user.0.farm_id, snapshot_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
