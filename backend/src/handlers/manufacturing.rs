//! Manufacturing HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::manufacturing::{
    BulkDeleteInput, CreateRunInput, ManufacturingService, UpdateRunInput,
};
use crate::AppState;

/// List manufacturing runs
pub async fn list_runs(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> impl IntoResponse {
    let service = ManufacturingService::new(state.db.clone());

    match service.list_runs(current_user.0.farm_id).await {
        Ok(runs) => (StatusCode::OK, Json(serde_json::json!({ "runs": runs }))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a run with its stored consumption lines
pub async fn get_run(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(run_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = ManufacturingService::new(state.db.clone());

    match service.get_run(current_user.0.farm_id, run_id).await {
        Ok(run) => (StatusCode::OK, Json(run)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Create a manufacturing run, deducting consumed stock
pub async fn create_run(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateRunInput>,
) -> impl IntoResponse {
    let service = ManufacturingService::new(state.db.clone());

    match service
        .create_run(current_user.0.farm_id, current_user.0.user_id, input)
        .await
    {
        Ok(run) => (StatusCode::CREATED, Json(run)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Edit a run (reverses prior deductions, then recomputes)
pub async fn update_run(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(run_id): Path<Uuid>,
    Json(input): Json<UpdateRunInput>,
) -> impl IntoResponse {
    let service = ManufacturingService::new(state.db.clone());

    match service
        .update_run(current_user.0.farm_id, current_user.0.user_id, run_id, input)
        .await
    {
        Ok(run) => (StatusCode::OK, Json(run)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Soft-delete a run, adding its consumption back to stock
pub async fn delete_run(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(run_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = ManufacturingService::new(state.db.clone());

    match service
        .delete_run(current_user.0.farm_id, current_user.0.user_id, run_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Restore a soft-deleted run from its stored lines
pub async fn restore_run(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(run_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = ManufacturingService::new(state.db.clone());

    match service
        .restore_run(current_user.0.farm_id, current_user.0.user_id, run_id)
        .await
    {
        Ok(run) => (StatusCode::OK, Json(run)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Bulk-delete all manufacturing runs (requires confirmation phrase)
pub async fn bulk_delete_runs(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<BulkDeleteInput>,
) -> impl IntoResponse {
    let service = ManufacturingService::new(state.db.clone());

    match service
        .bulk_delete(current_user.0.farm_id, current_user.0.user_id, input)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => e.into_response(),
    }
}
