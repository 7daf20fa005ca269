//! Purchase HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::purchase::{BulkDeleteInput, PurchaseService, RecordPurchaseInput};
use crate::AppState;

/// List purchases for the current farm
pub async fn list_purchases(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> impl IntoResponse {
    let service = PurchaseService::new(state.db.clone());

    match service.list_purchases(current_user.0.farm_id).await {
        Ok(purchases) => (
            StatusCode::OK,
            Json(serde_json::json!({ "purchases": purchases })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a purchase with its lines
pub async fn get_purchase(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(purchase_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = PurchaseService::new(state.db.clone());

    match service.get_purchase(current_user.0.farm_id, purchase_id).await {
        Ok(purchase) => (StatusCode::OK, Json(purchase)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Record a new purchase
pub async fn record_purchase(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<RecordPurchaseInput>,
) -> impl IntoResponse {
    let service = PurchaseService::new(state.db.clone());

    match service
        .record_purchase(current_user.0.farm_id, current_user.0.user_id, input)
        .await
    {
        Ok(purchase) => (StatusCode::CREATED, Json(purchase)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Void a single purchase line
pub async fn void_purchase_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((purchase_id, line_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    let service = PurchaseService::new(state.db.clone());

    match service
        .void_line(current_user.0.farm_id, current_user.0.user_id, purchase_id, line_id)
        .await
    {
        Ok(purchase) => (StatusCode::OK, Json(purchase)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Soft-delete a purchase
pub async fn delete_purchase(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(purchase_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = PurchaseService::new(state.db.clone());

    match service
        .delete_purchase(current_user.0.farm_id, current_user.0.user_id, purchase_id)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Restore a soft-deleted purchase
pub async fn restore_purchase(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(purchase_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = PurchaseService::new(state.db.clone());

    match service
        .restore_purchase(current_user.0.farm_id, current_user.0.user_id, purchase_id)
        .await
    {
        Ok(purchase) => (StatusCode::OK, Json(purchase)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Bulk-delete all purchases (requires confirmation phrase)
pub async fn bulk_delete_purchases(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<BulkDeleteInput>,
) -> impl IntoResponse {
    let service = PurchaseService::new(state.db.clone());

    match service
        .bulk_delete(current_user.0.farm_id, current_user.0.user_id, input)
        .await
    {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => e.into_response(),
    }
}
