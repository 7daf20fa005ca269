//! Inventory HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::inventory::{
    InitializeInventoryInput, InventoryService, SetPhysicalQuantityInput,
};
use crate::AppState;

/// List inventory records with material details
pub async fn list_inventory(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> impl IntoResponse {
    let service = InventoryService::new(state.db.clone());

    match service.list(current_user.0.farm_id).await {
        Ok(records) => (
            StatusCode::OK,
            Json(serde_json::json!({ "records": records })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get the inventory record for a material
pub async fn get_inventory_record(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(material_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = InventoryService::new(state.db.clone());

    match service.get_record(current_user.0.farm_id, material_id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Initialize inventory records for a batch of materials
pub async fn initialize_inventory(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<InitializeInventoryInput>,
) -> impl IntoResponse {
    let service = InventoryService::new(state.db.clone());

    match service
        .initialize(current_user.0.farm_id, current_user.0.user_id, input)
        .await
    {
        Ok(records) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "records": records })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Record a physical count for a material
pub async fn set_physical_quantity(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(material_id): Path<Uuid>,
    Json(input): Json<SetPhysicalQuantityInput>,
) -> impl IntoResponse {
    let service = InventoryService::new(state.db.clone());

    match service
        .set_physical_quantity(current_user.0.farm_id, current_user.0.user_id, material_id, input)
        .await
    {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Delete all inventory records for the farm
pub async fn clear_inventory(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> impl IntoResponse {
    let service = InventoryService::new(state.db.clone());

    match service.clear(current_user.0.farm_id, current_user.0.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
