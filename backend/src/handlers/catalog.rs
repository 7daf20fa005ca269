//! Catalog HTTP handlers: raw materials, suppliers, and animals

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::catalog::{
    CatalogService, CreateAnimalInput, CreateMaterialInput, CreateSupplierInput,
};
use crate::AppState;

/// List raw materials with their current reference prices
pub async fn list_materials(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> impl IntoResponse {
    let service = CatalogService::new(state.db.clone());

    match service.list_materials(current_user.0.farm_id).await {
        Ok(materials) => (
            StatusCode::OK,
            Json(serde_json::json!({ "materials": materials })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a raw material
pub async fn get_material(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(material_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = CatalogService::new(state.db.clone());

    match service.get_material(current_user.0.farm_id, material_id).await {
        Ok(material) => (StatusCode::OK, Json(material)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Create a raw material
pub async fn create_material(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateMaterialInput>,
) -> impl IntoResponse {
    let service = CatalogService::new(state.db.clone());

    match service.create_material(current_user.0.farm_id, input).await {
        Ok(material) => (StatusCode::CREATED, Json(material)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// List suppliers
pub async fn list_suppliers(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> impl IntoResponse {
    let service = CatalogService::new(state.db.clone());

    match service.list_suppliers(current_user.0.farm_id).await {
        Ok(suppliers) => (
            StatusCode::OK,
            Json(serde_json::json!({ "suppliers": suppliers })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Create a supplier
pub async fn create_supplier(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateSupplierInput>,
) -> impl IntoResponse {
    let service = CatalogService::new(state.db.clone());

    match service.create_supplier(current_user.0.farm_id, input).await {
        Ok(supplier) => (StatusCode::CREATED, Json(supplier)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// List animals
pub async fn list_animals(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> impl IntoResponse {
    let service = CatalogService::new(state.db.clone());

    match service.list_animals(current_user.0.farm_id).await {
        Ok(animals) => (
            StatusCode::OK,
            Json(serde_json::json!({ "animals": animals })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Create an animal
pub async fn create_animal(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateAnimalInput>,
) -> impl IntoResponse {
    let service = CatalogService::new(state.db.clone());

    match service.create_animal(current_user.0.farm_id, input).await {
        Ok(animal) => (StatusCode::CREATED, Json(animal)).into_response(),
        Err(e) => e.into_response(),
    }
}
