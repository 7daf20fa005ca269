//! Formula HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::middleware::CurrentUser;
use crate::services::formula::{
    AddFormulaLineInput, CreateFormulaInput, FormulaService, UpdateFormulaLineInput,
};
use crate::AppState;

/// List formulas with lines and weight checks
pub async fn list_formulas(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> impl IntoResponse {
    let service = FormulaService::new(state.db.clone());

    match service.list_formulas(current_user.0.farm_id).await {
        Ok(formulas) => (
            StatusCode::OK,
            Json(serde_json::json!({ "formulas": formulas })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a formula with its lines
pub async fn get_formula(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(formula_id): Path<Uuid>,
) -> impl IntoResponse {
    let service = FormulaService::new(state.db.clone());

    match service.get_formula(current_user.0.farm_id, formula_id).await {
        Ok(formula) => (StatusCode::OK, Json(formula)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Create a formula
pub async fn create_formula(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateFormulaInput>,
) -> impl IntoResponse {
    let service = FormulaService::new(state.db.clone());

    match service.create_formula(current_user.0.farm_id, input).await {
        Ok(formula) => (StatusCode::CREATED, Json(formula)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Add a line, snapshotting the material's current reference price
pub async fn add_formula_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(formula_id): Path<Uuid>,
    Json(input): Json<AddFormulaLineInput>,
) -> impl IntoResponse {
    let service = FormulaService::new(state.db.clone());

    match service.add_line(current_user.0.farm_id, formula_id, input).await {
        Ok(formula) => (StatusCode::CREATED, Json(formula)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Update a line's quantity (the snapshotted price stays)
pub async fn update_formula_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((formula_id, line_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateFormulaLineInput>,
) -> impl IntoResponse {
    let service = FormulaService::new(state.db.clone());

    match service
        .update_line_quantity(current_user.0.farm_id, formula_id, line_id, input)
        .await
    {
        Ok(formula) => (StatusCode::OK, Json(formula)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Remove a line
pub async fn remove_formula_line(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((formula_id, line_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    let service = FormulaService::new(state.db.clone());

    match service.remove_line(current_user.0.farm_id, formula_id, line_id).await {
        Ok(formula) => (StatusCode::OK, Json(formula)).into_response(),
        Err(e) => e.into_response(),
    }
}
