//! Audit log HTTP handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::middleware::CurrentUser;
use crate::services::audit::{AuditQuery, AuditService};
use crate::AppState;

/// Query the audit log with optional family/action/date filters
pub async fn query_audit_log(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filters): Query<AuditQuery>,
) -> impl IntoResponse {
    let service = AuditService::new(state.db.clone());

    match service.query(current_user.0.farm_id, filters).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(serde_json::json!({ "entries": entries })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
