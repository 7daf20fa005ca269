//! Route definitions for the Farm Operations Platform

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - catalog
        .nest("/materials", material_routes())
        .nest("/suppliers", supplier_routes())
        .nest("/animals", animal_routes())
        // Protected routes - purchasing
        .nest("/purchases", purchase_routes())
        // Protected routes - inventory
        .nest("/inventory", inventory_routes())
        // Protected routes - formulas
        .nest("/formulas", formula_routes())
        // Protected routes - manufacturing
        .nest("/manufacturing", manufacturing_routes())
        // Protected routes - archives and audit
        .nest("/archives", archive_routes())
        .nest("/audit", audit_routes())
}

/// Raw material routes (protected)
fn material_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_materials).post(handlers::create_material))
        .route("/:material_id", get(handlers::get_material))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Supplier routes (protected)
fn supplier_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_suppliers).post(handlers::create_supplier))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Animal routes (protected)
fn animal_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_animals).post(handlers::create_animal))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Purchase routes (protected)
fn purchase_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_purchases).post(handlers::record_purchase))
        .route("/bulk-delete", post(handlers::bulk_delete_purchases))
        .route(
            "/:purchase_id",
            get(handlers::get_purchase).delete(handlers::delete_purchase),
        )
        .route("/:purchase_id/restore", post(handlers::restore_purchase))
        .route(
            "/:purchase_id/lines/:line_id/void",
            post(handlers::void_purchase_line),
        )
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Inventory routes (protected)
fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_inventory))
        .route("/initialize", post(handlers::initialize_inventory))
        .route("/clear", post(handlers::clear_inventory))
        .route(
            "/:material_id",
            get(handlers::get_inventory_record),
        )
        .route(
            "/:material_id/physical",
            put(handlers::set_physical_quantity),
        )
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Formula routes (protected)
fn formula_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_formulas).post(handlers::create_formula))
        .route("/:formula_id", get(handlers::get_formula))
        .route("/:formula_id/lines", post(handlers::add_formula_line))
        .route(
            "/:formula_id/lines/:line_id",
            put(handlers::update_formula_line).delete(handlers::remove_formula_line),
        )
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Manufacturing routes (protected)
fn manufacturing_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_runs).post(handlers::create_run))
        .route("/bulk-delete", post(handlers::bulk_delete_runs))
        .route(
            "/:run_id",
            get(handlers::get_run)
                .put(handlers::update_run)
                .delete(handlers::delete_run),
        )
        .route("/:run_id/restore", post(handlers::restore_run))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Archive snapshot routes (protected)
fn archive_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_snapshots).post(handlers::create_snapshot))
        .route(
            "/:snapshot_id",
            get(handlers::get_snapshot).delete(handlers::delete_snapshot),
        )
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Audit log routes (protected)
fn audit_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::query_audit_log))
        .route_layer(middleware::from_fn(auth_middleware))
}
