//! Business logic services for the Farm Operations Platform

pub mod archive;
pub mod audit;
pub mod catalog;
pub mod formula;
pub mod inventory;
pub mod manufacturing;
pub mod pricing;
pub mod purchase;

pub use archive::ArchiveService;
pub use audit::AuditService;
pub use catalog::CatalogService;
pub use formula::FormulaService;
pub use inventory::InventoryService;
pub use manufacturing::ManufacturingService;
pub use purchase::PurchaseService;

use crate::error::AppError;
use shared::RecordState;

/// SQLSTATE codes for serialization failure and deadlock. Operations on
/// shared aggregates retry once on these before surfacing
/// `ConcurrencyConflict`.
pub(crate) fn is_concurrency_conflict(err: &AppError) -> bool {
    if let AppError::DatabaseError(sqlx::Error::Database(db)) = err {
        matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
    } else {
        false
    }
}

/// Parse a persisted lifecycle state. The column is CHECK-constrained, so a
/// parse failure means corrupted data and surfaces as an internal error.
pub(crate) fn parse_state(state: &str) -> Result<RecordState, AppError> {
    state.parse().map_err(AppError::Internal)
}
