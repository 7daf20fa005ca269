//! Weighted-average pricer
//!
//! Recomputes a raw material's reference price from the currently-active
//! purchase-line set. Invoked inside the caller's transaction after every
//! line insert, void, delete, or restore that touches the material. Callers
//! must lock the material row first so concurrent recomputations never read a
//! stale line set.

use rust_decimal::Decimal;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::costing;

/// Lock the material row for the remainder of the transaction and return its
/// current reference price.
pub(crate) async fn lock_material(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
) -> AppResult<Decimal> {
    sqlx::query_scalar::<_, Decimal>(
        "SELECT reference_price FROM raw_materials WHERE id = $1 AND farm_id = $2 FOR UPDATE",
    )
    .bind(material_id)
    .bind(farm_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Raw material".to_string()))
}

/// All active purchase lines for a material as (quantity, unit price) pairs.
/// A line counts only while both it and its owning header are active.
pub(crate) async fn active_lines(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
) -> AppResult<Vec<(Decimal, Decimal)>> {
    let lines = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT pl.quantity_kg, pl.unit_price
        FROM purchase_lines pl
        JOIN purchases p ON p.id = pl.purchase_id
        WHERE pl.farm_id = $1 AND pl.material_id = $2
          AND pl.state = 'active' AND p.state = 'active'
        "#,
    )
    .bind(farm_id)
    .bind(material_id)
    .fetch_all(conn)
    .await?;

    Ok(lines)
}

/// Recompute and persist the material's reference price.
///
/// When the active line set is empty the last computed value stays in place:
/// new formula lines must still have a sensible price to snapshot.
pub(crate) async fn recompute_reference_price(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
) -> AppResult<Decimal> {
    let lines = active_lines(&mut *conn, farm_id, material_id).await?;

    match costing::weighted_average_price(&lines) {
        Some(price) => {
            sqlx::query(
                "UPDATE raw_materials SET reference_price = $1, updated_at = now() WHERE id = $2 AND farm_id = $3",
            )
            .bind(price)
            .bind(material_id)
            .bind(farm_id)
            .execute(&mut *conn)
            .await?;
            Ok(price)
        }
        None => {
            let current = sqlx::query_scalar::<_, Decimal>(
                "SELECT reference_price FROM raw_materials WHERE id = $1 AND farm_id = $2",
            )
            .bind(material_id)
            .bind(farm_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Raw material".to_string()))?;
            Ok(current)
        }
    }
}
