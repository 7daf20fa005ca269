//! Inventory reconciler
//!
//! Maintains the three-quantity inventory record (cumulative received,
//! system-expected, physically counted) and its derived shrinkage, warehouse
//! price, and stock value. Negative quantities are valid states surfaced as
//! stock alerts, never rejected: theft, spoilage, and miscounts are physical
//! reality.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::{audit, pricing};
use shared::{costing, AuditAction, OperationKind, TableFamily};

/// Inventory service managing per-material stock records
#[derive(Clone)]
pub struct InventoryService {
    db: PgPool,
}

/// One inventory record per (farm, raw material)
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InventoryRecord {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub material_id: Uuid,
    pub cumulative_received_kg: Decimal,
    pub system_quantity_kg: Decimal,
    pub physical_quantity_kg: Decimal,
    pub shrinkage_kg: Decimal,
    pub warehouse_price: Decimal,
    pub stock_value: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Negative quantities are committed but flagged for the caller
    pub fn stock_alert(&self) -> bool {
        self.system_quantity_kg < Decimal::ZERO || self.physical_quantity_kg < Decimal::ZERO
    }
}

/// Inventory record joined with its material, for listings
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InventoryOverview {
    pub id: Uuid,
    pub material_id: Uuid,
    pub material_code: String,
    pub material_name: String,
    pub cumulative_received_kg: Decimal,
    pub system_quantity_kg: Decimal,
    pub physical_quantity_kg: Decimal,
    pub shrinkage_kg: Decimal,
    pub warehouse_price: Decimal,
    pub stock_value: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// One material within an initialization request
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeItem {
    pub material_id: Uuid,
    pub physical_quantity_kg: Decimal,
    /// Manually supplied valuation cost; defaults to the material's current
    /// reference price
    pub unit_price: Option<Decimal>,
}

/// Input for initializing inventory records
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeInventoryInput {
    pub items: Vec<InitializeItem>,
}

/// Input for recording a physical count
#[derive(Debug, Clone, Deserialize)]
pub struct SetPhysicalQuantityInput {
    pub physical_quantity_kg: Decimal,
}

/// Fetch and lock the record for the remainder of the transaction.
async fn fetch_for_update(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
) -> AppResult<Option<InventoryRecord>> {
    let record = sqlx::query_as::<_, InventoryRecord>(
        r#"
        SELECT id, farm_id, material_id, cumulative_received_kg, system_quantity_kg,
               physical_quantity_kg, shrinkage_kg, warehouse_price, stock_value,
               created_at, updated_at
        FROM inventory_records
        WHERE farm_id = $1 AND material_id = $2
        FOR UPDATE
        "#,
    )
    .bind(farm_id)
    .bind(material_id)
    .fetch_optional(conn)
    .await?;

    Ok(record)
}

/// Locked system quantity for a material, if the record exists. Used by the
/// manufacturing deductor to decide the insufficient-stock flag.
pub(crate) async fn locked_system_quantity(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
) -> AppResult<Option<Decimal>> {
    Ok(fetch_for_update(conn, farm_id, material_id)
        .await?
        .map(|r| r.system_quantity_kg))
}

/// Whether the material's inventory record exists.
pub(crate) async fn is_initialized(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
) -> AppResult<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM inventory_records WHERE farm_id = $1 AND material_id = $2)",
    )
    .bind(farm_id)
    .bind(material_id)
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

/// Recompute the derived valuation fields of a record: warehouse price from
/// the active purchase-line set (keeping the previous value when the set is
/// empty), then shrinkage and stock value.
async fn revalue(conn: &mut PgConnection, farm_id: Uuid, material_id: Uuid) -> AppResult<()> {
    let Some(record) = fetch_for_update(&mut *conn, farm_id, material_id).await? else {
        return Ok(());
    };

    let lines = pricing::active_lines(&mut *conn, farm_id, material_id).await?;
    let warehouse_price =
        costing::weighted_average_price(&lines).unwrap_or(record.warehouse_price);
    let shrinkage =
        costing::shrinkage_kg(record.system_quantity_kg, record.physical_quantity_kg);
    let stock_value = costing::stock_value(record.physical_quantity_kg, warehouse_price);

    sqlx::query(
        r#"
        UPDATE inventory_records
        SET warehouse_price = $1, shrinkage_kg = $2, stock_value = $3, updated_at = now()
        WHERE id = $4
        "#,
    )
    .bind(warehouse_price)
    .bind(shrinkage)
    .bind(stock_value)
    .bind(record.id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Apply a purchase receipt: cumulative and system quantities both grow.
/// A material without an initialized record is left untouched; cumulative
/// history starts at initialization.
pub(crate) async fn apply_purchase(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
    quantity_kg: Decimal,
) -> AppResult<()> {
    if fetch_for_update(&mut *conn, farm_id, material_id).await?.is_none() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE inventory_records
        SET cumulative_received_kg = cumulative_received_kg + $1,
            system_quantity_kg = system_quantity_kg + $1,
            updated_at = now()
        WHERE farm_id = $2 AND material_id = $3
        "#,
    )
    .bind(quantity_kg)
    .bind(farm_id)
    .bind(material_id)
    .execute(&mut *conn)
    .await?;

    revalue(conn, farm_id, material_id).await
}

/// Reverse a purchase receipt (line void, purchase bulk delete).
pub(crate) async fn reverse_purchase(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
    quantity_kg: Decimal,
) -> AppResult<()> {
    if fetch_for_update(&mut *conn, farm_id, material_id).await?.is_none() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE inventory_records
        SET cumulative_received_kg = cumulative_received_kg - $1,
            system_quantity_kg = system_quantity_kg - $1,
            updated_at = now()
        WHERE farm_id = $2 AND material_id = $3
        "#,
    )
    .bind(quantity_kg)
    .bind(farm_id)
    .bind(material_id)
    .execute(&mut *conn)
    .await?;

    revalue(conn, farm_id, material_id).await
}

/// Apply manufacturing consumption. The system quantity may go negative;
/// that state is committed and surfaced as an alert. The record must exist:
/// stock deduction assumes an initialized inventory.
pub(crate) async fn apply_consumption(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
    quantity_kg: Decimal,
) -> AppResult<()> {
    if fetch_for_update(&mut *conn, farm_id, material_id).await?.is_none() {
        return Err(AppError::precondition(
            "Inventory has not been initialized for a consumed material",
            "El inventario no ha sido inicializado para un material consumido",
        ));
    }

    sqlx::query(
        r#"
        UPDATE inventory_records
        SET system_quantity_kg = system_quantity_kg - $1, updated_at = now()
        WHERE farm_id = $2 AND material_id = $3
        "#,
    )
    .bind(quantity_kg)
    .bind(farm_id)
    .bind(material_id)
    .execute(&mut *conn)
    .await?;

    revalue(conn, farm_id, material_id).await
}

/// Reverse manufacturing consumption (run delete or edit): adds back.
pub(crate) async fn reverse_consumption(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
    quantity_kg: Decimal,
) -> AppResult<()> {
    if fetch_for_update(&mut *conn, farm_id, material_id).await?.is_none() {
        return Ok(());
    }

    sqlx::query(
        r#"
        UPDATE inventory_records
        SET system_quantity_kg = system_quantity_kg + $1, updated_at = now()
        WHERE farm_id = $2 AND material_id = $3
        "#,
    )
    .bind(quantity_kg)
    .bind(farm_id)
    .bind(material_id)
    .execute(&mut *conn)
    .await?;

    revalue(conn, farm_id, material_id).await
}

/// Reverse the inventory effect of a ledger operation: a purchase added
/// stock, a run consumed it.
pub(crate) async fn reverse_operation(
    conn: &mut PgConnection,
    farm_id: Uuid,
    material_id: Uuid,
    kind: OperationKind,
    quantity_kg: Decimal,
) -> AppResult<()> {
    match kind {
        OperationKind::Purchase => {
            reverse_purchase(conn, farm_id, material_id, quantity_kg).await
        }
        OperationKind::Manufacturing => {
            reverse_consumption(conn, farm_id, material_id, quantity_kg).await
        }
    }
}

impl InventoryService {
    /// Create a new InventoryService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Initialize inventory records for a batch of materials.
    ///
    /// Each record starts with `cumulative_received = system = physical`,
    /// zero shrinkage, and a warehouse price taken from the supplied cost or
    /// the material's current reference price.
    pub async fn initialize(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        input: InitializeInventoryInput,
    ) -> AppResult<Vec<InventoryRecord>> {
        if input.items.is_empty() {
            return Err(AppError::validation(
                "items",
                "At least one material is required",
                "Se requiere al menos un material",
            ));
        }
        for item in &input.items {
            if item.physical_quantity_kg < Decimal::ZERO {
                return Err(AppError::validation(
                    "physical_quantity_kg",
                    "Initial quantity cannot be negative",
                    "La cantidad inicial no puede ser negativa",
                ));
            }
            if let Some(price) = item.unit_price {
                if price < Decimal::ZERO {
                    return Err(AppError::validation(
                        "unit_price",
                        "Unit price cannot be negative",
                        "El precio unitario no puede ser negativo",
                    ));
                }
            }
        }

        // Lock materials in ascending id order to keep lock acquisition
        // deadlock-free across concurrent operations.
        let mut items = input.items;
        items.sort_by_key(|i| i.material_id);

        let mut tx = self.db.begin().await?;
        let mut records = Vec::with_capacity(items.len());

        for item in &items {
            let reference_price =
                pricing::lock_material(&mut tx, farm_id, item.material_id).await?;

            if is_initialized(&mut tx, farm_id, item.material_id).await? {
                return Err(AppError::DuplicateEntry("inventory record".to_string()));
            }

            let warehouse_price = item.unit_price.unwrap_or(reference_price);
            let stock_value =
                costing::stock_value(item.physical_quantity_kg, warehouse_price);

            let record = sqlx::query_as::<_, InventoryRecord>(
                r#"
                INSERT INTO inventory_records (
                    farm_id, material_id, cumulative_received_kg, system_quantity_kg,
                    physical_quantity_kg, shrinkage_kg, warehouse_price, stock_value
                )
                VALUES ($1, $2, $3, $3, $3, 0, $4, $5)
                RETURNING id, farm_id, material_id, cumulative_received_kg, system_quantity_kg,
                          physical_quantity_kg, shrinkage_kg, warehouse_price, stock_value,
                          created_at, updated_at
                "#,
            )
            .bind(farm_id)
            .bind(item.material_id)
            .bind(item.physical_quantity_kg)
            .bind(warehouse_price)
            .bind(stock_value)
            .fetch_one(&mut *tx)
            .await?;

            audit::append(
                &mut tx,
                farm_id,
                user_id,
                TableFamily::Inventory,
                AuditAction::Create,
                record.id,
                None,
                Some(audit::snapshot(&record)),
            )
            .await?;

            records.push(record);
        }

        tx.commit().await?;

        tracing::info!(%farm_id, count = records.len(), "inventory initialized");
        Ok(records)
    }

    /// Record a physical count. Updates the physical quantity and the
    /// derived shrinkage and stock value; system quantity is untouched.
    pub async fn set_physical_quantity(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        material_id: Uuid,
        input: SetPhysicalQuantityInput,
    ) -> AppResult<InventoryRecord> {
        let mut tx = self.db.begin().await?;

        let before = fetch_for_update(&mut tx, farm_id, material_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Inventory record".to_string()))?;

        let shrinkage =
            costing::shrinkage_kg(before.system_quantity_kg, input.physical_quantity_kg);
        let stock_value =
            costing::stock_value(input.physical_quantity_kg, before.warehouse_price);

        let record = sqlx::query_as::<_, InventoryRecord>(
            r#"
            UPDATE inventory_records
            SET physical_quantity_kg = $1, shrinkage_kg = $2, stock_value = $3, updated_at = now()
            WHERE id = $4
            RETURNING id, farm_id, material_id, cumulative_received_kg, system_quantity_kg,
                      physical_quantity_kg, shrinkage_kg, warehouse_price, stock_value,
                      created_at, updated_at
            "#,
        )
        .bind(input.physical_quantity_kg)
        .bind(shrinkage)
        .bind(stock_value)
        .bind(before.id)
        .fetch_one(&mut *tx)
        .await?;

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Inventory,
            AuditAction::Update,
            record.id,
            Some(audit::snapshot(&before)),
            Some(audit::snapshot(&record)),
        )
        .await?;

        tx.commit().await?;

        if record.stock_alert() {
            tracing::warn!(%farm_id, %material_id, "physical count left negative stock");
        }
        Ok(record)
    }

    /// Delete all inventory records for the farm. Rejected while any active
    /// manufacturing run exists, since run deductions assume an initialized
    /// inventory.
    pub async fn clear(&self, farm_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let active_runs = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM manufacturing_runs WHERE farm_id = $1 AND state = 'active'",
        )
        .bind(farm_id)
        .fetch_one(&mut *tx)
        .await?;

        if active_runs > 0 {
            return Err(AppError::precondition(
                "Inventory cannot be cleared while active manufacturing runs exist",
                "El inventario no puede vaciarse mientras existan fabricaciones activas",
            ));
        }

        let records = sqlx::query_as::<_, InventoryRecord>(
            r#"
            SELECT id, farm_id, material_id, cumulative_received_kg, system_quantity_kg,
                   physical_quantity_kg, shrinkage_kg, warehouse_price, stock_value,
                   created_at, updated_at
            FROM inventory_records
            WHERE farm_id = $1
            ORDER BY material_id
            FOR UPDATE
            "#,
        )
        .bind(farm_id)
        .fetch_all(&mut *tx)
        .await?;

        for record in &records {
            audit::append(
                &mut tx,
                farm_id,
                user_id,
                TableFamily::Inventory,
                AuditAction::BulkDelete,
                record.id,
                Some(audit::snapshot(record)),
                None,
            )
            .await?;
        }

        sqlx::query("DELETE FROM inventory_records WHERE farm_id = $1")
            .bind(farm_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(%farm_id, count = records.len(), "inventory cleared");
        Ok(())
    }

    /// Get the inventory record for a material
    pub async fn get_record(
        &self,
        farm_id: Uuid,
        material_id: Uuid,
    ) -> AppResult<InventoryRecord> {
        sqlx::query_as::<_, InventoryRecord>(
            r#"
            SELECT id, farm_id, material_id, cumulative_received_kg, system_quantity_kg,
                   physical_quantity_kg, shrinkage_kg, warehouse_price, stock_value,
                   created_at, updated_at
            FROM inventory_records
            WHERE farm_id = $1 AND material_id = $2
            "#,
        )
        .bind(farm_id)
        .bind(material_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Inventory record".to_string()))
    }

    /// List all inventory records for the farm with material details
    pub async fn list(&self, farm_id: Uuid) -> AppResult<Vec<InventoryOverview>> {
        let records = sqlx::query_as::<_, InventoryOverview>(
            r#"
            SELECT ir.id, ir.material_id, rm.code AS material_code, rm.name AS material_name,
                   ir.cumulative_received_kg, ir.system_quantity_kg, ir.physical_quantity_kg,
                   ir.shrinkage_kg, ir.warehouse_price, ir.stock_value, ir.updated_at
            FROM inventory_records ir
            JOIN raw_materials rm ON rm.id = ir.material_id
            WHERE ir.farm_id = $1
            ORDER BY rm.code
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        Ok(records)
    }
}
