//! Purchase ledger service
//!
//! Records purchases, voids lines, and coordinates soft delete / restore /
//! bulk delete. Every mutation recomputes the affected materials' reference
//! prices and inventory aggregates inside the same transaction, so derived
//! state and audit entries land atomically with the change.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::{audit, inventory, is_concurrency_conflict, parse_state, pricing};
use shared::{
    confirmation_matches, costing, validate_quantity, validate_unit_price, AuditAction,
    BulkDeleteReport, BulkItemOutcome, OperationKind, TableFamily,
    PURCHASES_BULK_DELETE_PHRASE,
};

/// Purchase service for the purchasing side of the ledger
#[derive(Clone)]
pub struct PurchaseService {
    db: PgPool,
}

/// Purchase header
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Purchase {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub supplier_id: Uuid,
    pub invoice_number: Option<String>,
    pub purchase_date: NaiveDate,
    pub total: Decimal,
    pub state: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

/// Purchase line
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PurchaseLine {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub material_id: Uuid,
    pub quantity_kg: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub state: String,
}

/// Purchase header with its lines
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseWithLines {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub lines: Vec<PurchaseLine>,
}

/// One line of a purchase being recorded
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseLineInput {
    pub material_id: Uuid,
    pub quantity_kg: Decimal,
    pub unit_price: Decimal,
}

/// Input for recording a purchase
#[derive(Debug, Clone, Deserialize)]
pub struct RecordPurchaseInput {
    pub supplier_id: Uuid,
    pub invoice_number: Option<String>,
    pub purchase_date: NaiveDate,
    pub lines: Vec<PurchaseLineInput>,
}

/// Input for a bulk delete
#[derive(Debug, Clone, Deserialize)]
pub struct BulkDeleteInput {
    pub confirmation_phrase: String,
}

/// Lock the header row and return it.
async fn fetch_header_for_update(
    conn: &mut PgConnection,
    farm_id: Uuid,
    purchase_id: Uuid,
) -> AppResult<Purchase> {
    sqlx::query_as::<_, Purchase>(
        r#"
        SELECT id, farm_id, supplier_id, invoice_number, purchase_date, total, state,
               deleted_at, deleted_by, created_at, created_by
        FROM purchases
        WHERE id = $1 AND farm_id = $2
        FOR UPDATE
        "#,
    )
    .bind(purchase_id)
    .bind(farm_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Purchase".to_string()))
}

async fn fetch_lines(
    conn: &mut PgConnection,
    purchase_id: Uuid,
) -> AppResult<Vec<PurchaseLine>> {
    let lines = sqlx::query_as::<_, PurchaseLine>(
        r#"
        SELECT id, purchase_id, material_id, quantity_kg, unit_price, subtotal, state
        FROM purchase_lines
        WHERE purchase_id = $1
        ORDER BY created_at, id
        "#,
    )
    .bind(purchase_id)
    .fetch_all(conn)
    .await?;

    Ok(lines)
}

/// Recompute the header total as the sum of its active lines' subtotals.
async fn recompute_header_total(
    conn: &mut PgConnection,
    purchase_id: Uuid,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE purchases
        SET total = COALESCE(
            (SELECT SUM(subtotal) FROM purchase_lines
             WHERE purchase_id = $1 AND state = 'active'), 0)
        WHERE id = $1
        "#,
    )
    .bind(purchase_id)
    .execute(conn)
    .await?;

    Ok(())
}

impl PurchaseService {
    /// Create a new PurchaseService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Record a purchase with its lines.
    ///
    /// Atomically inserts the header and lines, recomputes each affected
    /// material's reference price and inventory aggregates, and appends the
    /// audit entry. Retried once on a serialization conflict.
    pub async fn record_purchase(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        input: RecordPurchaseInput,
    ) -> AppResult<PurchaseWithLines> {
        if input.lines.is_empty() {
            return Err(AppError::validation(
                "lines",
                "A purchase requires at least one line",
                "Una compra requiere al menos una línea",
            ));
        }
        for line in &input.lines {
            validate_quantity(line.quantity_kg)
                .map_err(|msg| AppError::validation("quantity_kg", msg, "La cantidad debe ser positiva"))?;
            validate_unit_price(line.unit_price)
                .map_err(|msg| AppError::validation("unit_price", msg, "El precio unitario no puede ser negativo"))?;
        }
        if let Some(invoice) = &input.invoice_number {
            if invoice.trim().is_empty() {
                return Err(AppError::validation(
                    "invoice_number",
                    "Invoice number cannot be blank",
                    "El número de factura no puede estar en blanco",
                ));
            }
        }

        let mut retried = false;
        loop {
            match self.try_record_purchase(farm_id, user_id, input.clone()).await {
                Err(err) if is_concurrency_conflict(&err) && !retried => {
                    retried = true;
                    tracing::warn!(%farm_id, "purchase insert hit a conflict, retrying");
                }
                Err(err) if is_concurrency_conflict(&err) => {
                    return Err(AppError::ConcurrencyConflict)
                }
                other => return other,
            }
        }
    }

    async fn try_record_purchase(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        input: RecordPurchaseInput,
    ) -> AppResult<PurchaseWithLines> {
        let mut tx = self.db.begin().await?;

        let supplier_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM suppliers WHERE id = $1 AND farm_id = $2)",
        )
        .bind(input.supplier_id)
        .bind(farm_id)
        .fetch_one(&mut *tx)
        .await?;

        if !supplier_exists {
            return Err(AppError::NotFound("Supplier".to_string()));
        }

        if let Some(invoice) = &input.invoice_number {
            let taken = sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS(SELECT 1 FROM purchases
                              WHERE farm_id = $1 AND invoice_number = $2 AND state = 'active')
                "#,
            )
            .bind(farm_id)
            .bind(invoice)
            .fetch_one(&mut *tx)
            .await?;

            if taken {
                return Err(AppError::DuplicateEntry("invoice number".to_string()));
            }
        }

        // Lock affected materials in ascending id order
        let mut material_ids: Vec<Uuid> = input.lines.iter().map(|l| l.material_id).collect();
        material_ids.sort();
        material_ids.dedup();
        for material_id in &material_ids {
            pricing::lock_material(&mut tx, farm_id, *material_id).await?;
        }

        let total: Decimal = input
            .lines
            .iter()
            .map(|l| costing::line_subtotal(l.quantity_kg, l.unit_price))
            .sum();

        let purchase_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO purchases (farm_id, supplier_id, invoice_number, purchase_date, total, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(farm_id)
        .bind(input.supplier_id)
        .bind(&input.invoice_number)
        .bind(input.purchase_date)
        .bind(total)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        for line in &input.lines {
            let subtotal = costing::line_subtotal(line.quantity_kg, line.unit_price);
            sqlx::query(
                r#"
                INSERT INTO purchase_lines (purchase_id, farm_id, material_id, quantity_kg, unit_price, subtotal)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(purchase_id)
            .bind(farm_id)
            .bind(line.material_id)
            .bind(line.quantity_kg)
            .bind(line.unit_price)
            .bind(subtotal)
            .execute(&mut *tx)
            .await?;
        }

        for material_id in &material_ids {
            pricing::recompute_reference_price(&mut tx, farm_id, *material_id).await?;
        }
        // Inventory rows lock in ascending material-id order, like every
        // other acquisition path.
        let mut receipts: Vec<(Uuid, Decimal)> = input
            .lines
            .iter()
            .map(|l| (l.material_id, l.quantity_kg))
            .collect();
        receipts.sort_by_key(|(material_id, _)| *material_id);
        for (material_id, quantity_kg) in &receipts {
            inventory::apply_purchase(&mut tx, farm_id, *material_id, *quantity_kg).await?;
        }

        let purchase = fetch_header_for_update(&mut tx, farm_id, purchase_id).await?;
        let lines = fetch_lines(&mut tx, purchase_id).await?;
        let result = PurchaseWithLines { purchase, lines };

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Purchases,
            AuditAction::Create,
            purchase_id,
            None,
            Some(audit::snapshot(&result)),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%farm_id, %purchase_id, "purchase recorded");
        Ok(result)
    }

    /// Get a purchase with its lines
    pub async fn get_purchase(
        &self,
        farm_id: Uuid,
        purchase_id: Uuid,
    ) -> AppResult<PurchaseWithLines> {
        let purchase = sqlx::query_as::<_, Purchase>(
            r#"
            SELECT id, farm_id, supplier_id, invoice_number, purchase_date, total, state,
                   deleted_at, deleted_by, created_at, created_by
            FROM purchases
            WHERE id = $1 AND farm_id = $2 AND state <> 'purged'
            "#,
        )
        .bind(purchase_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase".to_string()))?;

        let lines = sqlx::query_as::<_, PurchaseLine>(
            r#"
            SELECT id, purchase_id, material_id, quantity_kg, unit_price, subtotal, state
            FROM purchase_lines
            WHERE purchase_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(purchase_id)
        .fetch_all(&self.db)
        .await?;

        Ok(PurchaseWithLines { purchase, lines })
    }

    /// List purchases for the farm (bulk-purged records stay hidden)
    pub async fn list_purchases(&self, farm_id: Uuid) -> AppResult<Vec<Purchase>> {
        let purchases = sqlx::query_as::<_, Purchase>(
            r#"
            SELECT id, farm_id, supplier_id, invoice_number, purchase_date, total, state,
                   deleted_at, deleted_by, created_at, created_by
            FROM purchases
            WHERE farm_id = $1 AND state <> 'purged'
            ORDER BY purchase_date DESC, created_at DESC
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        Ok(purchases)
    }

    /// Void a single line: reverses its price and inventory contribution and
    /// recomputes the header total. Lines must be voided before the header
    /// can be deleted.
    pub async fn void_line(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        purchase_id: Uuid,
        line_id: Uuid,
    ) -> AppResult<PurchaseWithLines> {
        let mut tx = self.db.begin().await?;

        let header = fetch_header_for_update(&mut tx, farm_id, purchase_id).await?;
        if !parse_state(&header.state)?.can_delete() {
            return Err(AppError::precondition(
                "Purchase is not active",
                "La compra no está activa",
            ));
        }

        let line = sqlx::query_as::<_, PurchaseLine>(
            r#"
            SELECT id, purchase_id, material_id, quantity_kg, unit_price, subtotal, state
            FROM purchase_lines
            WHERE id = $1 AND purchase_id = $2
            FOR UPDATE
            "#,
        )
        .bind(line_id)
        .bind(purchase_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Purchase line".to_string()))?;

        if !parse_state(&line.state)?.can_delete() {
            return Err(AppError::precondition(
                "Purchase line is already voided",
                "La línea de compra ya está anulada",
            ));
        }

        pricing::lock_material(&mut tx, farm_id, line.material_id).await?;

        sqlx::query(
            r#"
            UPDATE purchase_lines
            SET state = 'deleted', deleted_at = now(), deleted_by = $1
            WHERE id = $2
            "#,
        )
        .bind(user_id)
        .bind(line_id)
        .execute(&mut *tx)
        .await?;

        recompute_header_total(&mut tx, purchase_id).await?;
        pricing::recompute_reference_price(&mut tx, farm_id, line.material_id).await?;
        inventory::reverse_operation(
            &mut tx,
            farm_id,
            line.material_id,
            OperationKind::Purchase,
            line.quantity_kg,
        )
        .await?;

        let purchase = fetch_header_for_update(&mut tx, farm_id, purchase_id).await?;
        let lines = fetch_lines(&mut tx, purchase_id).await?;
        let result = PurchaseWithLines { purchase, lines };

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Purchases,
            AuditAction::Update,
            purchase_id,
            Some(audit::snapshot(&PurchaseWithLines {
                purchase: header,
                lines: vec![line],
            })),
            Some(audit::snapshot(&result)),
        )
        .await?;

        tx.commit().await?;
        Ok(result)
    }

    /// Soft-delete a purchase header. All lines must already be voided:
    /// their reversals carried the price and inventory effects, so deleting
    /// the header is purely a lifecycle transition.
    pub async fn delete_purchase(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        purchase_id: Uuid,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let header = fetch_header_for_update(&mut tx, farm_id, purchase_id).await?;
        if !parse_state(&header.state)?.can_delete() {
            return Err(AppError::precondition(
                "Purchase is not active",
                "La compra no está activa",
            ));
        }

        let active_lines = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM purchase_lines WHERE purchase_id = $1 AND state = 'active'",
        )
        .bind(purchase_id)
        .fetch_one(&mut *tx)
        .await?;

        if active_lines > 0 {
            return Err(AppError::precondition(
                "Purchase still has active lines; void them first",
                "La compra todavía tiene líneas activas; anúlelas primero",
            ));
        }

        sqlx::query(
            r#"
            UPDATE purchases
            SET state = 'deleted', deleted_at = now(), deleted_by = $1
            WHERE id = $2
            "#,
        )
        .bind(user_id)
        .bind(purchase_id)
        .execute(&mut *tx)
        .await?;

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Purchases,
            AuditAction::Delete,
            purchase_id,
            Some(audit::snapshot(&header)),
            None,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%farm_id, %purchase_id, "purchase deleted");
        Ok(())
    }

    /// Restore a soft-deleted purchase: reactivates the header and its
    /// voided lines and reapplies each line's price and inventory effects.
    pub async fn restore_purchase(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        purchase_id: Uuid,
    ) -> AppResult<PurchaseWithLines> {
        let mut tx = self.db.begin().await?;

        let header = fetch_header_for_update(&mut tx, farm_id, purchase_id).await?;
        if !parse_state(&header.state)?.can_restore() {
            return Err(AppError::precondition(
                "Purchase cannot be restored from its current state",
                "La compra no puede restaurarse desde su estado actual",
            ));
        }

        if let Some(invoice) = &header.invoice_number {
            let taken = sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS(SELECT 1 FROM purchases
                              WHERE farm_id = $1 AND invoice_number = $2
                                AND state = 'active' AND id <> $3)
                "#,
            )
            .bind(farm_id)
            .bind(invoice)
            .bind(purchase_id)
            .fetch_one(&mut *tx)
            .await?;

            if taken {
                return Err(AppError::DuplicateEntry("invoice number".to_string()));
            }
        }

        let deleted_lines = sqlx::query_as::<_, PurchaseLine>(
            r#"
            SELECT id, purchase_id, material_id, quantity_kg, unit_price, subtotal, state
            FROM purchase_lines
            WHERE purchase_id = $1 AND state = 'deleted'
            ORDER BY material_id
            "#,
        )
        .bind(purchase_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut material_ids: Vec<Uuid> =
            deleted_lines.iter().map(|l| l.material_id).collect();
        material_ids.sort();
        material_ids.dedup();
        for material_id in &material_ids {
            pricing::lock_material(&mut tx, farm_id, *material_id).await?;
        }

        sqlx::query(
            r#"
            UPDATE purchases
            SET state = 'active', deleted_at = NULL, deleted_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(purchase_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE purchase_lines
            SET state = 'active', deleted_at = NULL, deleted_by = NULL
            WHERE purchase_id = $1 AND state = 'deleted'
            "#,
        )
        .bind(purchase_id)
        .execute(&mut *tx)
        .await?;

        recompute_header_total(&mut tx, purchase_id).await?;
        for material_id in &material_ids {
            pricing::recompute_reference_price(&mut tx, farm_id, *material_id).await?;
        }
        for line in &deleted_lines {
            inventory::apply_purchase(&mut tx, farm_id, line.material_id, line.quantity_kg)
                .await?;
        }

        let purchase = fetch_header_for_update(&mut tx, farm_id, purchase_id).await?;
        let lines = fetch_lines(&mut tx, purchase_id).await?;
        let result = PurchaseWithLines { purchase, lines };

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Purchases,
            AuditAction::Restore,
            purchase_id,
            Some(audit::snapshot(&header)),
            Some(audit::snapshot(&result)),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%farm_id, %purchase_id, "purchase restored");
        Ok(result)
    }

    /// Bulk-delete every purchase for the farm.
    ///
    /// Requires the exact confirmation phrase and rejects outright while any
    /// active manufacturing run exists. Records are purged one at a time,
    /// each in its own transaction, so a mid-batch failure leaves a
    /// well-defined committed prefix reported in the per-item outcome list.
    pub async fn bulk_delete(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        input: BulkDeleteInput,
    ) -> AppResult<BulkDeleteReport> {
        if !confirmation_matches(PURCHASES_BULK_DELETE_PHRASE, &input.confirmation_phrase) {
            return Err(AppError::validation(
                "confirmation_phrase",
                "Confirmation phrase does not match",
                "La frase de confirmación no coincide",
            ));
        }

        let active_runs = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM manufacturing_runs WHERE farm_id = $1 AND state = 'active'",
        )
        .bind(farm_id)
        .fetch_one(&self.db)
        .await?;

        if active_runs > 0 {
            return Err(AppError::precondition(
                "Purchases cannot be bulk-deleted while manufacturing runs exist",
                "Las compras no pueden eliminarse en masa mientras existan fabricaciones",
            ));
        }

        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM purchases
            WHERE farm_id = $1 AND state <> 'purged'
            ORDER BY created_at, id
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        let mut outcomes = Vec::with_capacity(ids.len());
        let mut deleted = 0usize;

        for id in &ids {
            match self.purge_purchase(farm_id, user_id, *id).await {
                Ok(()) => {
                    deleted += 1;
                    outcomes.push(BulkItemOutcome {
                        record_id: *id,
                        success: true,
                        error: None,
                    });
                }
                Err(err) => {
                    tracing::error!(%farm_id, purchase_id = %id, "bulk delete item failed: {err}");
                    outcomes.push(BulkItemOutcome {
                        record_id: *id,
                        success: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        tracing::info!(%farm_id, requested = ids.len(), deleted, "purchases bulk-deleted");
        Ok(BulkDeleteReport {
            requested: ids.len(),
            deleted,
            outcomes,
        })
    }

    /// Purge one purchase: reverse any still-active lines, then move the
    /// header and lines to the terminal state.
    async fn purge_purchase(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        purchase_id: Uuid,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let header = fetch_header_for_update(&mut tx, farm_id, purchase_id).await?;

        let active_lines = sqlx::query_as::<_, PurchaseLine>(
            r#"
            SELECT id, purchase_id, material_id, quantity_kg, unit_price, subtotal, state
            FROM purchase_lines
            WHERE purchase_id = $1 AND state = 'active'
            ORDER BY material_id
            "#,
        )
        .bind(purchase_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut material_ids: Vec<Uuid> = active_lines.iter().map(|l| l.material_id).collect();
        material_ids.sort();
        material_ids.dedup();
        for material_id in &material_ids {
            pricing::lock_material(&mut tx, farm_id, *material_id).await?;
        }

        sqlx::query(
            r#"
            UPDATE purchase_lines
            SET state = 'purged', deleted_at = COALESCE(deleted_at, now()),
                deleted_by = COALESCE(deleted_by, $1)
            WHERE purchase_id = $2
            "#,
        )
        .bind(user_id)
        .bind(purchase_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE purchases
            SET state = 'purged', deleted_at = COALESCE(deleted_at, now()),
                deleted_by = COALESCE(deleted_by, $1)
            WHERE id = $2
            "#,
        )
        .bind(user_id)
        .bind(purchase_id)
        .execute(&mut *tx)
        .await?;

        for material_id in &material_ids {
            pricing::recompute_reference_price(&mut tx, farm_id, *material_id).await?;
        }
        for line in &active_lines {
            inventory::reverse_operation(
                &mut tx,
                farm_id,
                line.material_id,
                OperationKind::Purchase,
                line.quantity_kg,
            )
            .await?;
        }

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Purchases,
            AuditAction::BulkDelete,
            purchase_id,
            Some(audit::snapshot(&header)),
            None,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
