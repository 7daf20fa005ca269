//! Manufacturing cost calculator and stock deductor
//!
//! A run consumes `line quantity × multiplier` of every formula material at
//! the line's snapshotted price. Under-stocked runs are flagged, not blocked:
//! plants legitimately produce against expected-but-undelivered stock, so the
//! run commits with `insufficient_stock = true` and the system quantity goes
//! negative.
//!
//! Each run stores its own consumption lines. Delete, restore, and edit
//! replay those stored numbers rather than the live formula, which may have
//! changed since the run was created.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::{audit, inventory, is_concurrency_conflict, parse_state};
use shared::{
    confirmation_matches, costing, validate_multiplier, AuditAction, BulkDeleteReport,
    BulkItemOutcome, OperationKind, TableFamily, MANUFACTURING_BULK_DELETE_PHRASE,
};

/// Manufacturing service for production runs
#[derive(Clone)]
pub struct ManufacturingService {
    db: PgPool,
}

/// Manufacturing run
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ManufacturingRun {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub formula_id: Uuid,
    pub multiplier: Decimal,
    pub manufacture_date: NaiveDate,
    pub total_cost: Decimal,
    pub cost_per_kilo: Decimal,
    pub insufficient_stock: bool,
    pub state: String,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

/// Stored consumption line of a run
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ManufacturingLine {
    pub id: Uuid,
    pub run_id: Uuid,
    pub material_id: Uuid,
    pub quantity_consumed_kg: Decimal,
    pub unit_price: Decimal,
    pub cost: Decimal,
}

/// Run with its stored consumption lines
#[derive(Debug, Clone, Serialize)]
pub struct RunWithLines {
    #[serde(flatten)]
    pub run: ManufacturingRun,
    pub lines: Vec<ManufacturingLine>,
}

/// Input for creating a run
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunInput {
    pub formula_id: Uuid,
    /// Times to manufacture the formula batch
    pub multiplier: Decimal,
    pub manufacture_date: NaiveDate,
}

/// Input for editing a run. Changing the formula or multiplier reverses the
/// prior deductions before recomputing; deltas are never applied against the
/// new numbers.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRunInput {
    pub formula_id: Option<Uuid>,
    pub multiplier: Option<Decimal>,
    pub manufacture_date: Option<NaiveDate>,
}

/// Input for a bulk delete
#[derive(Debug, Clone, Deserialize)]
pub struct BulkDeleteInput {
    pub confirmation_phrase: String,
}

/// Formula data needed to compute a run
#[derive(Debug, FromRow)]
struct FormulaHeader {
    id: Uuid,
    total_weight_kg: Decimal,
}

async fn fetch_run_for_update(
    conn: &mut PgConnection,
    farm_id: Uuid,
    run_id: Uuid,
) -> AppResult<ManufacturingRun> {
    sqlx::query_as::<_, ManufacturingRun>(
        r#"
        SELECT id, farm_id, formula_id, multiplier, manufacture_date, total_cost,
               cost_per_kilo, insufficient_stock, state, deleted_at, deleted_by,
               created_at, created_by
        FROM manufacturing_runs
        WHERE id = $1 AND farm_id = $2
        FOR UPDATE
        "#,
    )
    .bind(run_id)
    .bind(farm_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Manufacturing run".to_string()))
}

async fn fetch_run_lines(
    conn: &mut PgConnection,
    run_id: Uuid,
) -> AppResult<Vec<ManufacturingLine>> {
    let lines = sqlx::query_as::<_, ManufacturingLine>(
        r#"
        SELECT id, run_id, material_id, quantity_consumed_kg, unit_price, cost
        FROM manufacturing_lines
        WHERE run_id = $1
        ORDER BY material_id
        "#,
    )
    .bind(run_id)
    .fetch_all(conn)
    .await?;

    Ok(lines)
}

/// Reverse a run's stored deductions: every consumed quantity is added back.
async fn reverse_run_lines(
    conn: &mut PgConnection,
    farm_id: Uuid,
    lines: &[ManufacturingLine],
) -> AppResult<()> {
    for line in lines {
        inventory::reverse_operation(
            conn,
            farm_id,
            line.material_id,
            OperationKind::Manufacturing,
            line.quantity_consumed_kg,
        )
        .await?;
    }
    Ok(())
}

/// Reapply a run's stored deductions (restore path).
async fn reapply_run_lines(
    conn: &mut PgConnection,
    farm_id: Uuid,
    lines: &[ManufacturingLine],
) -> AppResult<()> {
    for line in lines {
        inventory::apply_consumption(conn, farm_id, line.material_id, line.quantity_consumed_kg)
            .await?;
    }
    Ok(())
}

/// Compute consumption and cost for a formula at a multiplier, checking
/// stock levels. Returns the per-line consumption, the run cost, and whether
/// any line exceeds the available system quantity.
async fn compute_run(
    conn: &mut PgConnection,
    farm_id: Uuid,
    formula_id: Uuid,
    multiplier: Decimal,
) -> AppResult<(Vec<(Uuid, Decimal, Decimal, Decimal)>, costing::RunCost, bool)> {
    let formula = sqlx::query_as::<_, FormulaHeader>(
        "SELECT id, total_weight_kg FROM formulas WHERE id = $1 AND farm_id = $2 FOR UPDATE",
    )
    .bind(formula_id)
    .bind(farm_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Formula".to_string()))?;

    let formula_lines = sqlx::query_as::<_, (Uuid, Decimal, Decimal)>(
        r#"
        SELECT material_id, quantity_kg, unit_price_at_creation
        FROM formula_lines
        WHERE formula_id = $1
        ORDER BY material_id
        "#,
    )
    .bind(formula_id)
    .fetch_all(&mut *conn)
    .await?;

    if formula_lines.is_empty() {
        return Err(AppError::ValidationError(
            "Formula has no lines to manufacture".to_string(),
        ));
    }

    let cost_lines: Vec<(Decimal, Decimal)> =
        formula_lines.iter().map(|(_, q, p)| (*q, *p)).collect();
    let run_cost = costing::run_cost(&cost_lines, multiplier, formula.total_weight_kg);

    // Lock inventory rows in ascending material order and flag under-stock
    // lines; the deduction still proceeds.
    let mut insufficient = false;
    let mut lines = Vec::with_capacity(formula_lines.len());
    for (material_id, quantity_kg, unit_price) in &formula_lines {
        let consumed = costing::consumed_quantity_kg(*quantity_kg, multiplier);
        let cost = costing::line_subtotal(consumed, *unit_price);

        let system = inventory::locked_system_quantity(&mut *conn, farm_id, *material_id)
            .await?
            .ok_or_else(|| {
                AppError::precondition(
                    "Inventory has not been initialized for a formula material",
                    "El inventario no ha sido inicializado para un material de la fórmula",
                )
            })?;
        if system < consumed {
            insufficient = true;
        }

        lines.push((*material_id, consumed, *unit_price, cost));
    }

    Ok((lines, run_cost, insufficient))
}

impl ManufacturingService {
    /// Create a new ManufacturingService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a manufacturing run and deduct consumed stock atomically.
    /// Retried once on a serialization conflict.
    pub async fn create_run(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        input: CreateRunInput,
    ) -> AppResult<RunWithLines> {
        validate_multiplier(input.multiplier)
            .map_err(|msg| AppError::validation("multiplier", msg, "El multiplicador debe ser positivo"))?;

        let mut retried = false;
        loop {
            match self.try_create_run(farm_id, user_id, input.clone()).await {
                Err(err) if is_concurrency_conflict(&err) && !retried => {
                    retried = true;
                    tracing::warn!(%farm_id, "run creation hit a conflict, retrying");
                }
                Err(err) if is_concurrency_conflict(&err) => {
                    return Err(AppError::ConcurrencyConflict)
                }
                other => return other,
            }
        }
    }

    async fn try_create_run(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        input: CreateRunInput,
    ) -> AppResult<RunWithLines> {
        let mut tx = self.db.begin().await?;

        let (lines, run_cost, insufficient) =
            compute_run(&mut tx, farm_id, input.formula_id, input.multiplier).await?;

        let run_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO manufacturing_runs (
                farm_id, formula_id, multiplier, manufacture_date,
                total_cost, cost_per_kilo, insufficient_stock, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(farm_id)
        .bind(input.formula_id)
        .bind(input.multiplier)
        .bind(input.manufacture_date)
        .bind(run_cost.total_cost)
        .bind(run_cost.cost_per_kilo)
        .bind(insufficient)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        for (material_id, consumed, unit_price, cost) in &lines {
            sqlx::query(
                r#"
                INSERT INTO manufacturing_lines (run_id, farm_id, material_id,
                                                 quantity_consumed_kg, unit_price, cost)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(run_id)
            .bind(farm_id)
            .bind(material_id)
            .bind(consumed)
            .bind(unit_price)
            .bind(cost)
            .execute(&mut *tx)
            .await?;

            inventory::apply_consumption(&mut tx, farm_id, *material_id, *consumed).await?;
        }

        let run = fetch_run_for_update(&mut tx, farm_id, run_id).await?;
        let stored_lines = fetch_run_lines(&mut tx, run_id).await?;
        let result = RunWithLines {
            run,
            lines: stored_lines,
        };

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Manufacturing,
            AuditAction::Create,
            run_id,
            None,
            Some(audit::snapshot(&result)),
        )
        .await?;

        tx.commit().await?;

        if insufficient {
            tracing::warn!(%farm_id, %run_id, "run committed with insufficient stock");
        } else {
            tracing::info!(%farm_id, %run_id, "manufacturing run created");
        }
        Ok(result)
    }

    /// Edit a run. Prior deductions are reversed from the stored lines
    /// before recomputing and reapplying, so rounding never compounds.
    pub async fn update_run(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        run_id: Uuid,
        input: UpdateRunInput,
    ) -> AppResult<RunWithLines> {
        if let Some(multiplier) = input.multiplier {
            validate_multiplier(multiplier)
                .map_err(|msg| AppError::validation("multiplier", msg, "El multiplicador debe ser positivo"))?;
        }

        let mut tx = self.db.begin().await?;

        let before = fetch_run_for_update(&mut tx, farm_id, run_id).await?;
        if !parse_state(&before.state)?.can_delete() {
            return Err(AppError::precondition(
                "Manufacturing run is not active",
                "La fabricación no está activa",
            ));
        }

        let formula_changed = input
            .formula_id
            .map_or(false, |f| f != before.formula_id);
        let multiplier_changed = input
            .multiplier
            .map_or(false, |m| m != before.multiplier);

        // A date-only edit never touches deductions, stored lines, or costs;
        // only a formula or multiplier change triggers reverse-and-recompute.
        if !formula_changed && !multiplier_changed {
            if let Some(date) = input.manufacture_date {
                sqlx::query("UPDATE manufacturing_runs SET manufacture_date = $1 WHERE id = $2")
                    .bind(date)
                    .bind(run_id)
                    .execute(&mut *tx)
                    .await?;
            }

            let run = fetch_run_for_update(&mut tx, farm_id, run_id).await?;
            let lines = fetch_run_lines(&mut tx, run_id).await?;
            let result = RunWithLines { run, lines };

            audit::append(
                &mut tx,
                farm_id,
                user_id,
                TableFamily::Manufacturing,
                AuditAction::Update,
                run_id,
                Some(audit::snapshot(&before)),
                Some(audit::snapshot(&result)),
            )
            .await?;

            tx.commit().await?;
            return Ok(result);
        }

        let old_lines = fetch_run_lines(&mut tx, run_id).await?;
        reverse_run_lines(&mut tx, farm_id, &old_lines).await?;

        sqlx::query("DELETE FROM manufacturing_lines WHERE run_id = $1")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        let formula_id = input.formula_id.unwrap_or(before.formula_id);
        let multiplier = input.multiplier.unwrap_or(before.multiplier);
        let manufacture_date = input.manufacture_date.unwrap_or(before.manufacture_date);

        let (lines, run_cost, insufficient) =
            compute_run(&mut tx, farm_id, formula_id, multiplier).await?;

        for (material_id, consumed, unit_price, cost) in &lines {
            sqlx::query(
                r#"
                INSERT INTO manufacturing_lines (run_id, farm_id, material_id,
                                                 quantity_consumed_kg, unit_price, cost)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(run_id)
            .bind(farm_id)
            .bind(material_id)
            .bind(consumed)
            .bind(unit_price)
            .bind(cost)
            .execute(&mut *tx)
            .await?;

            inventory::apply_consumption(&mut tx, farm_id, *material_id, *consumed).await?;
        }

        sqlx::query(
            r#"
            UPDATE manufacturing_runs
            SET formula_id = $1, multiplier = $2, manufacture_date = $3,
                total_cost = $4, cost_per_kilo = $5, insufficient_stock = $6
            WHERE id = $7
            "#,
        )
        .bind(formula_id)
        .bind(multiplier)
        .bind(manufacture_date)
        .bind(run_cost.total_cost)
        .bind(run_cost.cost_per_kilo)
        .bind(insufficient)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        let run = fetch_run_for_update(&mut tx, farm_id, run_id).await?;
        let stored_lines = fetch_run_lines(&mut tx, run_id).await?;
        let result = RunWithLines {
            run,
            lines: stored_lines,
        };

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Manufacturing,
            AuditAction::Update,
            run_id,
            Some(audit::snapshot(&before)),
            Some(audit::snapshot(&result)),
        )
        .await?;

        tx.commit().await?;
        Ok(result)
    }

    /// Soft-delete a run, reversing its stored consumption deductions.
    pub async fn delete_run(&self, farm_id: Uuid, user_id: Uuid, run_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let run = fetch_run_for_update(&mut tx, farm_id, run_id).await?;
        if !parse_state(&run.state)?.can_delete() {
            return Err(AppError::precondition(
                "Manufacturing run is not active",
                "La fabricación no está activa",
            ));
        }

        let lines = fetch_run_lines(&mut tx, run_id).await?;
        reverse_run_lines(&mut tx, farm_id, &lines).await?;

        sqlx::query(
            r#"
            UPDATE manufacturing_runs
            SET state = 'deleted', deleted_at = now(), deleted_by = $1
            WHERE id = $2
            "#,
        )
        .bind(user_id)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Manufacturing,
            AuditAction::Delete,
            run_id,
            Some(audit::snapshot(&run)),
            None,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%farm_id, %run_id, "manufacturing run deleted");
        Ok(())
    }

    /// Restore a soft-deleted run, reapplying the deductions from its stored
    /// lines. The formula may have changed since; the stored numbers win.
    pub async fn restore_run(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        run_id: Uuid,
    ) -> AppResult<RunWithLines> {
        let mut tx = self.db.begin().await?;

        let run = fetch_run_for_update(&mut tx, farm_id, run_id).await?;
        if !parse_state(&run.state)?.can_restore() {
            return Err(AppError::precondition(
                "Manufacturing run cannot be restored from its current state",
                "La fabricación no puede restaurarse desde su estado actual",
            ));
        }

        let lines = fetch_run_lines(&mut tx, run_id).await?;
        reapply_run_lines(&mut tx, farm_id, &lines).await?;

        sqlx::query(
            r#"
            UPDATE manufacturing_runs
            SET state = 'active', deleted_at = NULL, deleted_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        let restored = fetch_run_for_update(&mut tx, farm_id, run_id).await?;
        let result = RunWithLines {
            run: restored,
            lines,
        };

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Manufacturing,
            AuditAction::Restore,
            run_id,
            Some(audit::snapshot(&run)),
            Some(audit::snapshot(&result)),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(%farm_id, %run_id, "manufacturing run restored");
        Ok(result)
    }

    /// Bulk-delete every run for the farm. Requires the exact confirmation
    /// phrase; runs are purged one at a time with a per-item outcome list.
    pub async fn bulk_delete(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        input: BulkDeleteInput,
    ) -> AppResult<BulkDeleteReport> {
        if !confirmation_matches(MANUFACTURING_BULK_DELETE_PHRASE, &input.confirmation_phrase) {
            return Err(AppError::validation(
                "confirmation_phrase",
                "Confirmation phrase does not match",
                "La frase de confirmación no coincide",
            ));
        }

        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM manufacturing_runs
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
            match self.purge_run(farm_id, user_id, *id).await {
                Ok(()) => {
                    deleted += 1;
                    outcomes.push(BulkItemOutcome {
                        record_id: *id,
                        success: true,
                        error: None,
                    });
                }
                Err(err) => {
                    tracing::error!(%farm_id, run_id = %id, "bulk delete item failed: {err}");
                    outcomes.push(BulkItemOutcome {
                        record_id: *id,
                        success: false,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        tracing::info!(%farm_id, requested = ids.len(), deleted, "manufacturing runs bulk-deleted");
        Ok(BulkDeleteReport {
            requested: ids.len(),
            deleted,
            outcomes,
        })
    }

    /// Purge one run: deductions are reversed only when the run is still
    /// active (a soft-deleted run was already reversed).
    async fn purge_run(&self, farm_id: Uuid, user_id: Uuid, run_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let run = fetch_run_for_update(&mut tx, farm_id, run_id).await?;
        if parse_state(&run.state)? == shared::RecordState::Active {
            let lines = fetch_run_lines(&mut tx, run_id).await?;
            reverse_run_lines(&mut tx, farm_id, &lines).await?;
        }

        sqlx::query(
            r#"
            UPDATE manufacturing_runs
            SET state = 'purged', deleted_at = COALESCE(deleted_at, now()),
                deleted_by = COALESCE(deleted_by, $1)
            WHERE id = $2
            "#,
        )
        .bind(user_id)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        audit::append(
            &mut tx,
            farm_id,
            user_id,
            TableFamily::Manufacturing,
            AuditAction::BulkDelete,
            run_id,
            Some(audit::snapshot(&run)),
            None,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Get a run with its stored lines
    pub async fn get_run(&self, farm_id: Uuid, run_id: Uuid) -> AppResult<RunWithLines> {
        let run = sqlx::query_as::<_, ManufacturingRun>(
            r#"
            SELECT id, farm_id, formula_id, multiplier, manufacture_date, total_cost,
                   cost_per_kilo, insufficient_stock, state, deleted_at, deleted_by,
                   created_at, created_by
            FROM manufacturing_runs
            WHERE id = $1 AND farm_id = $2 AND state <> 'purged'
            "#,
        )
        .bind(run_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Manufacturing run".to_string()))?;

        let lines = sqlx::query_as::<_, ManufacturingLine>(
            r#"
            SELECT id, run_id, material_id, quantity_consumed_kg, unit_price, cost
            FROM manufacturing_lines
            WHERE run_id = $1
            ORDER BY material_id
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.db)
        .await?;

        Ok(RunWithLines { run, lines })
    }

    /// List runs for the farm (purged records stay hidden)
    pub async fn list_runs(&self, farm_id: Uuid) -> AppResult<Vec<ManufacturingRun>> {
        let runs = sqlx::query_as::<_, ManufacturingRun>(
            r#"
            SELECT id, farm_id, formula_id, multiplier, manufacture_date, total_cost,
                   cost_per_kilo, insufficient_stock, state, deleted_at, deleted_by,
                   created_at, created_by
            FROM manufacturing_runs
            WHERE farm_id = $1 AND state <> 'purged'
            ORDER BY manufacture_date DESC, created_at DESC
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        Ok(runs)
    }
}
