//! Formula snapshot store
//!
//! Feed formulas freeze each line's unit price the moment the line is added:
//! `unit_price_at_creation` is read from the material's current reference
//! price and never silently refreshed. The 1000 kg batch-weight target is
//! advisory; every read surface reports the signed deviation but nothing is
//! rejected for violating it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::pricing;
use shared::{costing, validate_code, validate_quantity};

/// Formula service for feed recipes and their snapshotted line prices
#[derive(Clone)]
pub struct FormulaService {
    db: PgPool,
}

/// Formula header with recomputed aggregates
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Formula {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub code: String,
    pub description: String,
    pub animal_id: Uuid,
    pub total_weight_kg: Decimal,
    pub total_cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Formula line with its frozen price
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FormulaLine {
    pub id: Uuid,
    pub formula_id: Uuid,
    pub material_id: Uuid,
    pub quantity_kg: Decimal,
    pub unit_price_at_creation: Decimal,
    pub partial_cost: Decimal,
}

/// Formula with lines and the advisory weight check
#[derive(Debug, Clone, Serialize)]
pub struct FormulaWithLines {
    #[serde(flatten)]
    pub formula: Formula,
    pub weight_deviation_kg: Decimal,
    pub within_weight_tolerance: bool,
    pub lines: Vec<FormulaLine>,
}

/// Input for creating a formula
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFormulaInput {
    pub code: String,
    pub description: String,
    pub animal_id: Uuid,
}

/// Input for adding a formula line
#[derive(Debug, Clone, Deserialize)]
pub struct AddFormulaLineInput {
    pub material_id: Uuid,
    pub quantity_kg: Decimal,
}

/// Input for updating a line's quantity
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateFormulaLineInput {
    pub quantity_kg: Decimal,
}

/// Recompute a formula's totals from its lines. The single recomputation
/// entry point shared by add, update, and remove.
async fn recompute_totals(conn: &mut PgConnection, formula_id: Uuid) -> AppResult<()> {
    let lines = sqlx::query_as::<_, (Decimal, Decimal)>(
        "SELECT quantity_kg, unit_price_at_creation FROM formula_lines WHERE formula_id = $1",
    )
    .bind(formula_id)
    .fetch_all(&mut *conn)
    .await?;

    let totals = costing::formula_totals(&lines);

    sqlx::query(
        r#"
        UPDATE formulas
        SET total_weight_kg = $1, total_cost = $2, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(totals.total_weight_kg)
    .bind(totals.total_cost)
    .bind(formula_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Lock the formula header row and return it.
async fn fetch_for_update(
    conn: &mut PgConnection,
    farm_id: Uuid,
    formula_id: Uuid,
) -> AppResult<Formula> {
    sqlx::query_as::<_, Formula>(
        r#"
        SELECT id, farm_id, code, description, animal_id, total_weight_kg, total_cost,
               created_at, updated_at
        FROM formulas
        WHERE id = $1 AND farm_id = $2
        FOR UPDATE
        "#,
    )
    .bind(formula_id)
    .bind(farm_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Formula".to_string()))
}

fn with_weight_check(formula: Formula, lines: Vec<FormulaLine>) -> FormulaWithLines {
    let deviation = costing::weight_deviation_kg(formula.total_weight_kg);
    let within = costing::within_weight_tolerance(formula.total_weight_kg);
    FormulaWithLines {
        formula,
        weight_deviation_kg: deviation,
        within_weight_tolerance: within,
        lines,
    }
}

impl FormulaService {
    /// Create a new FormulaService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a formula
    pub async fn create_formula(
        &self,
        farm_id: Uuid,
        input: CreateFormulaInput,
    ) -> AppResult<FormulaWithLines> {
        validate_code(&input.code)
            .map_err(|msg| AppError::validation("code", msg, "Código inválido"))?;
        if input.description.trim().is_empty() {
            return Err(AppError::validation(
                "description",
                "Description is required",
                "La descripción es obligatoria",
            ));
        }

        let animal_exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM animals WHERE id = $1 AND farm_id = $2)",
        )
        .bind(input.animal_id)
        .bind(farm_id)
        .fetch_one(&self.db)
        .await?;

        if !animal_exists {
            return Err(AppError::NotFound("Animal".to_string()));
        }

        let code_taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM formulas WHERE farm_id = $1 AND code = $2)",
        )
        .bind(farm_id)
        .bind(&input.code)
        .fetch_one(&self.db)
        .await?;

        if code_taken {
            return Err(AppError::DuplicateEntry("formula code".to_string()));
        }

        let formula = sqlx::query_as::<_, Formula>(
            r#"
            INSERT INTO formulas (farm_id, code, description, animal_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, farm_id, code, description, animal_id, total_weight_kg, total_cost,
                      created_at, updated_at
            "#,
        )
        .bind(farm_id)
        .bind(&input.code)
        .bind(&input.description)
        .bind(input.animal_id)
        .fetch_one(&self.db)
        .await?;

        Ok(with_weight_check(formula, Vec::new()))
    }

    /// Add a line, snapshotting the material's current reference price.
    pub async fn add_line(
        &self,
        farm_id: Uuid,
        formula_id: Uuid,
        input: AddFormulaLineInput,
    ) -> AppResult<FormulaWithLines> {
        validate_quantity(input.quantity_kg)
            .map_err(|msg| AppError::validation("quantity_kg", msg, "La cantidad debe ser positiva"))?;

        let mut tx = self.db.begin().await?;

        fetch_for_update(&mut tx, farm_id, formula_id).await?;

        let duplicate = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM formula_lines WHERE formula_id = $1 AND material_id = $2)",
        )
        .bind(formula_id)
        .bind(input.material_id)
        .fetch_one(&mut *tx)
        .await?;

        if duplicate {
            return Err(AppError::DuplicateEntry(
                "material in this formula".to_string(),
            ));
        }

        // Snapshot the price now; later reference-price changes never touch
        // this line.
        let unit_price = pricing::lock_material(&mut tx, farm_id, input.material_id).await?;
        let partial_cost = costing::line_subtotal(input.quantity_kg, unit_price);

        sqlx::query(
            r#"
            INSERT INTO formula_lines (formula_id, farm_id, material_id, quantity_kg,
                                       unit_price_at_creation, partial_cost)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(formula_id)
        .bind(farm_id)
        .bind(input.material_id)
        .bind(input.quantity_kg)
        .bind(unit_price)
        .bind(partial_cost)
        .execute(&mut *tx)
        .await?;

        recompute_totals(&mut tx, formula_id).await?;
        tx.commit().await?;

        self.get_formula(farm_id, formula_id).await
    }

    /// Update a line's quantity. The partial cost is recomputed with the
    /// existing snapshotted price; the price itself is never re-read.
    pub async fn update_line_quantity(
        &self,
        farm_id: Uuid,
        formula_id: Uuid,
        line_id: Uuid,
        input: UpdateFormulaLineInput,
    ) -> AppResult<FormulaWithLines> {
        validate_quantity(input.quantity_kg)
            .map_err(|msg| AppError::validation("quantity_kg", msg, "La cantidad debe ser positiva"))?;

        let mut tx = self.db.begin().await?;

        fetch_for_update(&mut tx, farm_id, formula_id).await?;

        let snapshot_price = sqlx::query_scalar::<_, Decimal>(
            "SELECT unit_price_at_creation FROM formula_lines WHERE id = $1 AND formula_id = $2 FOR UPDATE",
        )
        .bind(line_id)
        .bind(formula_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Formula line".to_string()))?;

        let partial_cost = costing::line_subtotal(input.quantity_kg, snapshot_price);

        sqlx::query(
            "UPDATE formula_lines SET quantity_kg = $1, partial_cost = $2 WHERE id = $3",
        )
        .bind(input.quantity_kg)
        .bind(partial_cost)
        .bind(line_id)
        .execute(&mut *tx)
        .await?;

        recompute_totals(&mut tx, formula_id).await?;
        tx.commit().await?;

        self.get_formula(farm_id, formula_id).await
    }

    /// Remove a line and recompute the formula totals
    pub async fn remove_line(
        &self,
        farm_id: Uuid,
        formula_id: Uuid,
        line_id: Uuid,
    ) -> AppResult<FormulaWithLines> {
        let mut tx = self.db.begin().await?;

        fetch_for_update(&mut tx, farm_id, formula_id).await?;

        let removed = sqlx::query("DELETE FROM formula_lines WHERE id = $1 AND formula_id = $2")
            .bind(line_id)
            .bind(formula_id)
            .execute(&mut *tx)
            .await?;

        if removed.rows_affected() == 0 {
            return Err(AppError::NotFound("Formula line".to_string()));
        }

        recompute_totals(&mut tx, formula_id).await?;
        tx.commit().await?;

        self.get_formula(farm_id, formula_id).await
    }

    /// Get a formula with its lines and the advisory weight check
    pub async fn get_formula(
        &self,
        farm_id: Uuid,
        formula_id: Uuid,
    ) -> AppResult<FormulaWithLines> {
        let formula = sqlx::query_as::<_, Formula>(
            r#"
            SELECT id, farm_id, code, description, animal_id, total_weight_kg, total_cost,
                   created_at, updated_at
            FROM formulas
            WHERE id = $1 AND farm_id = $2
            "#,
        )
        .bind(formula_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Formula".to_string()))?;

        let lines = sqlx::query_as::<_, FormulaLine>(
            r#"
            SELECT id, formula_id, material_id, quantity_kg, unit_price_at_creation, partial_cost
            FROM formula_lines
            WHERE formula_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(formula_id)
        .fetch_all(&self.db)
        .await?;

        Ok(with_weight_check(formula, lines))
    }

    /// List formulas for the farm with their weight checks
    pub async fn list_formulas(&self, farm_id: Uuid) -> AppResult<Vec<FormulaWithLines>> {
        let formulas = sqlx::query_as::<_, Formula>(
            r#"
            SELECT id, farm_id, code, description, animal_id, total_weight_kg, total_cost,
                   created_at, updated_at
            FROM formulas
            WHERE farm_id = $1
            ORDER BY code
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.db)
        .await?;

        let mut result = Vec::with_capacity(formulas.len());
        for formula in formulas {
            let lines = sqlx::query_as::<_, FormulaLine>(
                r#"
                SELECT id, formula_id, material_id, quantity_kg, unit_price_at_creation, partial_cost
                FROM formula_lines
                WHERE formula_id = $1
                ORDER BY created_at, id
                "#,
            )
            .bind(formula.id)
            .fetch_all(&self.db)
            .await?;
            result.push(with_weight_check(formula, lines));
        }

        Ok(result)
    }
}
