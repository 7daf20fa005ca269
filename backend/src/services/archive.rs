//! Archive snapshots
//!
//! A snapshot captures the active rows of one table family as a JSONB
//! payload, taken inside a single transaction so the rows are mutually
//! consistent. Snapshots are independent documents: deleting or restoring
//! live records never touches them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::TableFamily;

/// Archive service for point-in-time snapshots
#[derive(Clone)]
pub struct ArchiveService {
    db: PgPool,
}

/// Snapshot header without the payload, for listings
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SnapshotSummary {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub family: String,
    pub description: String,
    pub row_count: i64,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

/// Full snapshot including the captured rows
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Snapshot {
    pub id: Uuid,
    pub farm_id: Uuid,
    pub family: String,
    pub description: String,
    pub row_count: i64,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

/// Input for creating a snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSnapshotInput {
    pub family: String,
    pub description: String,
}

/// Capture the family's active rows as a JSON array. Aggregation happens in
/// SQL so the payload reflects one consistent read.
async fn capture_family(
    conn: &mut PgConnection,
    farm_id: Uuid,
    family: TableFamily,
) -> AppResult<(Value, i64)> {
    let sql = match family {
        TableFamily::Purchases => {
            r#"
            SELECT COALESCE(jsonb_agg(row), '[]'::jsonb), COUNT(*)
            FROM (
                SELECT to_jsonb(p) || jsonb_build_object(
                           'lines',
                           (SELECT COALESCE(jsonb_agg(to_jsonb(pl)), '[]'::jsonb)
                            FROM purchase_lines pl
                            WHERE pl.purchase_id = p.id AND pl.state = 'active')
                       ) AS row
                FROM purchases p
                WHERE p.farm_id = $1 AND p.state = 'active'
                ORDER BY p.purchase_date, p.created_at
            ) rows
            "#
        }
        TableFamily::Manufacturing => {
            r#"
            SELECT COALESCE(jsonb_agg(row), '[]'::jsonb), COUNT(*)
            FROM (
                SELECT to_jsonb(r) || jsonb_build_object(
                           'lines',
                           (SELECT COALESCE(jsonb_agg(to_jsonb(ml)), '[]'::jsonb)
                            FROM manufacturing_lines ml
                            WHERE ml.run_id = r.id)
                       ) AS row
                FROM manufacturing_runs r
                WHERE r.farm_id = $1 AND r.state = 'active'
                ORDER BY r.manufacture_date, r.created_at
            ) rows
            "#
        }
        TableFamily::Inventory => {
            r#"
            SELECT COALESCE(jsonb_agg(row), '[]'::jsonb), COUNT(*)
            FROM (
                SELECT to_jsonb(ir) || jsonb_build_object(
                           'material_code', rm.code,
                           'material_name', rm.name
                       ) AS row
                FROM inventory_records ir
                JOIN raw_materials rm ON rm.id = ir.material_id
                WHERE ir.farm_id = $1
                ORDER BY rm.code
            ) rows
            "#
        }
    };

    let (payload, count) = sqlx::query_as::<_, (Value, i64)>(sql)
        .bind(farm_id)
        .fetch_one(conn)
        .await?;

    Ok((payload, count))
}

impl ArchiveService {
    /// Create a new ArchiveService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Snapshot the active rows of one family
    pub async fn create_snapshot(
        &self,
        farm_id: Uuid,
        user_id: Uuid,
        input: CreateSnapshotInput,
    ) -> AppResult<Snapshot> {
        let family: TableFamily = input.family.parse().map_err(|_| {
            AppError::validation(
                "family",
                "Unknown table family",
                "Familia de tabla desconocida",
            )
        })?;
        if input.description.trim().is_empty() {
            return Err(AppError::validation(
                "description",
                "Description is required",
                "La descripción es obligatoria",
            ));
        }

        let mut tx = self.db.begin().await?;

        let (payload, row_count) = capture_family(&mut tx, farm_id, family).await?;

        let snapshot = sqlx::query_as::<_, Snapshot>(
            r#"
            INSERT INTO archive_snapshots (farm_id, family, description, row_count, payload, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, farm_id, family, description, row_count, payload, created_at, created_by
            "#,
        )
        .bind(farm_id)
        .bind(family.as_str())
        .bind(input.description.trim())
        .bind(row_count)
        .bind(&payload)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(%farm_id, family = family.as_str(), row_count, "archive snapshot created");
        Ok(snapshot)
    }

    /// Get a snapshot with its payload
    pub async fn get_snapshot(&self, farm_id: Uuid, snapshot_id: Uuid) -> AppResult<Snapshot> {
        sqlx::query_as::<_, Snapshot>(
            r#"
            SELECT id, farm_id, family, description, row_count, payload, created_at, created_by
            FROM archive_snapshots
            WHERE id = $1 AND farm_id = $2
            "#,
        )
        .bind(snapshot_id)
        .bind(farm_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Archive snapshot".to_string()))
    }

    /// List snapshot headers, newest first, optionally filtered by family
    pub async fn list_snapshots(
        &self,
        farm_id: Uuid,
        family: Option<String>,
    ) -> AppResult<Vec<SnapshotSummary>> {
        let family = match family {
            Some(raw) => Some(
                raw.parse::<TableFamily>()
                    .map_err(|_| {
                        AppError::validation(
                            "family",
                            "Unknown table family",
                            "Familia de tabla desconocida",
                        )
                    })?
                    .as_str()
                    .to_string(),
            ),
            None => None,
        };

        let snapshots = sqlx::query_as::<_, SnapshotSummary>(
            r#"
            SELECT id, farm_id, family, description, row_count, created_at, created_by
            FROM archive_snapshots
            WHERE farm_id = $1 AND ($2::text IS NULL OR family = $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(farm_id)
        .bind(family)
        .fetch_all(&self.db)
        .await?;

        Ok(snapshots)
    }

    /// Delete a snapshot. Snapshots are plain documents, so this is a hard
    /// delete with no effect on live records.
    pub async fn delete_snapshot(&self, farm_id: Uuid, snapshot_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM archive_snapshots WHERE id = $1 AND farm_id = $2")
            .bind(snapshot_id)
            .bind(farm_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Archive snapshot".to_string()));
        }

        tracing::info!(%farm_id, %snapshot_id, "archive snapshot deleted");
        Ok(())
    }
}
