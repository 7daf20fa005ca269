//! Append-only audit log
//!
//! Every mutating engine operation appends a before/after record inside its
//! own transaction, so the audit entry and the state change land together or
//! not at all.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::{AuditAction, TableFamily};

/// Audit service for querying recorded state transitions
#[derive(Clone)]
pub struct AuditService {
    db: PgPool,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub farm_id: Uuid,
    pub family: String,
    pub action: String,
    pub record_id: Uuid,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Query filters for the audit log
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    pub family: Option<String>,
    pub action: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// Serialize a record into an audit payload. These types serialize
/// infallibly; a failure degrades to a null payload rather than aborting the
/// surrounding transaction.
pub(crate) fn snapshot<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Append an entry within the caller's transaction.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn append(
    conn: &mut PgConnection,
    farm_id: Uuid,
    user_id: Uuid,
    family: TableFamily,
    action: AuditAction,
    record_id: Uuid,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (farm_id, family, action, record_id, before_state, after_state, user_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(farm_id)
    .bind(family.as_str())
    .bind(action.as_str())
    .bind(record_id)
    .bind(before_state)
    .bind(after_state)
    .bind(user_id)
    .execute(conn)
    .await?;

    Ok(())
}

impl AuditService {
    /// Create a new AuditService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Query the audit log with optional family/action/date filters
    pub async fn query(&self, farm_id: Uuid, filters: AuditQuery) -> AppResult<Vec<AuditEntry>> {
        // Reject unknown filter values before touching the store
        if let Some(family) = &filters.family {
            family
                .parse::<TableFamily>()
                .map_err(AppError::ValidationError)?;
        }
        if let Some(action) = &filters.action {
            action
                .parse::<AuditAction>()
                .map_err(AppError::ValidationError)?;
        }

        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, farm_id, family, action, record_id, before_state, after_state,
                   user_id, created_at
            FROM audit_log
            WHERE farm_id = $1
              AND ($2::text IS NULL OR family = $2)
              AND ($3::text IS NULL OR action = $3)
              AND ($4::date IS NULL OR created_at::date >= $4)
              AND ($5::date IS NULL OR created_at::date <= $5)
            ORDER BY created_at DESC, id DESC
            LIMIT 1000
            "#,
        )
        .bind(farm_id)
        .bind(&filters.family)
        .bind(&filters.action)
        .bind(filters.from)
        .bind(filters.to)
        .fetch_all(&self.db)
        .await?;

        Ok(entries)
    }
}
