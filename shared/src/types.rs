//! Common types used across the platform

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a soft-deletable record.
///
/// `Deleted` is reachable from `Active` and restorable; `Purged` is the
/// terminal state reached only through a bulk delete and offers no restore
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Active,
    Deleted,
    Purged,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Active => "active",
            RecordState::Deleted => "deleted",
            RecordState::Purged => "purged",
        }
    }

    /// Whether a single soft delete is allowed from this state.
    pub fn can_delete(&self) -> bool {
        matches!(self, RecordState::Active)
    }

    /// Whether a restore is allowed from this state.
    pub fn can_restore(&self) -> bool {
        matches!(self, RecordState::Deleted)
    }
}

impl FromStr for RecordState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordState::Active),
            "deleted" => Ok(RecordState::Deleted),
            "purged" => Ok(RecordState::Purged),
            other => Err(format!("unknown record state: {}", other)),
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Table family covered by archives and audit entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableFamily {
    Purchases,
    Manufacturing,
    Inventory,
}

impl TableFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableFamily::Purchases => "purchases",
            TableFamily::Manufacturing => "manufacturing",
            TableFamily::Inventory => "inventory",
        }
    }
}

impl FromStr for TableFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchases" => Ok(TableFamily::Purchases),
            "manufacturing" => Ok(TableFamily::Manufacturing),
            "inventory" => Ok(TableFamily::Inventory),
            other => Err(format!("unknown table family: {}", other)),
        }
    }
}

impl fmt::Display for TableFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Restore,
    BulkDelete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Restore => "restore",
            AuditAction::BulkDelete => "bulk_delete",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "restore" => Ok(AuditAction::Restore),
            "bulk_delete" => Ok(AuditAction::BulkDelete),
            other => Err(format!("unknown audit action: {}", other)),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of ledger effect being reversed or reapplied by the soft-delete
/// coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A purchase added stock; reversing it subtracts.
    Purchase,
    /// A manufacturing run consumed stock; reversing it adds back.
    Manufacturing,
}

/// Outcome of one record within a bulk operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemOutcome {
    pub record_id: uuid::Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-item report for a bulk delete. A mid-batch failure leaves the
/// committed prefix in place, so the list always reflects what actually
/// happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteReport {
    pub requested: usize,
    pub deleted: usize,
    pub outcomes: Vec<BulkItemOutcome>,
}
