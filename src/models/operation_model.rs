use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Estados del ciclo de vida de una operación bulk.
/// pending -> running -> {completed, failed, cancelled};
/// completed -> {rolled_back, rollback_failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
    RollbackFailed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
            OperationStatus::RolledBack => "rolled_back",
            OperationStatus::RollbackFailed => "rollback_failed",
        }
    }

    pub fn parse(s: &str) -> Option<OperationStatus> {
        match s {
            "pending" => Some(OperationStatus::Pending),
            "running" => Some(OperationStatus::Running),
            "completed" => Some(OperationStatus::Completed),
            "failed" => Some(OperationStatus::Failed),
            "cancelled" => Some(OperationStatus::Cancelled),
            "rolled_back" => Some(OperationStatus::RolledBack),
            "rollback_failed" => Some(OperationStatus::RollbackFailed),
            _ => None,
        }
    }

    /// Un estado terminal ya no avanza; el sweeper solo borra estos.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed
                | OperationStatus::Failed
                | OperationStatus::Cancelled
                | OperationStatus::RolledBack
                | OperationStatus::RollbackFailed
        )
    }
}

/// Error de un item individual, acumulado durante la ejecución.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub item_id: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub operation_type: String,
    pub operation_name: String,
    pub status: OperationStatus,
    pub owner: String,
    pub total_items: i64,
    pub processed_items: i64,
    pub progress_percentage: f64,
    pub items: Vec<String>,
    pub options: Map<String, Value>,
    pub errors: Vec<ItemError>,
    pub rollback_data: Map<String, Value>,
    pub can_rollback: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

/// Campos que fija el Submission Service al crear el record.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub operation_type: String,
    pub operation_name: String,
    pub items: Vec<String>,
    pub options: Map<String, Value>,
    pub owner: String,
}

/// Request para encolar una operación bulk
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitOperationRequest {
    pub operation_type: String,
    pub operation_name: String,
    pub items: Vec<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
    pub owner: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOperationResponse {
    pub operation_id: String,
    pub message: String,
}

/// Snapshot de progreso, pensado para polling frecuente.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub processed_items: i64,
    pub total_items: i64,
    pub progress_percentage: f64,
    pub status: OperationStatus,
}

/// Para listar operaciones con paginación
#[derive(Debug, Clone, Serialize)]
pub struct ListOperationsResponse {
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub items: Vec<OperationRecord>,
}

/// processed/total * 100, redondeado a 2 decimales. 0 si total == 0.
pub fn progress_pct(processed: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = processed as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}
