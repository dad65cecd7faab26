//! services/rollback_service.rs
//! Transacción compensatoria: reaplica los snapshots capturados durante
//! una operación completed para dejar los items como estaban antes.

use crate::errors::EngineError;
use crate::models::operation_model::{ItemError, OperationStatus};
use crate::services::handler_registry::HandlerRegistry;
use crate::services::operation_store::OperationStore;

#[derive(Clone)]
pub struct RollbackService {
    store: OperationStore,
    registry: HandlerRegistry,
}

impl RollbackService {
    pub fn new(store: OperationStore, registry: HandlerRegistry) -> Self {
        RollbackService { store, registry }
    }

    /// Single-shot: un record ya rolled_back / rollback_failed (o con
    /// cualquier otro status que no sea completed) se rechaza sin invocar
    /// ningún restore.
    pub async fn rollback(&self, op_id: &str) -> Result<(), EngineError> {
        let record = self
            .store
            .get_operation(op_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(op_id.to_string()))?;

        if record.status != OperationStatus::Completed || !record.can_rollback {
            return Err(EngineError::Conflict(format!(
                "operation {} cannot be rolled back (status={}, can_rollback={})",
                op_id,
                record.status.as_str(),
                record.can_rollback
            )));
        }

        // Gate atómico: si dos rollbacks llegan a la vez, uno solo pasa.
        if !self.store.claim_rollback(op_id).await? {
            return Err(EngineError::Conflict(format!(
                "operation {} was already claimed for rollback",
                op_id
            )));
        }

        let handler = self
            .registry
            .resolve(&record.operation_type, &record.operation_name);

        let mut errors = record.errors.clone();
        let mut restore_failures = 0usize;

        // Restauramos en el orden original de items, no en el orden del map.
        for item_id in &record.items {
            let snapshot = match record.rollback_data.get(item_id) {
                Some(s) => s,
                None => continue,
            };

            let result = match &handler {
                Some(h) => h.restore(item_id, snapshot).await,
                None => Err(anyhow::anyhow!(
                    "handler {}/{} no longer registered",
                    record.operation_type,
                    record.operation_name
                )),
            };

            if let Err(e) = result {
                log::error!(
                    "(rollback) Job {} item '{}' no se pudo restaurar: {:?}",
                    op_id,
                    item_id,
                    e
                );
                restore_failures += 1;
                errors.push(ItemError {
                    item_id: item_id.clone(),
                    error_message: format!("rollback: {:#}", e),
                });
            }
        }

        // Rollback parcial queda parcial: no se reintenta solo.
        let final_status = if restore_failures == 0 {
            OperationStatus::RolledBack
        } else {
            OperationStatus::RollbackFailed
        };

        self.store
            .finish_rollback(op_id, final_status, &errors)
            .await?;

        log::info!(
            "(rollback) Job {} -> {} ({} snapshots, {} fallas de restore)",
            op_id,
            final_status.as_str(),
            record.rollback_data.len(),
            restore_failures
        );

        Ok(())
    }
}
