//! services/executor_service.rs
//! El loop central: drena la lista de items de un job, invoca handlers,
//! persiste progreso item a item y respeta la cancelación cooperativa.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Map;

use crate::config::engine_config::EngineConfig;
use crate::models::operation_model::{progress_pct, ItemError, OperationStatus};
use crate::services::handler_registry::HandlerRegistry;
use crate::services::operation_store::OperationStore;

#[derive(Clone)]
pub struct ExecutorService {
    store: OperationStore,
    registry: HandlerRegistry,
    config: EngineConfig,
}

impl ExecutorService {
    pub fn new(store: OperationStore, registry: HandlerRegistry, config: EngineConfig) -> Self {
        ExecutorService {
            store,
            registry,
            config,
        }
    }

    /// Punto de entrada del task spawneado por la submission. Nunca
    /// propaga error hacia arriba: una falla de sistema marca el job
    /// como failed con un error sintético y el task muere tranquilo.
    pub async fn execute(&self, op_id: &str) {
        match self.run(op_id).await {
            Ok(_) => {}
            Err(e) => {
                log::error!("(execute) Falla de sistema en job {}: {:?}", op_id, e);
                if let Err(e2) = self.store.mark_failed(op_id, &format!("{:?}", e)).await {
                    log::error!(
                        "(execute) No se pudo marcar failed el job {}: {:?}",
                        op_id,
                        e2
                    );
                }
            }
        }
    }

    async fn run(&self, op_id: &str) -> Result<()> {
        // 1) Reclamar el record. Si otro executor ganó la carrera (o el job
        // fue cancelado en pending), esto es un no-op.
        if !self.store.claim_pending(op_id).await? {
            log::info!("(run) Job {} ya no está pending, nada que hacer", op_id);
            return Ok(());
        }

        let record = self
            .store
            .get_operation(op_id)
            .await?
            .ok_or_else(|| anyhow!("Job {} desapareció después del claim", op_id))?;

        let handler = self
            .registry
            .resolve(&record.operation_type, &record.operation_name)
            .ok_or_else(|| {
                // Validado en la submission; solo pasa si el registry cambió
                // entre submit y ejecución.
                anyhow!(
                    "Handler {}/{} ya no está registrado",
                    record.operation_type,
                    record.operation_name
                )
            })?;

        log::info!(
            "(run) Job {} running: {}/{} sobre {} items",
            op_id,
            record.operation_type,
            record.operation_name,
            record.total_items
        );

        let mut processed: i64 = 0;
        let mut errors: Vec<ItemError> = Vec::new();
        let mut rollback_data: Map<String, serde_json::Value> = Map::new();

        // 2) Loop principal, estrictamente en orden de lista.
        for item_id in &record.items {
            // Chequeo de cancelación antes de cada item. Cooperativo: como
            // mucho un item más termina después del pedido de cancel.
            let status = self
                .store
                .get_status(op_id)
                .await?
                .ok_or_else(|| anyhow!("Job {} desapareció en pleno loop", op_id))?;
            if status == OperationStatus::Cancelled {
                log::info!(
                    "(run) Job {} cancelado tras {} items procesados",
                    op_id,
                    processed
                );
                return Ok(());
            }

            match handler.apply(item_id, &record.options).await {
                Ok(snapshot) => {
                    rollback_data.insert(item_id.clone(), snapshot);
                }
                Err(e) => {
                    log::error!("(run) Job {} item '{}' falló: {:?}", op_id, item_id, e);
                    errors.push(ItemError {
                        item_id: item_id.clone(),
                        error_message: format!("{:#}", e),
                    });
                }
            }

            // Los items fallidos también cuentan como procesados.
            processed += 1;
            let pct = progress_pct(processed, record.total_items);
            self.store
                .record_item_result(op_id, processed, pct, &errors, &rollback_data)
                .await
                .context("Fallo persistiendo progreso")?;

            // Pausa acotada para no acaparar el storage con un job grande.
            if self.config.item_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.item_delay_ms)).await;
            }
        }

        // 3) Terminación: completed solo si no hubo ningún error de item.
        let final_status = if errors.is_empty() {
            OperationStatus::Completed
        } else {
            OperationStatus::Failed
        };
        let can_rollback = final_status == OperationStatus::Completed && !rollback_data.is_empty();

        // Si un cancel llegó después del último chequeo, la guarda del
        // finalize no matchea y el record queda cancelled. Correcto.
        let finalized = self.store.finalize(op_id, final_status, can_rollback).await?;
        if finalized {
            log::info!(
                "(run) Job {} terminado: status={}, {}/{} items, {} errores",
                op_id,
                final_status.as_str(),
                processed,
                record.total_items,
                errors.len()
            );
        } else {
            log::info!("(run) Job {} fue cancelado sobre el final", op_id);
        }

        Ok(())
    }
}
