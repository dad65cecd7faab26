//! services/cleanup_service.rs
//! Sweeper de retención: borra records terminales viejos en un timer.
//! Un record running colgado NO se borra; eso es señal de monitoreo.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use crate::config::engine_config::EngineConfig;
use crate::services::operation_store::OperationStore;

#[derive(Clone)]
pub struct CleanupService {
    store: OperationStore,
    config: EngineConfig,
}

impl CleanupService {
    pub fn new(store: OperationStore, config: EngineConfig) -> Self {
        CleanupService { store, config }
    }

    /// Una pasada: borra todo lo terminal más viejo que la ventana de
    /// retención. Devuelve cuántos records se fueron.
    pub async fn sweep_once(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        let deleted = self.store.delete_expired(cutoff).await?;
        if deleted > 0 {
            log::info!(
                "(sweep_once) {} operations terminales borradas (cutoff={})",
                deleted,
                cutoff.to_rfc3339()
            );
        }
        Ok(deleted)
    }

    /// Loop de background, mismo patrón que un task periódico spawneado
    /// desde main.
    pub fn spawn(self) {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.sweep_once().await {
                    log::error!("(spawn) Error en sweep de retención: {:?}", e);
                }
                tokio::time::sleep(Duration::from_secs(self.config.sweep_interval_secs)).await;
            }
        });
    }
}
