//! services/submission_service.rs
//! Valida la request, crea el Operation Record y dispara la ejecución
//! en background. Este camino nunca itera items: responde enseguida.

use crate::errors::EngineError;
use crate::models::operation_model::{NewOperation, SubmitOperationRequest};
use crate::services::executor_service::ExecutorService;
use crate::services::handler_registry::HandlerRegistry;
use crate::services::operation_store::OperationStore;

#[derive(Clone)]
pub struct SubmissionService {
    store: OperationStore,
    registry: HandlerRegistry,
    executor: ExecutorService,
}

impl SubmissionService {
    pub fn new(store: OperationStore, registry: HandlerRegistry, executor: ExecutorService) -> Self {
        SubmissionService {
            store,
            registry,
            executor,
        }
    }

    /// Devuelve el operation_id, o un ValidationError sin crear ningún record.
    pub async fn submit(&self, req: SubmitOperationRequest) -> Result<String, EngineError> {
        // Un par (type, name) desconocido es error de validación, nunca
        // un error por item.
        let handler = self
            .registry
            .resolve(&req.operation_type, &req.operation_name)
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "unknown operation: {}/{}",
                    req.operation_type, req.operation_name
                ))
            })?;

        if req.items.is_empty() {
            return Err(EngineError::Validation("items must not be empty".into()));
        }

        for key in handler.required_options() {
            if !req.options.contains_key(key) {
                return Err(EngineError::Validation(format!(
                    "missing required option '{}' for {}/{}",
                    key, req.operation_type, req.operation_name
                )));
            }
        }

        let op_id = self
            .store
            .create_operation(NewOperation {
                operation_type: req.operation_type,
                operation_name: req.operation_name,
                items: req.items,
                options: req.options,
                owner: req.owner,
            })
            .await?;

        // Fire-and-forget: la ejecución vive fuera del request path.
        let executor = self.executor.clone();
        let spawn_id = op_id.clone();
        tokio::spawn(async move {
            executor.execute(&spawn_id).await;
        });

        log::info!("(submit) Job {} encolado", op_id);
        Ok(op_id)
    }
}
