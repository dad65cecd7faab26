//! tests/engine_tests.rs
//! Escenarios end-to-end del engine sobre SQLite en memoria.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use actix_rt::test;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};

    use crate::config::engine_config::EngineConfig;
    use crate::errors::EngineError;
    use crate::models::operation_model::{
        progress_pct, NewOperation, OperationStatus, SubmitOperationRequest,
    };
    use crate::services::executor_service::ExecutorService;
    use crate::services::handler_registry::{HandlerRegistry, ItemHandler};
    use crate::services::operation_store::OperationStore;
    use crate::services::rollback_service::RollbackService;
    use crate::services::submission_service::SubmissionService;
    use crate::services::vanity_code_service::register_vanity_code_handlers;

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    async fn test_pool() -> Pool<Sqlite> {
        // max_connections(1): con "sqlite::memory:" cada conexión sería
        // una base distinta.
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory sqlite")
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            item_delay_ms: 0,
            retention_days: 30,
            sweep_interval_secs: 3600,
        }
    }

    struct Engine {
        store: OperationStore,
        registry: HandlerRegistry,
        executor: ExecutorService,
        submission: SubmissionService,
        rollback: RollbackService,
    }

    async fn build_engine() -> Engine {
        let pool = test_pool().await;
        let store = OperationStore::new(pool);
        store.run_migrations().await.expect("migrations failed");

        let registry = HandlerRegistry::new();
        let executor = ExecutorService::new(store.clone(), registry.clone(), test_config());
        let submission =
            SubmissionService::new(store.clone(), registry.clone(), executor.clone());
        let rollback = RollbackService::new(store.clone(), registry.clone());

        Engine {
            store,
            registry,
            executor,
            submission,
            rollback,
        }
    }

    /// Handler de juguete: registra cada apply/restore y puede fallar en
    /// items elegidos.
    #[derive(Default)]
    struct WidgetState {
        applied: Vec<String>,
        restored: Vec<(String, Value)>,
    }

    struct WidgetHandler {
        state: Arc<Mutex<WidgetState>>,
        fail_items: Vec<String>,
        required: Vec<&'static str>,
    }

    impl WidgetHandler {
        fn new(state: Arc<Mutex<WidgetState>>) -> Self {
            WidgetHandler {
                state,
                fail_items: vec![],
                required: vec![],
            }
        }
    }

    #[async_trait]
    impl ItemHandler for WidgetHandler {
        async fn apply(&self, item_id: &str, _options: &Map<String, Value>) -> Result<Value> {
            if self.fail_items.iter().any(|i| i == item_id) {
                return Err(anyhow!("widget '{}' exploded", item_id));
            }
            self.state
                .lock()
                .unwrap()
                .applied
                .push(item_id.to_string());
            Ok(json!({ "item": item_id, "prev_status": "inactive" }))
        }

        async fn restore(&self, item_id: &str, snapshot: &Value) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .restored
                .push((item_id.to_string(), snapshot.clone()));
            Ok(())
        }

        fn required_options(&self) -> Vec<&'static str> {
            self.required.clone()
        }
    }

    /// Handler que pide la cancelación del propio job al llegar al item N.
    struct CancellingHandler {
        store: OperationStore,
        op_id: Arc<Mutex<String>>,
        cancel_on_call: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ItemHandler for CancellingHandler {
        async fn apply(&self, item_id: &str, _options: &Map<String, Value>) -> Result<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.cancel_on_call {
                let op_id = self.op_id.lock().unwrap().clone();
                self.store
                    .request_cancel(&op_id)
                    .await
                    .expect("cancel request failed");
            }
            Ok(json!({ "item": item_id }))
        }

        async fn restore(&self, _item_id: &str, _snapshot: &Value) -> Result<()> {
            Ok(())
        }
    }

    fn submit_req(items: Vec<&str>) -> SubmitOperationRequest {
        SubmitOperationRequest {
            operation_type: "widget".to_string(),
            operation_name: "activate".to_string(),
            items: items.into_iter().map(String::from).collect(),
            options: Map::new(),
            owner: "admin@test".to_string(),
        }
    }

    async fn wait_terminal(store: &OperationStore, op_id: &str) -> OperationStatus {
        for _ in 0..500 {
            if let Some(status) = store.get_status(op_id).await.unwrap() {
                if status.is_terminal() {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("operation {} never reached a terminal state", op_id);
    }

    // ------------------------------------------------------------------
    // Progreso
    // ------------------------------------------------------------------

    #[test]
    async fn test_progress_pct_rounding() {
        assert_eq!(progress_pct(0, 0), 0.0);
        assert_eq!(progress_pct(0, 3), 0.0);
        assert_eq!(progress_pct(1, 3), 33.33);
        assert_eq!(progress_pct(2, 3), 66.67);
        assert_eq!(progress_pct(3, 3), 100.0);
        assert_eq!(progress_pct(1, 8), 12.5);
    }

    // ------------------------------------------------------------------
    // Escenario A: todo sale bien
    // ------------------------------------------------------------------

    #[test]
    async fn test_all_items_succeed() {
        let engine = build_engine().await;
        let state = Arc::new(Mutex::new(WidgetState::default()));
        engine.registry.register(
            "widget",
            "activate",
            Arc::new(WidgetHandler::new(state.clone())),
        );

        let op_id = engine
            .submission
            .submit(submit_req(vec!["1", "2", "3"]))
            .await
            .expect("submit failed");

        let status = wait_terminal(&engine.store, &op_id).await;
        assert_eq!(status, OperationStatus::Completed);

        let record = engine.store.get_operation(&op_id).await.unwrap().unwrap();
        assert_eq!(record.processed_items, 3);
        assert_eq!(record.progress_percentage, 100.0);
        assert!(record.errors.is_empty());
        assert!(record.can_rollback);
        assert_eq!(record.rollback_data.len(), 3);
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert!(record.rolled_back_at.is_none());

        assert_eq!(state.lock().unwrap().applied, vec!["1", "2", "3"]);

        // El Progress Reporter refleja el estado final.
        let progress = engine.store.get_progress(&op_id).await.unwrap().unwrap();
        assert_eq!(progress.processed_items, 3);
        assert_eq!(progress.total_items, 3);
        assert_eq!(progress.progress_percentage, 100.0);
        assert_eq!(progress.status, OperationStatus::Completed);
    }

    // ------------------------------------------------------------------
    // Escenario B: un item falla, el job sigue hasta el final
    // ------------------------------------------------------------------

    #[test]
    async fn test_failed_item_does_not_abort_job() {
        let engine = build_engine().await;
        let state = Arc::new(Mutex::new(WidgetState::default()));
        let mut handler = WidgetHandler::new(state.clone());
        handler.fail_items = vec!["2".to_string()];
        engine.registry.register("widget", "activate", Arc::new(handler));

        let op_id = engine
            .submission
            .submit(submit_req(vec!["1", "2", "3"]))
            .await
            .expect("submit failed");

        let status = wait_terminal(&engine.store, &op_id).await;
        assert_eq!(status, OperationStatus::Failed);

        let record = engine.store.get_operation(&op_id).await.unwrap().unwrap();
        // El item fallido cuenta como procesado igual.
        assert_eq!(record.processed_items, 3);
        assert_eq!(record.errors.len(), 1);
        assert_eq!(record.errors[0].item_id, "2");
        assert!(!record.can_rollback);
        // Sin snapshot para el item fallido.
        assert_eq!(record.rollback_data.len(), 2);
        assert!(record.rollback_data.contains_key("1"));
        assert!(record.rollback_data.contains_key("3"));
        assert_eq!(state.lock().unwrap().applied, vec!["1", "3"]);
    }

    // ------------------------------------------------------------------
    // Escenario C: cancelación cooperativa a mitad del loop
    // ------------------------------------------------------------------

    #[test]
    async fn test_cancel_mid_run_stops_at_next_checkpoint() {
        let engine = build_engine().await;
        let op_id_cell = Arc::new(Mutex::new(String::new()));
        let handler = Arc::new(CancellingHandler {
            store: engine.store.clone(),
            op_id: op_id_cell.clone(),
            // El cancel llega al empezar el item 11: los primeros 10 ya
            // quedaron procesados y el 11 todavía puede terminar.
            cancel_on_call: 11,
            calls: AtomicUsize::new(0),
        });
        engine.registry.register("widget", "activate", handler.clone());

        let items: Vec<String> = (1..=100).map(|i| i.to_string()).collect();
        let op_id = engine
            .store
            .create_operation(NewOperation {
                operation_type: "widget".to_string(),
                operation_name: "activate".to_string(),
                items,
                options: Map::new(),
                owner: "admin@test".to_string(),
            })
            .await
            .unwrap();
        *op_id_cell.lock().unwrap() = op_id.clone();

        engine.executor.execute(&op_id).await;

        let record = engine.store.get_operation(&op_id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Cancelled);
        // Contadores persistidos solo mientras el record seguía running.
        assert!(record.processed_items >= 10 && record.processed_items <= 11);
        assert!(!record.can_rollback);
        // Nada más allá del item en vuelo se tocó.
        assert_eq!(handler.calls.load(Ordering::SeqCst), 11);
        assert!(record.completed_at.is_some());
    }

    #[test]
    async fn test_cancel_before_start_runs_no_handler() {
        let engine = build_engine().await;
        let state = Arc::new(Mutex::new(WidgetState::default()));
        engine.registry.register(
            "widget",
            "activate",
            Arc::new(WidgetHandler::new(state.clone())),
        );

        let op_id = engine
            .store
            .create_operation(NewOperation {
                operation_type: "widget".to_string(),
                operation_name: "activate".to_string(),
                items: vec!["1".to_string(), "2".to_string()],
                options: Map::new(),
                owner: "admin@test".to_string(),
            })
            .await
            .unwrap();

        assert!(engine.store.request_cancel(&op_id).await.unwrap());

        // El executor pierde el claim y no toca nada.
        engine.executor.execute(&op_id).await;

        let record = engine.store.get_operation(&op_id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Cancelled);
        assert_eq!(record.processed_items, 0);
        assert!(record.errors.is_empty());
        assert!(record.rollback_data.is_empty());
        assert!(state.lock().unwrap().applied.is_empty());
    }

    // ------------------------------------------------------------------
    // Escenario D: rollback de un job completed
    // ------------------------------------------------------------------

    #[test]
    async fn test_rollback_restores_snapshots_in_item_order() {
        let engine = build_engine().await;
        let state = Arc::new(Mutex::new(WidgetState::default()));
        engine.registry.register(
            "widget",
            "activate",
            Arc::new(WidgetHandler::new(state.clone())),
        );

        let op_id = engine
            .submission
            .submit(submit_req(vec!["1", "2", "3"]))
            .await
            .unwrap();
        assert_eq!(
            wait_terminal(&engine.store, &op_id).await,
            OperationStatus::Completed
        );

        engine.rollback.rollback(&op_id).await.expect("rollback failed");

        let record = engine.store.get_operation(&op_id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::RolledBack);
        assert!(!record.can_rollback);
        assert!(record.rolled_back_at.is_some());

        let restored = state.lock().unwrap().restored.clone();
        assert_eq!(restored.len(), 3);
        let ids: Vec<&str> = restored.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        // Cada snapshot vuelve exactamente como se capturó.
        for (id, snapshot) in &restored {
            assert_eq!(
                snapshot,
                &json!({ "item": id, "prev_status": "inactive" })
            );
        }
    }

    #[test]
    async fn test_rollback_rejected_without_can_rollback() {
        let engine = build_engine().await;
        let state = Arc::new(Mutex::new(WidgetState::default()));
        let mut handler = WidgetHandler::new(state.clone());
        handler.fail_items = vec!["2".to_string()];
        engine.registry.register("widget", "activate", Arc::new(handler));

        let op_id = engine
            .submission
            .submit(submit_req(vec!["1", "2"]))
            .await
            .unwrap();
        assert_eq!(
            wait_terminal(&engine.store, &op_id).await,
            OperationStatus::Failed
        );

        let err = engine.rollback.rollback(&op_id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)), "got {:?}", err);
        // Ningún restore invocado, ningún cambio de estado.
        assert!(state.lock().unwrap().restored.is_empty());
        let record = engine.store.get_operation(&op_id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Failed);
    }

    #[test]
    async fn test_rollback_is_single_shot() {
        let engine = build_engine().await;
        let state = Arc::new(Mutex::new(WidgetState::default()));
        engine.registry.register(
            "widget",
            "activate",
            Arc::new(WidgetHandler::new(state.clone())),
        );

        let op_id = engine
            .submission
            .submit(submit_req(vec!["1"]))
            .await
            .unwrap();
        wait_terminal(&engine.store, &op_id).await;

        engine.rollback.rollback(&op_id).await.unwrap();
        let err = engine.rollback.rollback(&op_id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        // El segundo intento no re-invoca ningún restore.
        assert_eq!(state.lock().unwrap().restored.len(), 1);
    }

    #[test]
    async fn test_partial_restore_failure_marks_rollback_failed() {
        struct FlakyRestore {
            fail_item: String,
        }

        #[async_trait]
        impl ItemHandler for FlakyRestore {
            async fn apply(&self, item_id: &str, _options: &Map<String, Value>) -> Result<Value> {
                Ok(json!({ "item": item_id }))
            }

            async fn restore(&self, item_id: &str, _snapshot: &Value) -> Result<()> {
                if item_id == self.fail_item {
                    return Err(anyhow!("restore of '{}' failed", item_id));
                }
                Ok(())
            }
        }

        let engine = build_engine().await;
        engine.registry.register(
            "widget",
            "activate",
            Arc::new(FlakyRestore {
                fail_item: "2".to_string(),
            }),
        );

        let op_id = engine
            .submission
            .submit(submit_req(vec!["1", "2", "3"]))
            .await
            .unwrap();
        wait_terminal(&engine.store, &op_id).await;

        engine.rollback.rollback(&op_id).await.unwrap();

        let record = engine.store.get_operation(&op_id).await.unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::RollbackFailed);
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].error_message.starts_with("rollback:"));
    }

    // ------------------------------------------------------------------
    // Escenario E y validaciones de submission
    // ------------------------------------------------------------------

    #[test]
    async fn test_unknown_operation_rejected_without_record() {
        let engine = build_engine().await;

        let err = engine
            .submission
            .submit(submit_req(vec!["1", "2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "got {:?}", err);

        let list = engine.store.list_operations(None, 1, 10).await.unwrap();
        assert_eq!(list.total, 0);
    }

    #[test]
    async fn test_empty_items_rejected() {
        let engine = build_engine().await;
        let state = Arc::new(Mutex::new(WidgetState::default()));
        engine.registry.register(
            "widget",
            "activate",
            Arc::new(WidgetHandler::new(state)),
        );

        let err = engine.submission.submit(submit_req(vec![])).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    async fn test_missing_required_option_rejected() {
        let engine = build_engine().await;
        let state = Arc::new(Mutex::new(WidgetState::default()));
        let mut handler = WidgetHandler::new(state);
        handler.required = vec!["expires_at"];
        engine
            .registry
            .register("widget", "update_expiry", Arc::new(handler));

        let mut req = submit_req(vec!["1"]);
        req.operation_name = "update_expiry".to_string();

        let err = engine.submission.submit(req).await.unwrap_err();
        match err {
            EngineError::Validation(msg) => assert!(msg.contains("expires_at")),
            other => panic!("expected validation error, got {:?}", other),
        }

        let list = engine.store.list_operations(None, 1, 10).await.unwrap();
        assert_eq!(list.total, 0);
    }

    // ------------------------------------------------------------------
    // Handlers de referencia (vanity_codes) end-to-end
    // ------------------------------------------------------------------

    async fn seed_code(pool: &Pool<Sqlite>, code: &str, status: &str, expires_at: Option<&str>) {
        sqlx::query(
            "INSERT INTO vanity_codes (code, status, expires_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(code)
        .bind(status)
        .bind(expires_at)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn code_status(pool: &Pool<Sqlite>, code: &str) -> String {
        use sqlx::Row;
        sqlx::query("SELECT status FROM vanity_codes WHERE code = ?1")
            .bind(code)
            .fetch_one(pool)
            .await
            .unwrap()
            .get("status")
    }

    #[test]
    async fn test_vanity_code_activate_and_rollback() {
        let engine = build_engine().await;
        let pool = engine.store.pool().clone();
        register_vanity_code_handlers(&engine.registry, pool.clone());

        seed_code(&pool, "SAVE10", "inactive", None).await;
        seed_code(&pool, "SAVE20", "inactive", Some("2026-12-31T00:00:00Z")).await;

        let op_id = engine
            .submission
            .submit(SubmitOperationRequest {
                operation_type: "vanity_codes".to_string(),
                operation_name: "activate".to_string(),
                items: vec!["SAVE10".to_string(), "SAVE20".to_string()],
                options: Map::new(),
                owner: "admin@test".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            wait_terminal(&engine.store, &op_id).await,
            OperationStatus::Completed
        );
        assert_eq!(code_status(&pool, "SAVE10").await, "active");
        assert_eq!(code_status(&pool, "SAVE20").await, "active");

        engine.rollback.rollback(&op_id).await.unwrap();
        assert_eq!(code_status(&pool, "SAVE10").await, "inactive");
        assert_eq!(code_status(&pool, "SAVE20").await, "inactive");
    }

    #[test]
    async fn test_vanity_code_missing_row_is_item_error() {
        let engine = build_engine().await;
        let pool = engine.store.pool().clone();
        register_vanity_code_handlers(&engine.registry, pool.clone());

        seed_code(&pool, "REAL", "inactive", None).await;

        let op_id = engine
            .submission
            .submit(SubmitOperationRequest {
                operation_type: "vanity_codes".to_string(),
                operation_name: "activate".to_string(),
                items: vec!["REAL".to_string(), "GHOST".to_string()],
                options: Map::new(),
                owner: "admin@test".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            wait_terminal(&engine.store, &op_id).await,
            OperationStatus::Failed
        );
        let record = engine.store.get_operation(&op_id).await.unwrap().unwrap();
        assert_eq!(record.processed_items, 2);
        assert_eq!(record.errors.len(), 1);
        assert_eq!(record.errors[0].item_id, "GHOST");
        // El item real sí se procesó.
        assert_eq!(code_status(&pool, "REAL").await, "active");
    }

    #[test]
    async fn test_vanity_code_update_expiry_requires_option() {
        let engine = build_engine().await;
        let pool = engine.store.pool().clone();
        register_vanity_code_handlers(&engine.registry, pool);

        let err = engine
            .submission
            .submit(SubmitOperationRequest {
                operation_type: "vanity_codes".to_string(),
                operation_name: "update_expiry".to_string(),
                items: vec!["SAVE10".to_string()],
                options: Map::new(),
                owner: "admin@test".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
    }
}
