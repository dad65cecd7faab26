//! services/handler_registry.rs
//! Dispatch dinámico por (operation_type, operation_name). Agregar un tipo
//! de item nuevo es registrar un handler, sin tocar el executor.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Un handler aplica exactamente un cambio a un item y devuelve el snapshot
/// previo al cambio (para rollback). `restore` es la inversa: escribe el
/// snapshot de vuelta tal cual.
///
/// El executor no garantiza exactly-once si el proceso muere a mitad de un
/// job, así que `apply` tiene que tolerar re-invocación con los mismos
/// argumentos sin corromper nada.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn apply(&self, item_id: &str, options: &Map<String, Value>) -> Result<Value>;

    async fn restore(&self, item_id: &str, snapshot: &Value) -> Result<()>;

    /// Keys de `options` que la submission debe traer para este handler.
    fn required_options(&self) -> Vec<&'static str> {
        vec![]
    }
}

#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<(String, String), Arc<dyn ItemHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register(
        &self,
        operation_type: &str,
        operation_name: &str,
        handler: Arc<dyn ItemHandler>,
    ) {
        let key = (operation_type.to_string(), operation_name.to_string());
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(key, handler);
        log::info!(
            "(register) Handler registrado para {}/{}",
            operation_type,
            operation_name
        );
    }

    pub fn resolve(
        &self,
        operation_type: &str,
        operation_name: &str,
    ) -> Option<Arc<dyn ItemHandler>> {
        let key = (operation_type.to_string(), operation_name.to_string());
        self.handlers
            .read()
            .expect("handler registry lock poisoned")
            .get(&key)
            .cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
