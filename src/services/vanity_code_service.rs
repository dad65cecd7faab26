//! services/vanity_code_service.rs
//! Handlers de referencia para el namespace "vanity_codes". Cada apply
//! carga la fila, guarda el snapshot previo y aplica exactamente un cambio;
//! restore escribe el snapshot de vuelta tal cual (INSERT OR REPLACE).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sqlx::{Pool, Row, Sqlite};
use std::sync::Arc;

use crate::services::handler_registry::{HandlerRegistry, ItemHandler};

pub fn register_vanity_code_handlers(registry: &HandlerRegistry, pool: Pool<Sqlite>) {
    registry.register(
        "vanity_codes",
        "activate",
        Arc::new(SetStatusHandler {
            pool: pool.clone(),
            new_status: "active",
        }),
    );
    registry.register(
        "vanity_codes",
        "deactivate",
        Arc::new(SetStatusHandler {
            pool: pool.clone(),
            new_status: "inactive",
        }),
    );
    registry.register(
        "vanity_codes",
        "update_expiry",
        Arc::new(UpdateExpiryHandler { pool }),
    );
}

/// Lee la fila y la serializa como snapshot. Error si el código no existe.
async fn load_snapshot(pool: &Pool<Sqlite>, code: &str) -> Result<Value> {
    let row = sqlx::query("SELECT code, status, expires_at FROM vanity_codes WHERE code = ?1")
        .bind(code)
        .fetch_optional(pool)
        .await
        .context("Fallo al leer vanity_code")?
        .ok_or_else(|| anyhow!("vanity code '{}' not found", code))?;

    Ok(json!({
        "code": row.get::<String, _>("code"),
        "status": row.get::<String, _>("status"),
        "expires_at": row.get::<Option<String>, _>("expires_at"),
    }))
}

/// Escribe un snapshot de vuelta, verbatim. Idempotente por construcción.
async fn write_snapshot(pool: &Pool<Sqlite>, code: &str, snapshot: &Value) -> Result<()> {
    let status = snapshot
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("snapshot for '{}' is missing 'status'", code))?;
    let expires_at = snapshot.get("expires_at").and_then(Value::as_str);
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT OR REPLACE INTO vanity_codes (code, status, expires_at, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(code)
    .bind(status)
    .bind(expires_at)
    .bind(now)
    .execute(pool)
    .await
    .context("Fallo al restaurar vanity_code")?;

    Ok(())
}

/// activate / deactivate: un solo UPDATE de status.
struct SetStatusHandler {
    pool: Pool<Sqlite>,
    new_status: &'static str,
}

#[async_trait]
impl ItemHandler for SetStatusHandler {
    async fn apply(&self, item_id: &str, _options: &Map<String, Value>) -> Result<Value> {
        let snapshot = load_snapshot(&self.pool, item_id).await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE vanity_codes SET status = ?2, updated_at = ?3 WHERE code = ?1")
            .bind(item_id)
            .bind(self.new_status)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Fallo al actualizar status de vanity_code")?;

        Ok(snapshot)
    }

    async fn restore(&self, item_id: &str, snapshot: &Value) -> Result<()> {
        write_snapshot(&self.pool, item_id, snapshot).await
    }
}

struct UpdateExpiryHandler {
    pool: Pool<Sqlite>,
}

#[async_trait]
impl ItemHandler for UpdateExpiryHandler {
    async fn apply(&self, item_id: &str, options: &Map<String, Value>) -> Result<Value> {
        // Validado también en la submission vía required_options.
        let expires_at = options
            .get("expires_at")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("option 'expires_at' must be a string"))?;

        let snapshot = load_snapshot(&self.pool, item_id).await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE vanity_codes SET expires_at = ?2, updated_at = ?3 WHERE code = ?1")
            .bind(item_id)
            .bind(expires_at)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Fallo al actualizar expiry de vanity_code")?;

        Ok(snapshot)
    }

    async fn restore(&self, item_id: &str, snapshot: &Value) -> Result<()> {
        write_snapshot(&self.pool, item_id, snapshot).await
    }

    fn required_options(&self) -> Vec<&'static str> {
        vec!["expires_at"]
    }
}
