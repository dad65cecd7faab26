//! services/operation_store.rs
//! Almacén durable de Operation Records sobre SQLite.
//!
//! Todas las transiciones de estado van con guardas `WHERE status = ...`
//! en un solo UPDATE, así los lectores nunca ven contadores a medias.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use uuid::Uuid;

use crate::models::operation_model::{
    ItemError, ListOperationsResponse, NewOperation, OperationRecord, OperationStatus,
    ProgressSnapshot,
};

#[derive(Clone, Debug)]
pub struct OperationStore {
    db_pool: Pool<Sqlite>,
}

impl OperationStore {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        OperationStore { db_pool }
    }

    /// Corre migraciones con sqlx
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db_pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.db_pool
    }

    /// Crea el record en DB con estado "pending" y devuelve el id.
    pub async fn create_operation(&self, new_op: NewOperation) -> Result<String> {
        let op_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let total = new_op.items.len() as i64;
        let items_json = serde_json::to_string(&new_op.items)?;
        let options_json = serde_json::to_string(&new_op.options)?;

        sqlx::query(
            r#"
            INSERT INTO operations (
                id, operation_type, operation_name, status, owner,
                total_items, processed_items, progress_percentage,
                items, options, errors, rollback_data, can_rollback,
                created_at
            )
            VALUES (?1, ?2, ?3, 'pending', ?4, ?5, 0, 0, ?6, ?7, '[]', '{}', 0, ?8)
            "#,
        )
        .bind(&op_id)
        .bind(&new_op.operation_type)
        .bind(&new_op.operation_name)
        .bind(&new_op.owner)
        .bind(total)
        .bind(items_json)
        .bind(options_json)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al insertar operation")?;

        Ok(op_id)
    }

    /// Obtiene la info completa de una operación.
    pub async fn get_operation(&self, op_id: &str) -> Result<Option<OperationRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, operation_type, operation_name, status, owner,
                   total_items, processed_items, progress_percentage,
                   items, options, errors, rollback_data, can_rollback,
                   created_at, started_at, completed_at, rolled_back_at
            FROM operations
            WHERE id = ?1
            "#,
        )
        .bind(op_id)
        .fetch_optional(&self.db_pool)
        .await
        .context("Fallo al leer operation")?;

        row.map(record_from_row).transpose()
    }

    /// Lectura barata del status, para el chequeo de cancelación del executor.
    pub async fn get_status(&self, op_id: &str) -> Result<Option<OperationStatus>> {
        let row = sqlx::query("SELECT status FROM operations WHERE id = ?1")
            .bind(op_id)
            .fetch_optional(&self.db_pool)
            .await?;

        match row {
            Some(r) => {
                let status: String = r.get("status");
                Ok(Some(parse_status(&status)?))
            }
            None => Ok(None),
        }
    }

    /// Snapshot de progreso para polling. Solo lectura.
    pub async fn get_progress(&self, op_id: &str) -> Result<Option<ProgressSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT processed_items, total_items, progress_percentage, status
            FROM operations
            WHERE id = ?1
            "#,
        )
        .bind(op_id)
        .fetch_optional(&self.db_pool)
        .await?;

        match row {
            Some(r) => {
                let status: String = r.get("status");
                Ok(Some(ProgressSnapshot {
                    processed_items: r.get("processed_items"),
                    total_items: r.get("total_items"),
                    progress_percentage: r.get("progress_percentage"),
                    status: parse_status(&status)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Reclama un record pending para ejecutarlo. Exactamente un claimant
    /// gana; los demás reciben `false` y no hacen nada.
    pub async fn claim_pending(&self, op_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = 'running', started_at = ?2
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(op_id)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al reclamar operation")?;

        Ok(result.rows_affected() == 1)
    }

    /// Persiste el resultado de un item: contadores, porcentaje y los dos
    /// blobs JSON, todo en un solo UPDATE. La guarda `status = 'running'`
    /// garantiza que un cancel externo corte las escrituras de contadores.
    pub async fn record_item_result(
        &self,
        op_id: &str,
        processed: i64,
        pct: f64,
        errors: &[ItemError],
        rollback_data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool> {
        let errors_json = serde_json::to_string(errors)?;
        let rollback_json = serde_json::to_string(rollback_data)?;

        let result = sqlx::query(
            r#"
            UPDATE operations
            SET processed_items = ?2,
                progress_percentage = ?3,
                errors = ?4,
                rollback_data = ?5
            WHERE id = ?1 AND status = 'running'
            "#,
        )
        .bind(op_id)
        .bind(processed)
        .bind(pct)
        .bind(errors_json)
        .bind(rollback_json)
        .execute(&self.db_pool)
        .await
        .context("Fallo al actualizar progreso")?;

        Ok(result.rows_affected() == 1)
    }

    /// Transición terminal del executor (completed/failed). Solo aplica si
    /// el record sigue en running.
    pub async fn finalize(
        &self,
        op_id: &str,
        status: OperationStatus,
        can_rollback: bool,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = ?2, can_rollback = ?3, completed_at = ?4
            WHERE id = ?1 AND status = 'running'
            "#,
        )
        .bind(op_id)
        .bind(status.as_str())
        .bind(can_rollback)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al finalizar operation")?;

        Ok(result.rows_affected() == 1)
    }

    /// Falla de sistema: marca el job failed con un único error sintético.
    pub async fn mark_failed(&self, op_id: &str, error: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let synthetic = serde_json::to_string(&vec![ItemError {
            item_id: "*".to_string(),
            error_message: error.to_string(),
        }])?;

        sqlx::query(
            r#"
            UPDATE operations
            SET status = 'failed', errors = ?2, can_rollback = 0, completed_at = ?3
            WHERE id = ?1 AND status = 'running'
            "#,
        )
        .bind(op_id)
        .bind(synthetic)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al marcar operation como failed")?;

        Ok(())
    }

    /// Cancelación cooperativa: solo válida en pending/running. El executor
    /// la observa en su próximo chequeo por item.
    pub async fn request_cancel(&self, op_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = 'cancelled', completed_at = ?2
            WHERE id = ?1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(op_id)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al cancelar operation")?;

        Ok(result.rows_affected() == 1)
    }

    /// Gate single-shot del rollback: apaga can_rollback de forma atómica.
    /// Un segundo intento (o una carrera) recibe `false`.
    pub async fn claim_rollback(&self, op_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE operations
            SET can_rollback = 0
            WHERE id = ?1 AND status = 'completed' AND can_rollback = 1
            "#,
        )
        .bind(op_id)
        .execute(&self.db_pool)
        .await
        .context("Fallo al reclamar rollback")?;

        Ok(result.rows_affected() == 1)
    }

    /// Cierra un rollback: rolled_back o rollback_failed, con los errores
    /// de restore (si hubo) anexados al blob de errors.
    pub async fn finish_rollback(
        &self,
        op_id: &str,
        status: OperationStatus,
        errors: &[ItemError],
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let errors_json = serde_json::to_string(errors)?;

        sqlx::query(
            r#"
            UPDATE operations
            SET status = ?2, errors = ?3, rolled_back_at = ?4
            WHERE id = ?1 AND status = 'completed'
            "#,
        )
        .bind(op_id)
        .bind(status.as_str())
        .bind(errors_json)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al cerrar rollback")?;

        Ok(())
    }

    /// Lista operaciones, más recientes primero, con filtro opcional de status.
    pub async fn list_operations(
        &self,
        status: Option<OperationStatus>,
        page: u64,
        page_size: u64,
    ) -> Result<ListOperationsResponse> {
        let offset = (page.saturating_sub(1)) * page_size;

        let (count_sql, list_sql) = match status {
            Some(_) => (
                "SELECT COUNT(*) as cnt FROM operations WHERE status = ?1",
                r#"
                SELECT id, operation_type, operation_name, status, owner,
                       total_items, processed_items, progress_percentage,
                       items, options, errors, rollback_data, can_rollback,
                       created_at, started_at, completed_at, rolled_back_at
                FROM operations
                WHERE status = ?1
                ORDER BY created_at DESC
                LIMIT ?2 OFFSET ?3
                "#,
            ),
            None => (
                "SELECT COUNT(*) as cnt FROM operations",
                r#"
                SELECT id, operation_type, operation_name, status, owner,
                       total_items, processed_items, progress_percentage,
                       items, options, errors, rollback_data, can_rollback,
                       created_at, started_at, completed_at, rolled_back_at
                FROM operations
                ORDER BY created_at DESC
                LIMIT ?1 OFFSET ?2
                "#,
            ),
        };

        let mut count_query = sqlx::query(count_sql);
        let mut list_query = sqlx::query(list_sql);
        if let Some(st) = status {
            count_query = count_query.bind(st.as_str().to_string());
            list_query = list_query.bind(st.as_str().to_string());
        }
        list_query = list_query.bind(page_size as i64).bind(offset as i64);

        let total: i64 = count_query.fetch_one(&self.db_pool).await?.get("cnt");
        let rows = list_query.fetch_all(&self.db_pool).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(record_from_row(row)?);
        }

        Ok(ListOperationsResponse {
            total: total as u64,
            page,
            page_size,
            items,
        })
    }

    pub async fn delete_operation(&self, op_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM operations WHERE id = ?1")
            .bind(op_id)
            .execute(&self.db_pool)
            .await
            .context("Fallo al borrar operation")?;
        Ok(())
    }

    /// Borra records terminales cuya marca de cierre (rolled_back_at si
    /// existe, si no completed_at) es anterior al cutoff. Nunca toca
    /// pending/running.
    pub async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff_str = cutoff.to_rfc3339();
        let result = sqlx::query(
            r#"
            DELETE FROM operations
            WHERE status IN ('completed', 'failed', 'cancelled', 'rolled_back', 'rollback_failed')
              AND COALESCE(rolled_back_at, completed_at) < ?1
            "#,
        )
        .bind(cutoff_str)
        .execute(&self.db_pool)
        .await
        .context("Fallo al borrar operations expiradas")?;

        Ok(result.rows_affected())
    }
}

fn parse_status(s: &str) -> Result<OperationStatus> {
    OperationStatus::parse(s).with_context(|| format!("Status desconocido en DB: '{}'", s))
}

fn parse_optional_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(s) => Ok(Some(s.parse()?)),
        None => Ok(None),
    }
}

fn record_from_row(row: SqliteRow) -> Result<OperationRecord> {
    let status: String = row.get("status");
    let items: String = row.get("items");
    let options: String = row.get("options");
    let errors: String = row.get("errors");
    let rollback_data: String = row.get("rollback_data");
    let created_at: String = row.get("created_at");

    Ok(OperationRecord {
        id: row.get("id"),
        operation_type: row.get("operation_type"),
        operation_name: row.get("operation_name"),
        status: parse_status(&status)?,
        owner: row.get("owner"),
        total_items: row.get("total_items"),
        processed_items: row.get("processed_items"),
        progress_percentage: row.get("progress_percentage"),
        items: serde_json::from_str(&items).context("Blob 'items' corrupto")?,
        options: serde_json::from_str(&options).context("Blob 'options' corrupto")?,
        errors: serde_json::from_str(&errors).context("Blob 'errors' corrupto")?,
        rollback_data: serde_json::from_str(&rollback_data)
            .context("Blob 'rollback_data' corrupto")?,
        can_rollback: row.get::<i64, _>("can_rollback") != 0,
        created_at: created_at.parse()?,
        started_at: parse_optional_ts(row.get("started_at"))?,
        completed_at: parse_optional_ts(row.get("completed_at"))?,
        rolled_back_at: parse_optional_ts(row.get("rolled_back_at"))?,
    })
}
