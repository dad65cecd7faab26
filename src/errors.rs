//! errors.rs
//! Taxonomía de errores que cruza el límite HTTP del engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Submission rechazada antes de crear ningún record.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("operation not found: {0}")]
    NotFound(String),

    /// Transición inválida (cancel sobre terminal, rollback repetido, etc.)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
