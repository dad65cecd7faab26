//! config/engine_config.rs
//! Configuración global del engine (delays, retención, etc.)

use serde::{Deserialize, Serialize};

/// Configuración global del executor y el sweeper, con valores por defecto
/// (puede sobreescribirse con variables de entorno).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pausa entre items dentro de un job, para no saturar el storage.
    pub item_delay_ms: u64,
    /// Ventana de retención para records terminales.
    pub retention_days: i64,
    /// Cada cuánto corre el sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            item_delay_ms: 25,
            retention_days: 30,
            sweep_interval_secs: 3600,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        EngineConfig {
            item_delay_ms: env_or("BULK_ITEM_DELAY_MS", defaults.item_delay_ms),
            retention_days: env_or("BULK_RETENTION_DAYS", defaults.retention_days),
            sweep_interval_secs: env_or("BULK_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
