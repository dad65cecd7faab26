use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Pool, Sqlite};

use crate::config::engine_config::EngineConfig;
use crate::logger::init_logger;
use crate::services::cleanup_service::CleanupService;
use crate::services::executor_service::ExecutorService;
use crate::services::handler_registry::HandlerRegistry;
use crate::services::operation_store::OperationStore;
use crate::services::rollback_service::RollbackService;
use crate::services::submission_service::SubmissionService;
use crate::services::vanity_code_service::register_vanity_code_handlers;

mod app;
mod config;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;
#[cfg(test)]
mod tests;

async fn setup_database() -> Pool<Sqlite> {
    // 1) Crear carpeta "data"
    std::fs::create_dir_all("data").expect("No se pudo crear directorio 'data'");

    // 2) Ruta final: ./data/bulk_operations.db
    let db_path = std::env::current_dir()
        .expect("No se pudo obtener el current_dir")
        .join("data")
        .join("bulk_operations.db");

    log::info!("Conectando a SQLite en {}", db_path.to_string_lossy());

    // 3) Conectarnos con SQLx
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);

    Pool::<Sqlite>::connect_with(options)
        .await
        .expect("No se pudo conectar a la base de datos SQLite.")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = EngineConfig::from_env();

    // Conectarnos a la DB
    let db_pool = setup_database().await;

    // OperationStore
    let store = OperationStore::new(db_pool.clone());
    if let Err(e) = store.run_migrations().await {
        panic!("Fallo en migraciones de 'operations': {:?}", e);
    }

    // Registry con los handlers de referencia
    let registry = HandlerRegistry::new();
    register_vanity_code_handlers(&registry, db_pool.clone());

    // Engine: executor + submission + rollback
    let executor = ExecutorService::new(store.clone(), registry.clone(), config.clone());
    let submission = SubmissionService::new(store.clone(), registry.clone(), executor);
    let rollback = RollbackService::new(store.clone(), registry.clone());

    // Sweeper de retención en background
    CleanupService::new(store.clone(), config.clone()).spawn();

    // Levantar servidor
    log::info!("Levantando servidor en 0.0.0.0:5022");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(submission.clone()))
            .app_data(web::Data::new(rollback.clone()))
            .configure(app::init_app)
    })
    .bind(("0.0.0.0", 5022))?
    .run()
    .await
}
