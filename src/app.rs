//! app.rs
use crate::handlers::operation_handler;
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api").service(
            web::scope("/operations")
                .route(
                    "",
                    web::post().to(operation_handler::submit_operation_endpoint),
                )
                .route(
                    "",
                    web::get().to(operation_handler::list_operations_endpoint),
                )
                .route(
                    "/{id}",
                    web::get().to(operation_handler::get_operation_endpoint),
                )
                .route(
                    "/{id}/progress",
                    web::get().to(operation_handler::get_progress_endpoint),
                )
                .route(
                    "/{id}/cancel",
                    web::post().to(operation_handler::cancel_operation_endpoint),
                )
                .route(
                    "/{id}/rollback",
                    web::post().to(operation_handler::rollback_operation_endpoint),
                ),
        ),
    );
}
