//! handlers/operation_handler.rs
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::errors::EngineError;
use crate::models::operation_model::{
    OperationStatus, SubmitOperationRequest, SubmitOperationResponse,
};
use crate::services::operation_store::OperationStore;
use crate::services::rollback_service::RollbackService;
use crate::services::submission_service::SubmissionService;

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    page: Option<u64>,
    page_size: Option<u64>,
}

fn engine_error_response(e: EngineError) -> HttpResponse {
    let body = json!({ "success": false, "error": e.to_string() });
    match e {
        EngineError::Validation(_) => HttpResponse::BadRequest().json(body),
        EngineError::NotFound(_) => HttpResponse::NotFound().json(body),
        EngineError::Conflict(_) => HttpResponse::Conflict().json(body),
        EngineError::Internal(err) => {
            log::error!("(engine_error_response) Error interno: {:?}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// POST /api/operations
pub async fn submit_operation_endpoint(
    submission: web::Data<SubmissionService>,
    body: web::Json<SubmitOperationRequest>,
) -> HttpResponse {
    match submission.submit(body.into_inner()).await {
        Ok(op_id) => HttpResponse::Ok().json(SubmitOperationResponse {
            operation_id: op_id,
            message: "Bulk operation queued for background processing".to_string(),
        }),
        Err(e) => engine_error_response(e),
    }
}

/// GET /api/operations
pub async fn list_operations_endpoint(
    store: web::Data<OperationStore>,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(10).clamp(1, 100);

    let status = match &query.status {
        Some(s) => match OperationStatus::parse(s) {
            Some(st) => Some(st),
            None => {
                return engine_error_response(EngineError::Validation(format!(
                    "unknown status filter '{}'",
                    s
                )))
            }
        },
        None => None,
    };

    match store.list_operations(status, page, page_size).await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => engine_error_response(EngineError::Internal(e)),
    }
}

/// GET /api/operations/{id}
pub async fn get_operation_endpoint(
    store: web::Data<OperationStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let op_id = path.into_inner();
    match store.get_operation(&op_id).await {
        Ok(Some(record)) => HttpResponse::Ok().json(record),
        Ok(None) => engine_error_response(EngineError::NotFound(op_id)),
        Err(e) => engine_error_response(EngineError::Internal(e)),
    }
}

/// GET /api/operations/{id}/progress
/// Lectura pura, segura para polling cada 1-2s.
pub async fn get_progress_endpoint(
    store: web::Data<OperationStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let op_id = path.into_inner();
    match store.get_progress(&op_id).await {
        Ok(Some(progress)) => HttpResponse::Ok().json(progress),
        Ok(None) => engine_error_response(EngineError::NotFound(op_id)),
        Err(e) => engine_error_response(EngineError::Internal(e)),
    }
}

/// POST /api/operations/{id}/cancel
pub async fn cancel_operation_endpoint(
    store: web::Data<OperationStore>,
    path: web::Path<String>,
) -> HttpResponse {
    let op_id = path.into_inner();
    match store.request_cancel(&op_id).await {
        Ok(true) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Cancellation requested; the executor stops at its next checkpoint"
        })),
        Ok(false) => {
            // O no existe, o ya está en un estado terminal.
            match store.get_operation(&op_id).await {
                Ok(Some(record)) => engine_error_response(EngineError::Conflict(format!(
                    "operation {} is {} and cannot be cancelled",
                    op_id,
                    record.status.as_str()
                ))),
                Ok(None) => engine_error_response(EngineError::NotFound(op_id)),
                Err(e) => engine_error_response(EngineError::Internal(e)),
            }
        }
        Err(e) => engine_error_response(EngineError::Internal(e)),
    }
}

/// POST /api/operations/{id}/rollback
pub async fn rollback_operation_endpoint(
    rollback: web::Data<RollbackService>,
    path: web::Path<String>,
) -> HttpResponse {
    let op_id = path.into_inner();
    match rollback.rollback(&op_id).await {
        Ok(_) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Rollback finished"
        })),
        Err(e) => engine_error_response(e),
    }
}
