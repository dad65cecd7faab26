pub mod cleanup_service;
pub mod executor_service;
pub mod handler_registry;
pub mod operation_store;
pub mod rollback_service;
pub mod submission_service;
pub mod vanity_code_service;
