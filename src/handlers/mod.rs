pub mod operation_handler;
