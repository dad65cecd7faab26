pub mod operation_model;
