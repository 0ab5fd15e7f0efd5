pub mod create_message;
pub mod error;
pub mod list_models;
pub mod types;
