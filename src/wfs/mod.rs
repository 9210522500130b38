pub mod catalog;
pub mod error;
pub mod exception;
pub mod parameter;
pub mod stored_query;
