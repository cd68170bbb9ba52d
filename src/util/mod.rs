//! Helpers shared by the steps

pub mod csv_handler;
pub mod sql_handler;

pub use sql_handler::SqlHandler;
