//! Steps shared by every pipeline

pub mod load_sql;
pub mod validate;

pub use load_sql::{SqlLoader, SqlManyLoader};
pub use validate::{ManyValidator, Validator};
