//! External collaborators: REST APIs and SQL storage

pub mod api;
pub mod fred;
pub mod http;
pub mod polygon;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;
pub mod storage;

pub use api::{ApiClient, ApiClients, ApiKeys};
pub use storage::{connect, SqlRow, SqlValue, StorageClient};
