// Database module
// SQLite-backed key-value persistence for cached asset payloads

pub mod connection;
pub mod migrations;
pub mod models;
pub mod operations;

pub use connection::DatabaseConnection;
pub use models::CacheEntry;
pub use operations::DbOperations;
