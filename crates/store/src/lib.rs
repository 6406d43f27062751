pub mod audit_log;
pub mod connection;
pub mod schema;
pub mod state_store;

pub use audit_log::{AuditLog, InMemoryAuditLog, SqlAuditLog};
pub use connection::{connect, connect_with_settings, DbPool};
pub use schema::ensure_schema;
pub use state_store::{InMemoryStateStore, SqlStateStore, StateStore, StoreError};
