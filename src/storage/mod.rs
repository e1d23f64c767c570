//! Persistence: the store seam, its SQLite adapter and connection management

pub mod db;
pub mod filter;
pub mod query_builder;
pub mod sqlite_store;
pub mod store;

pub use db::DatabaseManager;
pub use filter::{Condition, ConditionOperator, Filter, OrderDirection, Sort, Visibility};
pub use sqlite_store::SqliteStore;
pub use store::{FieldChange, Store, StoredRow, Window, WriteOp};
