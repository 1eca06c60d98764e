//! Persistence layer — libSQL-backed storage for shop records and the SMS log.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ApprovalPlan, ApprovalWrite, ShopStore};
