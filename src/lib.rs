//! DB Router Library
//!
//! Master/replica routing for SQL databases (SQLite, PostgreSQL, MySQL) with
//! per-datasource connection pools and a generic CRUD template engine.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod template;

pub use config::{Config, DatabaseProperties};
pub use db::{DatabaseRegistry, ExecutionContext, StatementPipeline};
pub use error::{DbError, DbResult};
pub use template::{Entity, EntityDescriptor, TemplateDao};
