//! Data models for the database router.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod datasource;
pub mod value;

// Re-export commonly used types
pub use connection::{DatabaseType, mask_connection_string};
pub use datasource::{DataSourceDescriptor, PoolSettings, Role};
pub use value::{FromValue, Record, Value};
