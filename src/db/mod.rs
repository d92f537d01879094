//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - SQL classification and master/replica routing
//! - Logical database registry and per-datasource pools
//! - Statement execution behind an interceptor pipeline
//! - Type mappings between rows and `Value`s
//! - Database dispatch macros for reducing code duplication

#[macro_use]
mod macros;

pub mod classifier;
pub mod executor;
pub mod interceptor;
pub mod params;
pub mod pool;
pub mod registry;
pub mod routing;
pub mod types;

pub use classifier::{SqlKind, classify, is_write};
pub use executor::{RouteInfo, Statement, StatementKind, StatementResult, StatementRunner};
pub use interceptor::{PipelineBuilder, RoutePlan, StatementInterceptor, StatementPipeline};
pub use pool::{DbConnection, DbPool};
pub use registry::{
    DataSource, DataSourceDiscover, DataSourceStatus, DatabaseRegistry, EnvDataSourceDiscover,
    LogicalDatabase, RegistryBuilder, RoutedConnection,
};
pub use routing::{
    ExecutionContext, RouteDecision, RouteReason, TransactionState, requires_master, resolve_role,
};
