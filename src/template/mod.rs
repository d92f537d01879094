//! Generic CRUD template engine.
//!
//! - `descriptor`: entity-to-table mapping, audit fields, converters
//! - `sql`: dialect-aware statement generation and custom query rendering
//! - `dao`: [`TemplateDao`] operations routed through the statement pipeline

pub mod dao;
pub mod descriptor;
pub mod sql;

pub use dao::{CustomQuery, TemplateDao};
pub use descriptor::{
    AuditKind, Entity, EntityDescriptor, EntityDescriptorBuilder, FieldConverter, FieldMapping,
    JsonTextConverter,
};
pub use sql::Dialect;
