//! Entity metadata for the template engine.
//!
//! An [`EntityDescriptor`] binds a Rust type to its table: primary key,
//! field-to-column names, audit fields and optional value converters. It is
//! built once with [`EntityDescriptor::builder`] at startup and shared
//! read-only afterwards.

use crate::error::{DbError, DbResult};
use crate::models::{Record, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Conversion between a field's in-memory value and its stored value.
pub trait FieldConverter: Send + Sync + fmt::Debug {
    fn to_column(&self, value: Value) -> DbResult<Value>;
    fn from_column(&self, value: Value) -> DbResult<Value>;
}

/// Stores JSON values as text and parses them back on read.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTextConverter;

impl FieldConverter for JsonTextConverter {
    fn to_column(&self, value: Value) -> DbResult<Value> {
        match value {
            Value::Json(v) => Ok(Value::Text(v.to_string())),
            other => Ok(other),
        }
    }

    fn from_column(&self, value: Value) -> DbResult<Value> {
        match value {
            Value::Text(s) => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| DbError::mapping("json", format!("stored text is not JSON: {}", e))),
            other => Ok(other),
        }
    }
}

/// A type stored in one table.
///
/// `to_record` keys values by field name; `from_record` receives the same
/// keys back. Fields absent from the record read as `Null`.
pub trait Entity: Send + Sync + Sized {
    fn to_record(&self) -> Record;
    fn from_record(record: Record) -> DbResult<Self>;
}

/// Audit stamp applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    /// Set on insert only.
    Created,
    /// Set on insert and every update.
    Updated,
}

#[derive(Debug, Clone)]
pub struct FieldMapping {
    field: String,
    column: String,
    audit: Option<AuditKind>,
    converter: Option<Arc<dyn FieldConverter>>,
}

impl FieldMapping {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn audit(&self) -> Option<AuditKind> {
        self.audit
    }

    fn to_column(&self, value: Value) -> DbResult<Value> {
        match &self.converter {
            Some(c) if !value.is_null() => c.to_column(value),
            _ => Ok(value),
        }
    }

    pub(crate) fn from_column(&self, value: Value) -> DbResult<Value> {
        match &self.converter {
            Some(c) if !value.is_null() => c.from_column(value),
            _ => Ok(value),
        }
    }
}

/// A mapped field paired with its column value.
#[derive(Debug, Clone)]
pub struct ColumnValue<'a> {
    pub mapping: &'a FieldMapping,
    pub value: Value,
}

/// Table mapping for one entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    table: String,
    database: Option<String>,
    primary_key: usize,
    manual_id: bool,
    fields: Vec<FieldMapping>,
}

impl EntityDescriptor {
    pub fn builder(table: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            table: table.into(),
            database: None,
            primary_key: "id".to_string(),
            manual_id: false,
            fields: Vec::new(),
            created: Vec::new(),
            updated: Vec::new(),
            converters: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Logical database the entity lives in; `None` uses the default.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn primary_key(&self) -> &FieldMapping {
        &self.fields[self.primary_key]
    }

    pub fn is_manual_id(&self) -> bool {
        self.manual_id
    }

    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    pub fn mapping(&self, field: &str) -> DbResult<&FieldMapping> {
        self.fields
            .iter()
            .find(|f| f.field == field)
            .ok_or_else(|| self.mapping_error(format!("unknown field '{}'", field)))
    }

    pub fn is_primary_key(&self, mapping: &FieldMapping) -> bool {
        mapping.field == self.primary_key().field
    }

    /// Convert a field-keyed record into column values in declaration order.
    ///
    /// Fields missing from the record become `Null`; keys that map to no
    /// field are rejected.
    pub fn to_columns(&self, mut record: Record) -> DbResult<Vec<ColumnValue<'_>>> {
        let mut columns = Vec::with_capacity(self.fields.len());
        for mapping in &self.fields {
            let value = record.remove(&mapping.field).unwrap_or(Value::Null);
            columns.push(ColumnValue {
                mapping,
                value: mapping.to_column(value)?,
            });
        }

        if let Some((extra, _)) = record.iter().next() {
            return Err(self.mapping_error(format!("record carries unmapped field '{}'", extra)));
        }
        Ok(columns)
    }

    /// Convert a row keyed by column name into a record keyed by field name.
    ///
    /// Columns with no mapping (computed columns in custom queries) are kept
    /// under their own name.
    pub fn from_row(&self, row: Record) -> DbResult<Record> {
        let mut record = Record::new();
        for (column, value) in row {
            match self.fields.iter().find(|f| f.column == column) {
                Some(mapping) => record.insert(mapping.field.clone(), mapping.from_column(value)?),
                None => record.insert(column, value),
            }
        }
        Ok(record)
    }

    /// Primary key value of a record, which must be present.
    pub fn key_of(&self, record: &Record) -> DbResult<Value> {
        let pk = &self.primary_key().field;
        match record.get(pk) {
            Some(v) if !v.is_null() => Ok(v.clone()),
            _ => Err(self.mapping_error(format!("primary key '{}' is missing", pk))),
        }
    }

    pub(crate) fn mapping_error(&self, message: impl Into<String>) -> DbError {
        DbError::mapping(self.table.clone(), message)
    }
}

/// Builder for [`EntityDescriptor`].
pub struct EntityDescriptorBuilder {
    table: String,
    database: Option<String>,
    primary_key: String,
    manual_id: bool,
    fields: Vec<(String, String)>,
    created: Vec<String>,
    updated: Vec<String>,
    converters: Vec<(String, Arc<dyn FieldConverter>)>,
}

impl EntityDescriptorBuilder {
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Primary key field, `id` when not set.
    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = field.into();
        self
    }

    /// The caller assigns keys; inserts require the key to be present.
    pub fn manual_id(mut self) -> Self {
        self.manual_id = true;
        self
    }

    /// Map a field to a column of the same name.
    pub fn field(self, field: impl Into<String>) -> Self {
        let field = field.into();
        let column = field.clone();
        self.column(field, column)
    }

    pub fn column(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.fields.push((field.into(), column.into()));
        self
    }

    /// Mark a mapped field as the creation timestamp.
    pub fn created_at(mut self, field: impl Into<String>) -> Self {
        self.created.push(field.into());
        self
    }

    /// Mark a mapped field as the last-update timestamp.
    pub fn updated_at(mut self, field: impl Into<String>) -> Self {
        self.updated.push(field.into());
        self
    }

    pub fn converter(mut self, field: impl Into<String>, converter: Arc<dyn FieldConverter>) -> Self {
        self.converters.push((field.into(), converter));
        self
    }

    pub fn build(self) -> DbResult<EntityDescriptor> {
        let table = self.table;
        let invalid = |msg: String| DbError::configuration(format!("entity '{}': {}", table, msg));

        if table.trim().is_empty() {
            return Err(DbError::configuration("entity table name must not be empty"));
        }

        let mut fields: Vec<FieldMapping> = Vec::with_capacity(self.fields.len() + 1);
        // The key is always mapped, first unless declared explicitly.
        if !self.fields.iter().any(|(f, _)| *f == self.primary_key) {
            fields.push(FieldMapping {
                field: self.primary_key.clone(),
                column: self.primary_key.clone(),
                audit: None,
                converter: None,
            });
        }

        let mut seen_fields = HashSet::new();
        let mut seen_columns = HashSet::new();
        for (field, column) in self.fields {
            fields.push(FieldMapping {
                field,
                column,
                audit: None,
                converter: None,
            });
        }
        for f in &fields {
            if !seen_fields.insert(f.field.as_str()) {
                return Err(invalid(format!("field '{}' is mapped twice", f.field)));
            }
            if !seen_columns.insert(f.column.as_str()) {
                return Err(invalid(format!("column '{}' is mapped twice", f.column)));
            }
        }

        let audits = self
            .created
            .into_iter()
            .map(|f| (f, AuditKind::Created))
            .chain(self.updated.into_iter().map(|f| (f, AuditKind::Updated)));
        for (name, kind) in audits {
            if name == self.primary_key {
                return Err(invalid(format!("primary key '{}' cannot be an audit field", name)));
            }
            let mapping = fields
                .iter_mut()
                .find(|f| f.field == name)
                .ok_or_else(|| invalid(format!("audit field '{}' is not mapped", name)))?;
            if mapping.audit.is_some() {
                return Err(invalid(format!("field '{}' has two audit roles", name)));
            }
            mapping.audit = Some(kind);
        }

        for (name, converter) in self.converters {
            let mapping = fields
                .iter_mut()
                .find(|f| f.field == name)
                .ok_or_else(|| invalid(format!("converter for unmapped field '{}'", name)))?;
            mapping.converter = Some(converter);
        }

        let primary_key = fields
            .iter()
            .position(|f| f.field == self.primary_key)
            .ok_or_else(|| DbError::internal("primary key mapping vanished"))?;

        Ok(EntityDescriptor {
            table,
            database: self.database,
            primary_key,
            manual_id: self.manual_id,
            fields,
        })
    }
}
