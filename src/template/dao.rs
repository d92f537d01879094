//! Generic CRUD operations for one entity type.
//!
//! [`TemplateDao`] generates statements from an [`EntityDescriptor`] and
//! runs them through the [`StatementPipeline`], so every call is routed to
//! master or replica like any other statement. Audit fields are stamped
//! here and cannot be set by callers.

use crate::db::{ExecutionContext, Statement, StatementKind, StatementPipeline, StatementResult};
use crate::error::{DbError, DbResult};
use crate::models::{Record, Value};
use crate::template::descriptor::{AuditKind, ColumnValue, Entity, EntityDescriptor};
use crate::template::sql::{self, Dialect};
use chrono::{NaiveDateTime, Utc};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// CRUD template bound to one entity type.
pub struct TemplateDao<E> {
    pipeline: Arc<StatementPipeline>,
    descriptor: Arc<EntityDescriptor>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for TemplateDao<E> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            descriptor: self.descriptor.clone(),
            _entity: PhantomData,
        }
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Set every audit field of `kind` (or any kind when `None`) to `at`.
fn stamp(descriptor: &EntityDescriptor, record: &mut Record, kind: Option<AuditKind>, at: NaiveDateTime) {
    for mapping in descriptor.fields() {
        match mapping.audit() {
            Some(k) if kind.is_none_or(|wanted| wanted == k) => {
                record.insert(mapping.field(), at);
            }
            _ => {}
        }
    }
}

impl<E: Entity> TemplateDao<E> {
    pub fn new(pipeline: Arc<StatementPipeline>, descriptor: Arc<EntityDescriptor>) -> Self {
        Self {
            pipeline,
            descriptor,
            _entity: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    fn dialect(&self, ctx: &ExecutionContext) -> DbResult<Dialect> {
        self.pipeline
            .database_type(ctx, self.descriptor.database())
            .map(Dialect::new)
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        statement: Statement,
    ) -> DbResult<StatementResult> {
        let statement = statement.on_database(self.descriptor.database());
        self.pipeline.execute(ctx, statement).await
    }

    fn column_names(&self) -> Vec<&str> {
        self.descriptor.fields().iter().map(|f| f.column()).collect()
    }

    /// Build an entity, naming the table in any mapping failure.
    fn to_entity(&self, record: Record) -> DbResult<E> {
        E::from_record(record).map_err(|e| match e {
            DbError::Mapping { message, .. } => self.descriptor.mapping_error(message),
            other => other,
        })
    }

    fn to_entities(&self, rows: Vec<Record>) -> DbResult<Vec<E>> {
        rows.into_iter()
            .map(|row| self.to_entity(self.descriptor.from_row(row)?))
            .collect()
    }

    /// Insert one entity.
    ///
    /// Only non-null columns are written so database defaults apply to the
    /// rest. A server-generated key is written back to the entity along with
    /// the audit timestamps. Returns true iff one row was inserted.
    pub async fn create(&self, ctx: &ExecutionContext, entity: &mut E) -> DbResult<bool> {
        let desc = &self.descriptor;
        let dialect = self.dialect(ctx)?;
        let mut record = entity.to_record();
        stamp(desc, &mut record, None, now());

        if desc.is_manual_id() {
            desc.key_of(&record)?;
        }

        let columns: Vec<(&str, Value)> = desc
            .to_columns(record.clone())?
            .into_iter()
            .filter(|c| !c.value.is_null())
            .filter(|c| desc.is_manual_id() || !desc.is_primary_key(c.mapping))
            .map(|c| (c.mapping.column(), c.value))
            .collect();

        let pk = desc.primary_key();
        let returning = (!desc.is_manual_id()).then(|| pk.column());
        let statement = sql::insert(dialect, desc.table(), columns, returning);

        debug!(table = %desc.table(), "Creating entity");
        let result = self.run(ctx, statement).await?;
        if !desc.is_manual_id() {
            if let Some(key) = result.generated_key {
                record.insert(pk.field(), pk.from_column(key)?);
            }
        }

        *entity = self.to_entity(record)?;
        Ok(result.rows_affected == 1)
    }

    /// Insert several entities in one statement.
    ///
    /// Every mapped column is written for every row. Audit timestamps are
    /// written back; generated keys are not. Empty input is a no-op.
    pub async fn batch_create(&self, ctx: &ExecutionContext, entities: &mut [E]) -> DbResult<bool> {
        if entities.is_empty() {
            return Ok(true);
        }
        let desc = &self.descriptor;
        let dialect = self.dialect(ctx)?;
        let at = now();

        let columns: Vec<&str> = desc
            .fields()
            .iter()
            .filter(|f| desc.is_manual_id() || !desc.is_primary_key(f))
            .map(|f| f.column())
            .collect();

        let mut records = Vec::with_capacity(entities.len());
        let mut rows = Vec::with_capacity(entities.len());
        for entity in entities.iter() {
            let mut record = entity.to_record();
            stamp(desc, &mut record, None, at);
            if desc.is_manual_id() {
                desc.key_of(&record)?;
            }
            let row: Vec<Value> = desc
                .to_columns(record.clone())?
                .into_iter()
                .filter(|c| desc.is_manual_id() || !desc.is_primary_key(c.mapping))
                .map(|c| c.value)
                .collect();
            rows.push(row);
            records.push(record);
        }

        let statement = sql::batch_insert(dialect, desc.table(), &columns, rows);
        debug!(table = %desc.table(), count = entities.len(), "Batch creating entities");
        let result = self.run(ctx, statement).await?;

        for (entity, record) in entities.iter_mut().zip(records) {
            *entity = self.to_entity(record)?;
        }
        Ok(result.rows_affected == entities.len() as u64)
    }

    /// Look up one entity by primary key.
    pub async fn find(&self, ctx: &ExecutionContext, id: impl Into<Value>) -> DbResult<Option<E>> {
        let desc = &self.descriptor;
        let dialect = self.dialect(ctx)?;
        let statement = sql::select_by(
            dialect,
            desc.table(),
            &self.column_names(),
            desc.primary_key().column(),
            vec![id.into()],
        );
        let rows = self.run(ctx, statement).await?.rows;
        Ok(self.to_entities(rows)?.into_iter().next())
    }

    /// Look up entities by primary key. Row order is unspecified; empty
    /// input returns an empty list without touching the database.
    pub async fn find_by_ids<I, V>(&self, ctx: &ExecutionContext, ids: I) -> DbResult<Vec<E>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let field = self.descriptor.primary_key().field().to_string();
        self.find_by_field(ctx, &field, ids).await
    }

    /// Look up entities whose `field` matches any of `values`.
    pub async fn find_by_field<I, V>(
        &self,
        ctx: &ExecutionContext,
        field: &str,
        values: I,
    ) -> DbResult<Vec<E>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let desc = &self.descriptor;
        let column = desc.mapping(field)?.column();
        let dialect = self.dialect(ctx)?;
        let statement = sql::select_by(dialect, desc.table(), &self.column_names(), column, values);
        let rows = self.run(ctx, statement).await?.rows;
        self.to_entities(rows)
    }

    /// Replace every column except the key and creation timestamps.
    ///
    /// Null fields are written as NULL. Returns true iff one row matched.
    pub async fn update(&self, ctx: &ExecutionContext, entity: &mut E) -> DbResult<bool> {
        self.write_one(ctx, entity, false).await
    }

    /// Write only the non-null fields, plus the update timestamp.
    ///
    /// A patch carrying only the key still refreshes the update timestamp.
    /// Returns true iff one row matched.
    pub async fn patch(&self, ctx: &ExecutionContext, entity: &mut E) -> DbResult<bool> {
        self.write_one(ctx, entity, true).await
    }

    async fn write_one(&self, ctx: &ExecutionContext, entity: &mut E, patch: bool) -> DbResult<bool> {
        let desc = &self.descriptor;
        let mut record = entity.to_record();
        let key = desc.key_of(&record)?;
        let dialect = self.dialect(ctx)?;
        stamp(desc, &mut record, Some(AuditKind::Updated), now());

        let sets = self.settable(desc.to_columns(record.clone())?, patch);
        let statement = sql::update(dialect, desc.table(), sets, desc.primary_key().column(), key);

        debug!(table = %desc.table(), patch, "Updating entity");
        let result = self.run(ctx, statement).await?;
        *entity = self.to_entity(record)?;
        Ok(result.rows_affected == 1)
    }

    /// Columns an update may write: never the key or creation timestamps;
    /// for patches, only non-null values.
    fn settable<'a>(&self, columns: Vec<ColumnValue<'a>>, patch: bool) -> Vec<(&'a str, Value)> {
        columns
            .into_iter()
            .filter(|c| !self.descriptor.is_primary_key(c.mapping))
            .filter(|c| c.mapping.audit() != Some(AuditKind::Created))
            .filter(|c| !patch || !c.value.is_null())
            .map(|c| (c.mapping.column(), c.value))
            .collect()
    }

    /// Patch several entities with one statement.
    ///
    /// Every entity must carry its key; a missing key fails before anything
    /// runs. Returns true iff every row matched. Empty input is a no-op.
    pub async fn batch_patch(&self, ctx: &ExecutionContext, entities: &mut [E]) -> DbResult<bool> {
        if entities.is_empty() {
            return Ok(true);
        }
        let desc = &self.descriptor;
        let at = now();

        let mut records = Vec::with_capacity(entities.len());
        for entity in entities.iter() {
            let mut record = entity.to_record();
            let key = desc.key_of(&record)?;
            stamp(desc, &mut record, Some(AuditKind::Updated), at);
            records.push((key, record));
        }

        let dialect = self.dialect(ctx)?;
        let mut rows = Vec::with_capacity(records.len());
        for (key, record) in &records {
            let sets = self.settable(desc.to_columns(record.clone())?, true);
            rows.push((key.clone(), sets));
        }
        let statement = sql::batch_patch(dialect, desc.table(), desc.primary_key().column(), rows);

        debug!(table = %desc.table(), count = entities.len(), "Batch patching entities");
        let result = self.run(ctx, statement).await?;

        for (entity, (_, record)) in entities.iter_mut().zip(records) {
            *entity = self.to_entity(record)?;
        }
        Ok(result.rows_affected == entities.len() as u64)
    }

    /// Delete one row by key. Returns true iff a row was removed.
    pub async fn remove(&self, ctx: &ExecutionContext, id: impl Into<Value>) -> DbResult<bool> {
        let id = id.into();
        if id.is_null() {
            return Err(self.descriptor.mapping_error("cannot remove without a primary key"));
        }
        Ok(self.batch_delete(ctx, [id]).await? == 1)
    }

    /// Delete rows by key and return how many were actually removed.
    /// Empty input returns 0 without touching the database.
    pub async fn batch_delete<I, V>(&self, ctx: &ExecutionContext, ids: I) -> DbResult<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let desc = &self.descriptor;
        let dialect = self.dialect(ctx)?;
        let statement = sql::delete_by(dialect, desc.table(), desc.primary_key().column(), ids);

        debug!(table = %desc.table(), "Deleting entities");
        Ok(self.run(ctx, statement).await?.rows_affected)
    }

    /// Start a custom query against this entity's database.
    ///
    /// `?` binds the next scalar from [`CustomQuery::bind`]; `@name` expands
    /// a list from [`CustomQuery::bind_list`].
    pub fn query<'a>(&'a self, ctx: &'a ExecutionContext, sql: impl Into<String>) -> CustomQuery<'a, E> {
        CustomQuery {
            dao: self,
            ctx,
            sql: sql.into(),
            scalars: Vec::new(),
            lists: HashMap::new(),
        }
    }
}

/// A hand-written statement routed like generated ones.
pub struct CustomQuery<'a, E> {
    dao: &'a TemplateDao<E>,
    ctx: &'a ExecutionContext,
    sql: String,
    scalars: Vec<Value>,
    lists: HashMap<String, Vec<Value>>,
}

impl<E: Entity> CustomQuery<'_, E> {
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.scalars.push(value.into());
        self
    }

    /// Bind a collection to `@name`. An empty collection fails at execution.
    pub fn bind_list<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.lists
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    fn statement(&self, kind: StatementKind) -> DbResult<Statement> {
        let dialect = self.dao.dialect(self.ctx)?;
        let (sql, params) = sql::render_template(dialect, &self.sql, &self.scalars, &self.lists)?;
        Ok(Statement::new(kind, sql).with_params(params))
    }

    /// Raw rows keyed by column name.
    pub async fn fetch_records(self) -> DbResult<Vec<Record>> {
        let statement = self.statement(StatementKind::Query)?;
        Ok(self.dao.run(self.ctx, statement).await?.rows)
    }

    pub async fn fetch_all(self) -> DbResult<Vec<E>> {
        let dao = self.dao;
        let rows = self.fetch_records().await?;
        dao.to_entities(rows)
    }

    pub async fn fetch_optional(self) -> DbResult<Option<E>> {
        Ok(self.fetch_all().await?.into_iter().next())
    }

    /// Run a write and return the affected row count.
    pub async fn execute(self) -> DbResult<u64> {
        let statement = self.statement(StatementKind::Update)?;
        Ok(self.dao.run(self.ctx, statement).await?.rows_affected)
    }
}
