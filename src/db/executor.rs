//! Statement execution engine.
//!
//! Runs a single [`Statement`] on a checked-out connection with:
//! - Positional parameter binding
//! - A per-statement timeout
//! - Generated-key capture for inserts
//!
//! # Architecture
//!
//! The runner uses database-specific implementations organized in submodules:
//! - `mysql`: keys from `LAST_INSERT_ID()`
//! - `postgres`: keys from a `RETURNING` clause
//! - `sqlite`: keys from a `RETURNING` clause
//!
//! A key read through `RETURNING` keeps the column's own type, so text and
//! uuid keys come back as they are stored. `last_insert_rowid()` is never
//! used: it reports the rowid even for tables keyed on another column.
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::pool::DbConnection;
use crate::db::types::RowToRecord;
use crate::error::{DbError, DbResult};
use crate::models::{Record, Role, Value};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// What a statement is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    /// Returns rows.
    Query,
    /// Returns an affected-row count.
    Update,
    /// Returns an affected-row count and possibly a generated key.
    Insert,
}

/// A SQL statement with positional parameters.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub kind: StatementKind,
    /// Logical database declared by the caller (usually the entity).
    pub database: Option<String>,
}

impl Statement {
    pub fn new(kind: StatementKind, sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            kind,
            database: None,
        }
    }

    pub fn query(sql: impl Into<String>) -> Self {
        Self::new(StatementKind::Query, sql)
    }

    pub fn update(sql: impl Into<String>) -> Self {
        Self::new(StatementKind::Update, sql)
    }

    pub fn insert(sql: impl Into<String>) -> Self {
        Self::new(StatementKind::Insert, sql)
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn on_database(mut self, database: Option<&str>) -> Self {
        self.database = database.map(str::to_string);
        self
    }
}

/// Where a statement actually ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub database: String,
    pub datasource: String,
    pub role: Role,
}

/// Outcome of one statement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatementResult {
    pub rows: Vec<Record>,
    pub rows_affected: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_key: Option<Value>,
    pub execution_time_ms: u64,
    pub route: RouteInfo,
}

/// Raw output of a backend before routing info is attached.
#[derive(Debug, Default)]
struct Output {
    rows: Vec<Record>,
    rows_affected: u64,
    generated_key: Option<Value>,
}

/// Executes statements on a single connection.
#[derive(Debug, Clone)]
pub struct StatementRunner {
    timeout: Duration,
}

impl StatementRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `statement` on `conn`, failing with a timeout error past the limit.
    pub async fn run(
        &self,
        conn: &mut DbConnection,
        statement: &Statement,
    ) -> DbResult<StatementResult> {
        let start = Instant::now();

        debug!(
            sql = %statement.sql,
            params = statement.params.len(),
            kind = ?statement.kind,
            timeout_secs = self.timeout.as_secs(),
            "Executing statement"
        );

        let operation = match statement.kind {
            StatementKind::Query => "query execution",
            StatementKind::Update | StatementKind::Insert => "write operation",
        };

        let work = async {
            dispatch_each!(DbConnection, conn, {
                MySql(c) => mysql::run(c, statement).await,
                Postgres(c) => postgres::run(c, statement).await,
                SQLite(c) => sqlite::run(c, statement).await,
            })
        };

        let output = match timeout(self.timeout, work).await {
            Ok(result) => result?,
            Err(_) => return Err(timeout_error(operation, self.timeout)),
        };

        Ok(StatementResult {
            rows: output.rows,
            rows_affected: output.rows_affected,
            generated_key: output.generated_key,
            execution_time_ms: start.elapsed().as_millis() as u64,
            route: RouteInfo::default(),
        })
    }
}

impl Default for StatementRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(
            crate::config::DEFAULT_STATEMENT_TIMEOUT_SECS,
        ))
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs() as u32)
}

fn records<R: RowToRecord>(rows: Vec<R>) -> Vec<Record> {
    rows.iter().map(RowToRecord::to_record).collect()
}

fn has_returning(sql: &str) -> bool {
    sql.split_ascii_whitespace()
        .any(|word| word.eq_ignore_ascii_case("returning"))
}

/// Output of an `INSERT ... RETURNING`. The key is the value of a
/// single-column first row.
fn returned(rows: Vec<Record>) -> Output {
    let generated_key = rows
        .first()
        .filter(|row| row.len() == 1)
        .and_then(|row| row.iter().next())
        .map(|(_, value)| value.clone())
        .filter(|value| !value.is_null());
    Output {
        rows_affected: rows.len() as u64,
        rows,
        generated_key,
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use sqlx::MySql;
    use sqlx::pool::PoolConnection;

    pub async fn run(conn: &mut PoolConnection<MySql>, statement: &Statement) -> DbResult<Output> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_mysql_param(query, param);
        }

        match statement.kind {
            StatementKind::Query => {
                let rows = query.fetch_all(&mut **conn).await?;
                Ok(Output {
                    rows: records(rows),
                    ..Output::default()
                })
            }
            StatementKind::Update | StatementKind::Insert => {
                let result = query.execute(&mut **conn).await?;
                // LAST_INSERT_ID() stays 0 for tables without AUTO_INCREMENT.
                let generated_key = match statement.kind {
                    StatementKind::Insert if result.last_insert_id() > 0 => {
                        i64::try_from(result.last_insert_id()).ok().map(Value::Int)
                    }
                    _ => None,
                };
                Ok(Output {
                    rows: Vec::new(),
                    rows_affected: result.rows_affected(),
                    generated_key,
                })
            }
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::Postgres;
    use sqlx::pool::PoolConnection;

    pub async fn run(
        conn: &mut PoolConnection<Postgres>,
        statement: &Statement,
    ) -> DbResult<Output> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_postgres_param(query, param);
        }

        match statement.kind {
            StatementKind::Query => {
                let rows = query.fetch_all(&mut **conn).await?;
                Ok(Output {
                    rows: records(rows),
                    ..Output::default()
                })
            }
            StatementKind::Insert if has_returning(&statement.sql) => {
                let rows = query.fetch_all(&mut **conn).await?;
                Ok(returned(records(rows)))
            }
            StatementKind::Update | StatementKind::Insert => {
                let result = query.execute(&mut **conn).await?;
                Ok(Output {
                    rows: Vec::new(),
                    rows_affected: result.rows_affected(),
                    generated_key: None,
                })
            }
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::Sqlite;
    use sqlx::pool::PoolConnection;

    pub async fn run(conn: &mut PoolConnection<Sqlite>, statement: &Statement) -> DbResult<Output> {
        let mut query = sqlx::query(&statement.sql);
        for param in &statement.params {
            query = bind_sqlite_param(query, param);
        }

        match statement.kind {
            StatementKind::Query => {
                let rows = query.fetch_all(&mut **conn).await?;
                Ok(Output {
                    rows: records(rows),
                    ..Output::default()
                })
            }
            StatementKind::Insert if has_returning(&statement.sql) => {
                let rows = query.fetch_all(&mut **conn).await?;
                Ok(returned(records(rows)))
            }
            StatementKind::Update | StatementKind::Insert => {
                let result = query.execute(&mut **conn).await?;
                Ok(Output {
                    rows: Vec::new(),
                    rows_affected: result.rows_affected(),
                    generated_key: None,
                })
            }
        }
    }
}
