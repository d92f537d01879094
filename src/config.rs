//! Configuration handling for the database router.
//!
//! Two layers live here: process settings from CLI arguments and environment
//! variables, and the JSON database file describing logical databases and
//! their physical datasources.

use crate::error::{DbError, DbResult};
use crate::models::{DataSourceDescriptor, DatabaseType, PoolSettings, Role};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_DB_FILE: &str = "db.json";
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 1;

// Pool configuration defaults
pub const DEFAULT_MIN_IDLE: u32 = 10;
pub const DEFAULT_MAX_POOL_SIZE: u32 = 30;
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;
pub const MIN_CONNECTION_TIMEOUT_MS: u64 = 250;

/// One logical database as written in the database file.
///
/// ```json
/// {
///   "name": "user_db",
///   "default": true,
///   "maxPoolSize": 20,
///   "ds": [
///     {"name": "primary", "type": "master", "url": "mysql://db-1:3306/user_db"},
///     {"name": "replica-1", "type": "replica", "url": "mysql://db-2:3306/user_db"}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseProperties {
    pub name: String,
    /// Alternate name entities may use to target this database (default: `name`)
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub master_only: bool,
    #[serde(default, alias = "default")]
    pub default_database: bool,
    #[serde(default, rename = "useSSL")]
    pub use_ssl: bool,
    /// Minimum idle connections per pool (default: 10)
    pub min_idle: Option<u32>,
    /// Maximum connections per pool (default: 30)
    pub max_pool_size: Option<u32>,
    /// Acquire timeout in milliseconds (default: 30000, minimum: 250)
    pub connection_timeout_ms: Option<u64>,
    /// Physical datasources. Empty means auto-discovery.
    #[serde(default, alias = "ds")]
    pub datasources: Vec<DataSourceDescriptor>,
}

impl DatabaseProperties {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_datasource(mut self, datasource: DataSourceDescriptor) -> Self {
        self.datasources.push(datasource);
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_master_only(mut self, master_only: bool) -> Self {
        self.master_only = master_only;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default_database = true;
        self
    }

    pub fn with_pool(mut self, min_idle: u32, max_pool_size: u32, timeout_ms: u64) -> Self {
        self.min_idle = Some(min_idle);
        self.max_pool_size = Some(max_pool_size);
        self.connection_timeout_ms = Some(timeout_ms);
        self
    }

    /// Schema name, falling back to the database name.
    pub fn schema_or_name(&self) -> &str {
        self.schema.as_deref().unwrap_or(&self.name)
    }

    pub fn min_idle_or_default(&self) -> u32 {
        self.min_idle.unwrap_or(DEFAULT_MIN_IDLE)
    }

    pub fn max_pool_size_or_default(&self) -> u32 {
        self.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE)
    }

    pub fn connection_timeout_ms_or_default(&self) -> u64 {
        self.connection_timeout_ms
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_MS)
    }

    /// True when no datasource is listed and one must be discovered.
    pub fn is_auto_discover(&self) -> bool {
        self.datasources.is_empty()
    }

    /// Resolve pool settings, rejecting zero sizes and normalising the rest.
    pub fn pool_settings(&self) -> DbResult<PoolSettings> {
        let max_pool_size = self.max_pool_size_or_default();
        if max_pool_size == 0 {
            return Err(DbError::configuration(format!(
                "database '{}': maxPoolSize must be greater than 0",
                self.name
            )));
        }
        let mut min_idle = self.min_idle_or_default();
        if min_idle == 0 {
            return Err(DbError::configuration(format!(
                "database '{}': minIdle must be greater than 0",
                self.name
            )));
        }
        if min_idle > max_pool_size {
            warn!(
                database = %self.name,
                min_idle,
                max_pool_size,
                "minIdle exceeds maxPoolSize, clamping"
            );
            min_idle = max_pool_size;
        }

        let mut timeout_ms = self.connection_timeout_ms_or_default();
        if timeout_ms < MIN_CONNECTION_TIMEOUT_MS {
            warn!(
                database = %self.name,
                timeout_ms,
                "connectionTimeoutMs below minimum, using {}ms",
                MIN_CONNECTION_TIMEOUT_MS
            );
            timeout_ms = MIN_CONNECTION_TIMEOUT_MS;
        }

        Ok(PoolSettings {
            min_idle,
            max_pool_size,
            connection_timeout: Duration::from_millis(timeout_ms),
            use_ssl: self.use_ssl,
        })
    }

    /// Validate the datasource layout of this database and return its backend.
    ///
    /// Returns `None` for auto-discovered databases, whose backend is only
    /// known after discovery.
    pub fn validate(&self) -> DbResult<Option<DatabaseType>> {
        if self.name.trim().is_empty() {
            return Err(DbError::configuration("database name cannot be empty"));
        }
        self.pool_settings()?;

        if self.is_auto_discover() {
            return Ok(None);
        }

        let mut names = HashSet::new();
        let mut masters = 0usize;
        let mut db_type: Option<DatabaseType> = None;

        for ds in &self.datasources {
            if !names.insert(ds.name.as_str()) {
                return Err(DbError::configuration(format!(
                    "database '{}': duplicate datasource name '{}'",
                    self.name, ds.name
                )));
            }
            match ds.role {
                Role::Master => masters += 1,
                Role::Replica if self.master_only => {
                    return Err(DbError::configuration(format!(
                        "database '{}' is masterOnly but declares replica '{}'",
                        self.name, ds.name
                    )));
                }
                Role::Replica => {}
            }

            let ds_type = ds.db_type().ok_or_else(|| {
                DbError::configuration(format!(
                    "datasource '{}': unknown database type in url '{}'",
                    ds.name,
                    ds.masked_url()
                ))
            })?;
            match db_type {
                None => db_type = Some(ds_type),
                Some(existing) if existing != ds_type => {
                    return Err(DbError::configuration(format!(
                        "database '{}' mixes {} and {} datasources",
                        self.name, existing, ds_type
                    )));
                }
                Some(_) => {}
            }
        }

        match masters {
            0 => Err(DbError::configuration(format!(
                "database '{}' has no master datasource",
                self.name
            ))),
            1 => Ok(db_type),
            n => Err(DbError::configuration(format!(
                "database '{}' declares {} masters; multi-master is not supported",
                self.name, n
            ))),
        }
    }
}

/// Validate a whole database file and pick the default database.
///
/// A single database is the default on its own. With several, exactly one
/// must be flagged.
pub fn resolve_default_database(databases: &[DatabaseProperties]) -> DbResult<Option<String>> {
    let mut seen = HashSet::new();
    for db in databases {
        db.validate()?;
        if !seen.insert(db.name.as_str()) {
            return Err(DbError::configuration(format!(
                "duplicate database name '{}'",
                db.name
            )));
        }
    }
    for db in databases {
        let schema = db.schema_or_name();
        if schema != db.name && seen.contains(schema) {
            return Err(DbError::configuration(format!(
                "schema '{}' of database '{}' collides with another database name",
                schema, db.name
            )));
        }
    }

    let defaults: Vec<&str> = databases
        .iter()
        .filter(|db| db.default_database)
        .map(|db| db.name.as_str())
        .collect();

    match (databases.len(), defaults.as_slice()) {
        (0, _) => Ok(None),
        (1, _) => Ok(Some(databases[0].name.clone())),
        (_, [name]) => Ok(Some(name.to_string())),
        (_, []) => Err(DbError::configuration(
            "multiple databases configured but none is marked default",
        )),
        (_, names) => Err(DbError::configuration(format!(
            "only one default database allowed, found: {}",
            names.join(", ")
        ))),
    }
}

/// Read the database file.
pub fn load_database_file(path: &Path) -> DbResult<Vec<DatabaseProperties>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DbError::configuration(format!(
            "cannot read database file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_database_file(&content)
}

/// Parse database file content.
pub fn parse_database_file(content: &str) -> DbResult<Vec<DatabaseProperties>> {
    serde_json::from_str(content)
        .map_err(|e| DbError::configuration(format!("invalid database file: {}", e)))
}

/// Options shared by the statement commands.
#[derive(Debug, Clone, Args)]
pub struct StatementArgs {
    /// SQL statement
    #[arg(long)]
    pub sql: String,

    /// Target logical database (default: the configured default)
    #[arg(long)]
    pub database: Option<String>,

    /// Force the master datasource
    #[arg(long)]
    pub master: bool,

    /// Treat the statement as part of an active transaction
    #[arg(long)]
    pub transaction: bool,

    /// Positional parameter as a JSON literal, repeatable (e.g. --param 42 --param '"abc"')
    #[arg(long = "param", value_name = "JSON")]
    pub params: Vec<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Connect every datasource, report pool status and exit
    Check,
    /// Show where a statement would be routed
    Route(StatementArgs),
    /// Execute a statement and print the result as JSON
    Exec(StatementArgs),
}

/// Process configuration from CLI arguments and environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "db-router", version, about)]
pub struct Config {
    /// Path to the JSON database file
    #[arg(long, default_value = DEFAULT_DB_FILE, env = "DB_FILE")]
    pub db_file: PathBuf,

    /// Statement timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_STATEMENT_TIMEOUT_SECS,
        env = "DB_ROUTER_STATEMENT_TIMEOUT"
    )]
    pub statement_timeout: u64,

    /// Attempts per pool when connecting at startup
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_ATTEMPTS,
        env = "DB_ROUTER_CONNECT_ATTEMPTS"
    )]
    pub connect_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_ROUTER_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_ROUTER_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            db_file: PathBuf::from(DEFAULT_DB_FILE),
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT_SECS,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            log_level: "info".to_string(),
            json_logs: false,
            command: Command::Check,
        }
    }

    /// Get the statement timeout as a Duration.
    pub fn statement_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.statement_timeout)
    }

    /// Load and validate the database file named by `db_file`.
    pub fn load_databases(&self) -> DbResult<Vec<DatabaseProperties>> {
        let databases = load_database_file(&self.db_file)?;
        resolve_default_database(&databases)?;
        Ok(databases)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
