//! Logical database registry and pool manager.
//!
//! Every logical database owns exactly one master pool and zero or more
//! replica pools. The registry is built once at startup, is read-only
//! afterwards, and is shared behind an `Arc` without locks.

use crate::config::{DatabaseProperties, resolve_default_database};
use crate::db::pool::{DbConnection, DbPool, connect_pool};
use crate::error::{DbError, DbResult};
use crate::models::{DataSourceDescriptor, DatabaseType, PoolSettings, Role};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Supplies datasources for databases that list none.
pub trait DataSourceDiscover: Send + Sync {
    fn discover(&self, database: &str) -> DbResult<Vec<DataSourceDescriptor>>;
}

/// Discovers a single combined datasource from the environment.
///
/// Looks up `DB_URL_<NAME>` (upper-cased, `-` and `.` become `_`) and then
/// `DATABASE_URL`. The discovered datasource is the master and, with no
/// replicas, also serves reads.
#[derive(Debug, Clone, Default)]
pub struct EnvDataSourceDiscover;

impl EnvDataSourceDiscover {
    pub fn env_key(database: &str) -> String {
        let normalized: String = database
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("DB_URL_{}", normalized)
    }
}

impl DataSourceDiscover for EnvDataSourceDiscover {
    fn discover(&self, database: &str) -> DbResult<Vec<DataSourceDescriptor>> {
        let url = std::env::var(Self::env_key(database))
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| {
                DbError::configuration(format!(
                    "database '{}' lists no datasources and neither {} nor DATABASE_URL is set",
                    database,
                    Self::env_key(database)
                ))
            })?;
        Ok(vec![DataSourceDescriptor::new(database, Role::Master, url)])
    }
}

/// A physical datasource with its live pool.
#[derive(Debug)]
pub struct DataSource {
    descriptor: DataSourceDescriptor,
    pool: DbPool,
}

impl DataSource {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn role(&self) -> Role {
        self.descriptor.role
    }

    pub fn descriptor(&self) -> &DataSourceDescriptor {
        &self.descriptor
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// One logical database.
#[derive(Debug)]
pub struct LogicalDatabase {
    name: String,
    schema: String,
    master_only: bool,
    db_type: DatabaseType,
    settings: PoolSettings,
    master: DataSource,
    replicas: Vec<DataSource>,
    next_replica: AtomicUsize,
}

impl LogicalDatabase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn is_master_only(&self) -> bool {
        self.master_only
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn master(&self) -> &DataSource {
        &self.master
    }

    pub fn replicas(&self) -> &[DataSource] {
        &self.replicas
    }

    /// Pick the datasource serving `role`.
    ///
    /// Replicas rotate round-robin; a master-only database or one without
    /// replicas serves reads from its master.
    pub fn select(&self, role: Role) -> &DataSource {
        match role {
            Role::Master => &self.master,
            Role::Replica if self.master_only || self.replicas.is_empty() => &self.master,
            Role::Replica => {
                let idx = self.next_replica.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
                &self.replicas[idx]
            }
        }
    }

    fn datasources(&self) -> impl Iterator<Item = &DataSource> {
        std::iter::once(&self.master).chain(self.replicas.iter())
    }
}

/// A connection bound to the datasource that produced it.
///
/// Dropping it returns the connection to its pool.
#[derive(Debug)]
pub struct RoutedConnection {
    connection: DbConnection,
    database: String,
    datasource: String,
    role: Role,
}

impl RoutedConnection {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn datasource(&self) -> &str {
        &self.datasource
    }

    /// Role of the datasource actually serving the connection.
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connection_mut(&mut self) -> &mut DbConnection {
        &mut self.connection
    }
}

/// Status line for one datasource.
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceStatus {
    pub database: String,
    pub datasource: String,
    pub role: Role,
    pub db_type: DatabaseType,
    pub size: u32,
    pub idle: usize,
}

/// Builder for [`DatabaseRegistry`].
pub struct RegistryBuilder {
    connect_attempts: u32,
    discover: Arc<dyn DataSourceDiscover>,
}

impl RegistryBuilder {
    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    pub fn discover(mut self, discover: Arc<dyn DataSourceDiscover>) -> Self {
        self.discover = discover;
        self
    }

    /// Validate every database, then connect every datasource.
    ///
    /// On failure the pools created so far are closed before returning.
    pub async fn build(self, databases: Vec<DatabaseProperties>) -> DbResult<DatabaseRegistry> {
        let default_database = resolve_default_database(&databases)?;

        let mut registry = DatabaseRegistry {
            databases: HashMap::new(),
            default_database,
        };

        for props in databases {
            match self.connect_database(props).await {
                Ok(db) => {
                    registry.databases.insert(db.name.clone(), db);
                }
                Err(e) => {
                    registry.close_all().await;
                    return Err(e);
                }
            }
        }

        info!(
            databases = registry.databases.len(),
            default = ?registry.default_database,
            "Database registry ready"
        );
        Ok(registry)
    }

    async fn connect_database(&self, mut props: DatabaseProperties) -> DbResult<LogicalDatabase> {
        if props.is_auto_discover() {
            props.datasources = self.discover.discover(&props.name)?;
            info!(
                database = %props.name,
                datasources = props.datasources.len(),
                "Discovered datasources"
            );
        }
        let db_type = props.validate()?.ok_or_else(|| {
            DbError::configuration(format!(
                "database '{}' has no datasources after discovery",
                props.name
            ))
        })?;
        let settings = props.pool_settings()?;

        let mut master: Option<DataSource> = None;
        let mut replicas: Vec<DataSource> = Vec::new();
        for descriptor in &props.datasources {
            let pool = match connect_pool(descriptor, &settings, self.connect_attempts).await {
                Ok(pool) => pool,
                Err(e) => {
                    for ds in master.iter().chain(replicas.iter()) {
                        ds.pool.close().await;
                    }
                    return Err(e);
                }
            };
            let ds = DataSource {
                descriptor: descriptor.clone(),
                pool,
            };
            match descriptor.role {
                Role::Master => master = Some(ds),
                Role::Replica => replicas.push(ds),
            }
        }

        // validate() guarantees exactly one master
        let master = master.ok_or_else(|| {
            DbError::internal(format!("database '{}' lost its master", props.name))
        })?;

        Ok(LogicalDatabase {
            schema: props.schema_or_name().to_string(),
            name: props.name,
            master_only: props.master_only,
            db_type,
            settings,
            master,
            replicas,
            next_replica: AtomicUsize::new(0),
        })
    }
}

/// All logical databases of the process.
#[derive(Debug)]
pub struct DatabaseRegistry {
    databases: HashMap<String, LogicalDatabase>,
    default_database: Option<String>,
}

impl DatabaseRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            connect_attempts: crate::config::DEFAULT_CONNECT_ATTEMPTS,
            discover: Arc::new(EnvDataSourceDiscover),
        }
    }

    /// Build with default options.
    pub async fn connect(databases: Vec<DatabaseProperties>) -> DbResult<Self> {
        Self::builder().build(databases).await
    }

    pub fn default_database(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    pub fn database_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.databases.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up a logical database by name or schema; `None` means the default.
    pub fn resolve(&self, name: Option<&str>) -> DbResult<&LogicalDatabase> {
        let name = match name.or(self.default_database.as_deref()) {
            Some(name) => name,
            None => {
                return Err(DbError::routing(
                    "no database named for the statement and no default database configured",
                ));
            }
        };

        self.databases
            .get(name)
            .or_else(|| self.databases.values().find(|db| db.schema == name))
            .ok_or_else(|| {
                DbError::routing(format!(
                    "unknown database '{}'; configured: {}",
                    name,
                    self.database_names().join(", ")
                ))
            })
    }

    /// Check out a connection for `role` on a logical database.
    pub async fn acquire(&self, database: Option<&str>, role: Role) -> DbResult<RoutedConnection> {
        let db = self.resolve(database)?;
        let ds = db.select(role);

        debug!(
            database = %db.name,
            requested = %role,
            datasource = %ds.name(),
            "Acquiring connection"
        );

        let connection = ds.pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => {
                warn!(
                    database = %db.name,
                    datasource = %ds.name(),
                    timeout_ms = db.settings.connection_timeout_ms(),
                    "Connection pool exhausted"
                );
                DbError::pool_exhausted(
                    db.name.clone(),
                    ds.role().as_str(),
                    db.settings.connection_timeout_ms(),
                )
            }
            other => DbError::from(other),
        })?;

        Ok(RoutedConnection {
            connection,
            database: db.name.clone(),
            datasource: ds.name().to_string(),
            role: ds.role(),
        })
    }

    /// Pool status of every datasource, sorted by database then datasource.
    pub fn status(&self) -> Vec<DataSourceStatus> {
        let mut status: Vec<DataSourceStatus> = self
            .databases
            .values()
            .flat_map(|db| {
                db.datasources().map(move |ds| DataSourceStatus {
                    database: db.name.clone(),
                    datasource: ds.name().to_string(),
                    role: ds.role(),
                    db_type: db.db_type,
                    size: ds.pool.size(),
                    idle: ds.pool.num_idle(),
                })
            })
            .collect();
        status.sort_by(|a, b| (&a.database, &a.datasource).cmp(&(&b.database, &b.datasource)));
        status
    }

    /// Close every pool.
    pub async fn close_all(&self) {
        join_all(
            self.databases
                .values()
                .flat_map(LogicalDatabase::datasources)
                .map(|ds| async move {
                    info!(datasource = %ds.name(), "Closing datasource pool");
                    ds.pool.close().await;
                }),
        )
        .await;
        info!("All datasource pools closed");
    }
}
