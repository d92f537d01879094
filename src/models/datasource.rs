//! Physical datasource models.
//!
//! A logical database is served by one master datasource and any number of
//! replicas. These types describe a single physical endpoint and the pool
//! settings shared by every endpoint of a logical database.

use super::connection::{DatabaseType, mask_connection_string};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Role a physical datasource plays inside its logical database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Master,
    #[serde(alias = "slave")]
    Replica,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Replica => "replica",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub role: Role,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl DataSourceDescriptor {
    pub fn new(name: impl Into<String>, role: Role, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            url: url.into(),
            username: None,
            password: None,
        }
    }

    /// Set credentials that override whatever the URL carries.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Backend detected from the URL scheme.
    pub fn db_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_connection_string(&self.url)
    }

    /// URL with the password masked, safe for logs.
    pub fn masked_url(&self) -> String {
        mask_connection_string(&self.url)
    }
}

impl std::fmt::Debug for DataSourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceDescriptor")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("url", &self.masked_url())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .finish()
    }
}

/// Pool settings shared by all datasources of one logical database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_idle: u32,
    pub max_pool_size: u32,
    pub connection_timeout: Duration,
    pub use_ssl: bool,
}

impl PoolSettings {
    pub fn connection_timeout_ms(&self) -> u64 {
        self.connection_timeout.as_millis() as u64
    }
}
