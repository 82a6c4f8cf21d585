//! Configuration for Database
//!
//! Provides a builder pattern for configuring connection, schema and primary
//! key behavior.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::Dialect;
use crate::error::{DatasetError, Result};
use crate::types::{ColumnType, KeyGenerator, PrimaryKeyConfig, PrimaryKeyKind};
use crate::value::Value;

/// Connection pool settings (ignored for SQLite)
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Connections kept open (default: 5)
    pub size: u32,
    /// Extra connections allowed above `size` under load (default: 10)
    pub max_overflow: u32,
    /// Time to wait for a free connection (default: 30s)
    pub timeout: Duration,
    /// Maximum lifetime of a connection (default: 3600s)
    pub recycle: Duration,
    /// Check a connection is alive before handing it out (default: true)
    pub pre_ping: bool,
}

impl PoolConfig {
    /// Hard upper bound on open connections
    pub fn max_connections(&self) -> u32 {
        self.size.saturating_add(self.max_overflow).max(1)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 5,
            max_overflow: 10,
            timeout: Duration::from_secs(30),
            recycle: Duration::from_secs(3600),
            pre_ping: true,
        }
    }
}

/// Configuration for a database handle
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL; the scheme selects the backend
    pub url: String,
    /// Reject every write and DDL operation (default: false)
    pub read_only: bool,
    /// Create tables, columns and indexes on demand (default: true)
    pub ensure_schema: bool,
    /// Schema (namespace) holding the tables; backend default when unset
    pub schema: Option<String>,
    /// Primary key used for tables this handle creates
    pub primary_key: PrimaryKeyConfig,
    /// Pool settings
    pub pool: PoolConfig,
    /// Prefix length for indexes on TEXT columns, MySQL/MariaDB only (default: 255)
    pub text_index_prefix: u32,
}

impl DatabaseConfig {
    /// Create a new configuration builder
    pub fn builder(url: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::new(url)
    }

    /// Dialect selected by the URL scheme
    pub fn dialect(&self) -> Result<Dialect> {
        Dialect::from_url(&self.url)
    }
}

/// Builder for DatabaseConfig
pub struct DatabaseConfigBuilder {
    url: String,
    read_only: bool,
    ensure_schema: bool,
    schema: Option<String>,
    primary_key: Option<PrimaryKeyConfig>,
    primary_key_kind: PrimaryKeyKind,
    primary_key_column: String,
    primary_key_generator: Option<KeyGenerator>,
    primary_key_storage_type: Option<ColumnType>,
    pool: PoolConfig,
    text_index_prefix: u32,
}

impl DatabaseConfigBuilder {
    /// Create a new builder with the database URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read_only: false,
            ensure_schema: true,
            schema: None,
            primary_key: None,
            primary_key_kind: PrimaryKeyKind::Integer,
            primary_key_column: "id".to_string(),
            primary_key_generator: None,
            primary_key_storage_type: None,
            pool: PoolConfig::default(),
            text_index_prefix: 255,
        }
    }

    /// Enable or disable read-only mode (default: false)
    pub fn read_only(mut self, enabled: bool) -> Self {
        self.read_only = enabled;
        self
    }

    /// Enable or disable on-demand schema changes (default: true)
    pub fn ensure_schema(mut self, enabled: bool) -> Self {
        self.ensure_schema = enabled;
        self
    }

    /// Set the schema (namespace) holding the tables
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Use a fully built primary key configuration
    ///
    /// Overrides the individual `primary_key_*` settings.
    pub fn primary_key(mut self, primary_key: PrimaryKeyConfig) -> Self {
        self.primary_key = Some(primary_key);
        self
    }

    /// Set the primary key kind (default: integer)
    pub fn primary_key_type(mut self, kind: PrimaryKeyKind) -> Self {
        self.primary_key_kind = kind;
        self
    }

    /// Set the primary key column name (default: "id")
    pub fn primary_key_column(mut self, column: impl Into<String>) -> Self {
        self.primary_key_column = column.into();
        self
    }

    /// Set the key generator for uuid or custom keys
    pub fn primary_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.primary_key_generator = Some(Arc::new(generator));
        self
    }

    /// Set the storage type for custom keys
    pub fn primary_key_storage_type(mut self, column_type: ColumnType) -> Self {
        self.primary_key_storage_type = Some(column_type);
        self
    }

    /// Set the number of pooled connections (default: 5)
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool.size = size;
        self
    }

    /// Set the extra connections allowed under load (default: 10)
    pub fn max_overflow(mut self, overflow: u32) -> Self {
        self.pool.max_overflow = overflow;
        self
    }

    /// Set the connection acquire timeout (default: 30s)
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool.timeout = timeout;
        self
    }

    /// Set the connection recycle age (default: 3600s)
    pub fn pool_recycle(mut self, recycle: Duration) -> Self {
        self.pool.recycle = recycle;
        self
    }

    /// Enable or disable liveness checks on checkout (default: true)
    pub fn pool_pre_ping(mut self, enabled: bool) -> Self {
        self.pool.pre_ping = enabled;
        self
    }

    /// Set the MySQL/MariaDB prefix length for TEXT indexes (default: 255)
    pub fn text_index_prefix(mut self, length: u32) -> Self {
        self.text_index_prefix = length;
        self
    }

    /// Build the configuration
    ///
    /// Fails for an unsupported URL scheme, a custom primary key missing its
    /// generator or storage type, or a zero index prefix.
    pub fn build(self) -> Result<DatabaseConfig> {
        Dialect::from_url(&self.url)?;

        if self.text_index_prefix == 0 {
            return Err(DatasetError::config("text_index_prefix must be greater than zero"));
        }

        let primary_key = match self.primary_key {
            Some(primary_key) => primary_key,
            None => PrimaryKeyConfig::new(
                self.primary_key_kind,
                self.primary_key_column,
                self.primary_key_generator,
                self.primary_key_storage_type,
            )?,
        };

        Ok(DatabaseConfig {
            url: self.url,
            read_only: self.read_only,
            ensure_schema: self.ensure_schema,
            schema: self.schema,
            primary_key,
            pool: self.pool,
            text_index_prefix: self.text_index_prefix,
        })
    }
}

impl fmt::Debug for DatabaseConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfigBuilder")
            .field("url", &self.url)
            .field("read_only", &self.read_only)
            .field("ensure_schema", &self.ensure_schema)
            .field("schema", &self.schema)
            .field("primary_key_kind", &self.primary_key_kind)
            .field("primary_key_column", &self.primary_key_column)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Default Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::builder("sqlite::memory:").build().unwrap();

        assert_eq!(config.url, "sqlite::memory:");
        assert!(!config.read_only);
        assert!(config.ensure_schema);
        assert_eq!(config.schema, None);
        assert_eq!(config.primary_key.kind(), PrimaryKeyKind::Integer);
        assert_eq!(config.primary_key.column_name(), "id");
        assert_eq!(config.text_index_prefix, 255);
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn test_pool_defaults() {
        let pool = PoolConfig::default();
        assert_eq!(pool.size, 5);
        assert_eq!(pool.max_overflow, 10);
        assert_eq!(pool.timeout, Duration::from_secs(30));
        assert_eq!(pool.recycle, Duration::from_secs(3600));
        assert!(pool.pre_ping);
        assert_eq!(pool.max_connections(), 15);
    }

    #[test]
    fn test_builder_accepts_string() {
        let config = DatabaseConfig::builder(String::from("postgres://localhost/db"))
            .build()
            .unwrap();
        assert_eq!(config.dialect().unwrap(), Dialect::Postgres);
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_unsupported_scheme() {
        let err = DatabaseConfig::builder("mongodb://localhost/db").build().unwrap_err();
        assert!(matches!(err, DatasetError::Config(_)));
    }

    #[test]
    fn test_custom_pk_requires_generator() {
        let err = DatabaseConfig::builder("sqlite::memory:")
            .primary_key_type(PrimaryKeyKind::Custom)
            .primary_key_storage_type(ColumnType::varchar(50))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("requires generator"));
    }

    #[test]
    fn test_zero_text_index_prefix() {
        assert!(DatabaseConfig::builder("sqlite::memory:")
            .text_index_prefix(0)
            .build()
            .is_err());
    }

    // =========================================================================
    // Primary Key Configuration Tests
    // =========================================================================

    #[test]
    fn test_uuid_pk_with_custom_column() {
        let config = DatabaseConfig::builder("sqlite::memory:")
            .primary_key_type(PrimaryKeyKind::Uuid)
            .primary_key_column("user_uuid")
            .build()
            .unwrap();
        assert_eq!(config.primary_key.kind(), PrimaryKeyKind::Uuid);
        assert_eq!(config.primary_key.column_name(), "user_uuid");
        assert!(config.primary_key.generate_value().is_some());
    }

    #[test]
    fn test_custom_pk_from_parts() {
        let config = DatabaseConfig::builder("sqlite::memory:")
            .primary_key_type(PrimaryKeyKind::Custom)
            .primary_key_generator(|| Value::from("ORD-1"))
            .primary_key_storage_type(ColumnType::varchar(20))
            .build()
            .unwrap();
        assert_eq!(config.primary_key.generate_value(), Some(Value::from("ORD-1")));
        assert_eq!(config.primary_key.storage_type(), &ColumnType::varchar(20));
    }

    #[test]
    fn test_explicit_primary_key_wins() {
        let config = DatabaseConfig::builder("sqlite::memory:")
            .primary_key_type(PrimaryKeyKind::Custom)
            .primary_key(PrimaryKeyConfig::uuid())
            .build()
            .unwrap();
        assert_eq!(config.primary_key.kind(), PrimaryKeyKind::Uuid);
    }

    // =========================================================================
    // Chained Builder Tests
    // =========================================================================

    #[test]
    fn test_full_custom_config() {
        let config = DatabaseConfig::builder("mysql://localhost/test")
            .read_only(true)
            .ensure_schema(false)
            .schema("analytics")
            .pool_size(2)
            .max_overflow(0)
            .pool_timeout(Duration::from_secs(5))
            .pool_recycle(Duration::from_secs(60))
            .pool_pre_ping(false)
            .text_index_prefix(191)
            .build()
            .unwrap();

        assert!(config.read_only);
        assert!(!config.ensure_schema);
        assert_eq!(config.schema.as_deref(), Some("analytics"));
        assert_eq!(config.pool.max_connections(), 2);
        assert_eq!(config.pool.timeout, Duration::from_secs(5));
        assert!(!config.pool.pre_ping);
        assert_eq!(config.text_index_prefix, 191);
    }

    #[test]
    fn test_builder_debug() {
        let builder = DatabaseConfig::builder("sqlite::memory:");
        let debug_str = format!("{:?}", builder);
        assert!(debug_str.contains("DatabaseConfigBuilder"));
    }
}
