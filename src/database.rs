//! Database facade
//!
//! Owns the connection pool and schema manager, hands out [`Table`] handles
//! and runs raw queries and transactions.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::backend::{Backend, Dialect, RowStream, Transaction};
use crate::config::DatabaseConfig;
use crate::error::{DatasetError, Result};
use crate::schema::SchemaManager;
use crate::sql::{Statement, validate_readonly, validate_tables_exist};
use crate::table::Table;
use crate::value::Row;

/// State shared by a database handle and its tables
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) backend: Backend,
    pub(crate) schema: SchemaManager,
    pub(crate) config: DatabaseConfig,
}

/// Handle to a connected database
///
/// Cloning is cheap; clones share the pool, schema snapshot and table
/// handles.
///
/// ```rust,no_run
/// use dbset::{Database, Filters, row};
///
/// # async fn example() -> dbset::Result<()> {
/// let db = Database::connect_url("sqlite::memory:").await?;
/// let users = db.table("users");
///
/// users.insert(row! { "name" => "Ada", "age" => 36 }).await?;
/// let ada = users.find_one(Filters::new().eq("name", "Ada")).await?;
/// assert!(ada.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    shared: Arc<Shared>,
    tables: Arc<Mutex<HashMap<String, Table>>>,
}

impl Database {
    /// Connect using a full configuration
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        let backend = Backend::connect(&config).await?;
        let schema = SchemaManager::new(backend.clone(), config.schema.clone());

        tracing::info!(
            dialect = %backend.dialect(),
            read_only = config.read_only,
            ensure_schema = config.ensure_schema,
            "Database connected"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                schema,
                config,
            }),
            tables: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Connect with default settings
    pub async fn connect_url(url: impl Into<String>) -> Result<Self> {
        Self::connect(DatabaseConfig::builder(url).build()?).await
    }

    /// Handle for `name`; the same handle is returned for repeated calls
    ///
    /// No database access happens until the handle is used.
    pub fn table(&self, name: &str) -> Table {
        let name = self.shared.schema.resolve(name);
        self.tables
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Table::new(name.to_string(), self.shared.clone()))
            .clone()
    }

    /// Run raw SQL with `:name` parameters
    ///
    /// In read-only mode the text must pass [`validate_readonly`] first.
    pub fn query(&self, sql: &str, params: &Row) -> Result<RowStream> {
        if self.shared.config.read_only {
            validate_readonly(sql).map_err(DatasetError::Query)?;
        }
        let stmt = Statement::from_named(sql, params, self.dialect()).map_err(DatasetError::Query)?;
        Ok(self.shared.backend.fetch(stmt, None))
    }

    /// Run a pre-built statement without text validation
    pub fn query_statement(&self, stmt: Statement) -> RowStream {
        self.shared.backend.fetch(stmt, None)
    }

    /// Fail with a validation error naming tables `sql` references that
    /// do not exist
    pub async fn check_query_tables(&self, sql: &str) -> Result<()> {
        let existing = self.tables().await?;
        let missing = validate_tables_exist(sql, &existing);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DatasetError::validation(format!("Tables not found: {}", missing.join(", "))))
        }
    }

    /// Run `f` inside a transaction
    ///
    /// Commits when `f` returns `Ok` and rolls back when it returns `Err`.
    ///
    /// ```rust,no_run
    /// use dbset::{Database, Row, Statement, Value};
    ///
    /// # async fn example(db: Database) -> dbset::Result<()> {
    /// let moved = db
    ///     .transaction(|tx| {
    ///         Box::pin(async move {
    ///             let debit = Statement::with_params(
    ///                 "UPDATE accounts SET balance = balance - 10 WHERE id = ?",
    ///                 vec![Value::Int(1)],
    ///             );
    ///             tx.execute(&debit).await
    ///         })
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T>>,
    {
        let mut tx = self.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(
                        error = %rollback,
                        "Rollback after failed transaction body failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Start a manual transaction
    ///
    /// Dropping it without committing rolls it back.
    pub async fn begin(&self) -> Result<Transaction> {
        if self.shared.config.read_only {
            return Err(DatasetError::read_only("TRANSACTION"));
        }
        self.shared.backend.begin().await
    }

    /// Names of the tables in the configured schema
    pub async fn tables(&self) -> Result<Vec<String>> {
        self.shared.schema.table_names().await
    }

    /// Close the pool; later calls are no-ops
    pub async fn close(&self) {
        if self.shared.backend.is_closed() {
            return;
        }
        self.shared.backend.close().await;
        self.tables.lock().clear();
        tracing::info!("Database closed");
    }

    pub fn read_only(&self) -> bool {
        self.shared.config.read_only
    }

    pub fn dialect(&self) -> Dialect {
        self.shared.backend.dialect()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }
}
