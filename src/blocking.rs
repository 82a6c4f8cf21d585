//! Blocking facade
//!
//! Synchronous wrappers over [`crate::Database`] and [`crate::Table`]. Each
//! database handle owns a current-thread Tokio runtime and drives the async
//! implementation with `block_on`, so these types must not be used from
//! inside an async context.
//!
//! ```rust,no_run
//! use dbset::blocking::Database;
//! use dbset::{Filters, row};
//!
//! # fn main() -> dbset::Result<()> {
//! let db = Database::connect_url("sqlite::memory:")?;
//! let users = db.table("users");
//! users.insert(row! { "name" => "Ada" })?;
//!
//! for user in users.find(Filters::new())? {
//!     println!("{:?}", user?);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::runtime::Runtime;

use crate::backend::{Dialect, RowStream};
use crate::config::DatabaseConfig;
use crate::error::{DatasetError, Result};
use crate::sql::{Filters, Statement};
use crate::table::{BatchOptions, Columns, FindOptions, IndexOptions, WriteOptions};
use crate::value::{Row, Value};

fn runtime() -> Result<Arc<Runtime>> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| DatasetError::Connection(format!("Failed to start runtime: {}", e)))
}

// ============================================================================
// Rows
// ============================================================================

/// Blocking row iterator; each `next()` pulls one row through the runtime
pub struct Rows {
    stream: RowStream,
    runtime: Arc<Runtime>,
}

impl Iterator for Rows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows").finish_non_exhaustive()
    }
}

// ============================================================================
// Database
// ============================================================================

/// Blocking database handle
#[derive(Debug, Clone)]
pub struct Database {
    inner: crate::Database,
    runtime: Arc<Runtime>,
}

impl Database {
    pub fn connect(config: DatabaseConfig) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(crate::Database::connect(config))?;
        Ok(Self { inner, runtime })
    }

    pub fn connect_url(url: impl Into<String>) -> Result<Self> {
        Self::connect(DatabaseConfig::builder(url).build()?)
    }

    pub fn table(&self, name: &str) -> Table {
        Table {
            inner: self.inner.table(name),
            runtime: self.runtime.clone(),
        }
    }

    pub fn query(&self, sql: &str, params: &Row) -> Result<Rows> {
        let stream = self.inner.query(sql, params)?;
        Ok(self.rows(stream))
    }

    pub fn query_statement(&self, stmt: Statement) -> Rows {
        self.rows(self.inner.query_statement(stmt))
    }

    pub fn check_query_tables(&self, sql: &str) -> Result<()> {
        self.runtime.block_on(self.inner.check_query_tables(sql))
    }

    /// Run `f` inside a transaction; commits on `Ok`, rolls back on `Err`
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut tx = self.begin()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(
                        error = %rollback,
                        "Rollback after failed transaction body failed"
                    );
                }
                Err(e)
            }
        }
    }

    pub fn begin(&self) -> Result<Transaction> {
        let inner = self.runtime.block_on(self.inner.begin())?;
        Ok(Transaction {
            inner: Some(inner),
            runtime: self.runtime.clone(),
        })
    }

    pub fn tables(&self) -> Result<Vec<String>> {
        self.runtime.block_on(self.inner.tables())
    }

    pub fn close(&self) {
        self.runtime.block_on(self.inner.close())
    }

    pub fn read_only(&self) -> bool {
        self.inner.read_only()
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    pub fn config(&self) -> &DatabaseConfig {
        self.inner.config()
    }

    /// The async handle sharing this database's pool
    pub fn as_async(&self) -> &crate::Database {
        &self.inner
    }

    fn rows(&self, stream: RowStream) -> Rows {
        Rows {
            stream,
            runtime: self.runtime.clone(),
        }
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Blocking transaction; dropping it without committing rolls it back
#[derive(Debug)]
pub struct Transaction {
    inner: Option<crate::Transaction>,
    runtime: Arc<Runtime>,
}

impl Transaction {
    fn inner(&mut self) -> Result<&mut crate::Transaction> {
        self.inner
            .as_mut()
            .ok_or_else(|| DatasetError::transaction("Transaction already finished"))
    }

    pub fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        let runtime = self.runtime.clone();
        runtime.block_on(self.inner()?.execute(stmt))
    }

    pub fn fetch_all(&mut self, stmt: &Statement) -> Result<Vec<Row>> {
        let runtime = self.runtime.clone();
        runtime.block_on(self.inner()?.fetch_all(stmt))
    }

    pub fn query(&mut self, sql: &str, params: &Row) -> Result<Vec<Row>> {
        let runtime = self.runtime.clone();
        runtime.block_on(self.inner()?.query(sql, params))
    }

    pub fn commit(mut self) -> Result<()> {
        match self.inner.take() {
            Some(tx) => self.runtime.block_on(tx.commit()),
            None => Err(DatasetError::transaction("Transaction already finished")),
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        match self.inner.take() {
            Some(tx) => self.runtime.block_on(tx.rollback()),
            None => Err(DatasetError::transaction("Transaction already finished")),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // The pooled connection must be released inside the runtime
        if let Some(tx) = self.inner.take() {
            if let Err(e) = self.runtime.block_on(tx.rollback()) {
                tracing::warn!(error = %e, "Rollback of dropped transaction failed");
            }
        }
    }
}

// ============================================================================
// Table
// ============================================================================

/// Blocking table handle
#[derive(Debug, Clone)]
pub struct Table {
    inner: crate::Table,
    runtime: Arc<Runtime>,
}

impl Table {
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn insert(&self, row: Row) -> Result<Value> {
        self.runtime.block_on(self.inner.insert(row))
    }

    pub fn insert_with(&self, row: Row, options: WriteOptions) -> Result<Value> {
        self.runtime.block_on(self.inner.insert_with(row, options))
    }

    pub fn insert_many(&self, rows: Vec<Row>, options: BatchOptions) -> Result<u64> {
        self.runtime.block_on(self.inner.insert_many(rows, options))
    }

    pub fn update(&self, row: Row, keys: &[&str], filters: Filters) -> Result<u64> {
        self.runtime.block_on(self.inner.update(row, keys, filters))
    }

    pub fn upsert(&self, row: Row, keys: &[&str]) -> Result<Option<Value>> {
        self.runtime.block_on(self.inner.upsert(row, keys))
    }

    pub fn upsert_with(
        &self,
        row: Row,
        keys: &[&str],
        options: WriteOptions,
    ) -> Result<Option<Value>> {
        self.runtime.block_on(self.inner.upsert_with(row, keys, options))
    }

    pub fn upsert_many(&self, rows: Vec<Row>, keys: &[&str], options: BatchOptions) -> Result<u64> {
        self.runtime.block_on(self.inner.upsert_many(rows, keys, options))
    }

    pub fn delete(&self, filters: Filters) -> Result<u64> {
        self.runtime.block_on(self.inner.delete(filters))
    }

    pub fn find(&self, options: impl Into<FindOptions>) -> Result<Rows> {
        let stream = self.runtime.block_on(self.inner.find(options))?;
        Ok(self.rows(stream))
    }

    pub fn find_one(&self, filters: Filters) -> Result<Option<Row>> {
        self.runtime.block_on(self.inner.find_one(filters))
    }

    pub fn all(&self) -> Result<Rows> {
        let stream = self.runtime.block_on(self.inner.all())?;
        Ok(self.rows(stream))
    }

    pub fn count(&self, filters: Filters) -> Result<u64> {
        self.runtime.block_on(self.inner.count(filters))
    }

    pub fn distinct(&self, columns: impl Into<Columns>, filters: Filters) -> Result<Rows> {
        let stream = self.runtime.block_on(self.inner.distinct(columns, filters))?;
        Ok(self.rows(stream))
    }

    pub fn create_index(
        &self,
        columns: impl Into<Columns>,
        options: IndexOptions,
    ) -> Result<String> {
        self.runtime.block_on(self.inner.create_index(columns, options))
    }

    pub fn has_index(&self, columns: impl Into<Columns>) -> Result<bool> {
        self.runtime.block_on(self.inner.has_index(columns))
    }

    pub fn columns(&self) -> Result<Vec<String>> {
        self.runtime.block_on(self.inner.columns())
    }

    pub fn exists(&self) -> Result<bool> {
        self.runtime.block_on(self.inner.exists())
    }

    pub fn drop(&self) -> Result<()> {
        self.runtime.block_on(self.inner.drop())
    }

    fn rows(&self, stream: RowStream) -> Rows {
        Rows {
            stream,
            runtime: self.runtime.clone(),
        }
    }
}
