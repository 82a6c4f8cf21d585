//! Database backends
//!
//! Wraps the sqlx pools for PostgreSQL, SQLite and MySQL/MariaDB behind one
//! enum. Each backend module binds [`Value`]s, decodes rows back into
//! [`Row`]s and reflects table metadata.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use sqlx::{MySqlPool, PgPool, SqlitePool};

use crate::config::DatabaseConfig;
use crate::error::{DatasetError, Result};
use crate::schema::{ColumnInfo, IndexInfo, TableStructure};
use crate::sql::Statement;
use crate::types::ColumnType;
use crate::value::{Row, Value};

/// Lazily fetched, single-pass sequence of rows
pub type RowStream = BoxStream<'static, Result<Row>>;

// ============================================================================
// Dialect
// ============================================================================

/// SQL dialect of a connected backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
    /// MySQL and MariaDB
    MySql,
}

impl Dialect {
    /// Detect the dialect from a connection URL scheme
    pub fn from_url(url: &str) -> Result<Self> {
        let lower = url.trim_start().to_ascii_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if lower.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Ok(Dialect::MySql)
        } else {
            let scheme = lower.split(':').next().unwrap_or_default();
            Err(DatasetError::config(format!(
                "Unsupported database URL scheme '{}' \
                 (expected postgres, postgresql, sqlite, mysql or mariadb)",
                scheme
            )))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgresql",
            Dialect::Sqlite => "sqlite",
            Dialect::MySql => "mysql",
        }
    }

    /// Placeholder for the `index`-th (1-based) bind parameter
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", index),
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    pub fn supports_returning(&self) -> bool {
        matches!(self, Dialect::Postgres | Dialect::Sqlite)
    }

    /// Most bind parameters one statement may carry
    pub fn max_params(&self) -> usize {
        match self {
            Dialect::Postgres | Dialect::MySql => 65_535,
            Dialect::Sqlite => 32_766,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Connection pool for one of the supported databases
#[derive(Debug, Clone)]
pub enum Backend {
    Postgres(PgPool),
    Sqlite(SqlitePool),
    MySql(MySqlPool),
}

impl Backend {
    /// Open a pool for the configured URL
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let dialect = Dialect::from_url(&config.url)?;
        let backend = match dialect {
            Dialect::Postgres => postgres::connect(&config.url, &config.pool)
                .await
                .map(Backend::Postgres),
            Dialect::Sqlite => sqlite::connect(&config.url).await.map(Backend::Sqlite),
            Dialect::MySql => mysql::connect(&config.url, &config.pool).await.map(Backend::MySql),
        }
        .map_err(|e| DatasetError::Connection(format!("Database connection failed: {}", e)))?;

        tracing::debug!(dialect = %dialect, "Connected to database");
        Ok(backend)
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Backend::Postgres(_) => Dialect::Postgres,
            Backend::Sqlite(_) => Dialect::Sqlite,
            Backend::MySql(_) => Dialect::MySql,
        }
    }

    /// Execute a data statement and return the number of affected rows
    pub async fn execute(&self, stmt: &Statement) -> Result<u64> {
        tracing::trace!(sql = %stmt.sql, params = stmt.params.len(), "execute");
        let affected = match self {
            Backend::Postgres(pool) => postgres::execute(pool, stmt).await?,
            Backend::Sqlite(pool) => sqlite::execute(pool, stmt).await?,
            Backend::MySql(pool) => mysql::execute(pool, stmt).await?,
        };
        Ok(affected)
    }

    /// Execute DDL text without parameters
    pub async fn execute_ddl(&self, sql: &str) -> std::result::Result<(), sqlx::Error> {
        tracing::trace!(sql = %sql, "execute ddl");
        match self {
            Backend::Postgres(pool) => sqlx::raw_sql(sql).execute(pool).await.map(|_| ()),
            Backend::Sqlite(pool) => sqlx::raw_sql(sql).execute(pool).await.map(|_| ()),
            Backend::MySql(pool) => sqlx::raw_sql(sql).execute(pool).await.map(|_| ()),
        }
    }

    /// Run a query and decode every row
    ///
    /// `hints` supplies reflected column types so loosely typed backends can
    /// restore booleans, decimals, dates and JSON documents.
    pub async fn fetch_all(
        &self,
        stmt: &Statement,
        hints: Option<&TableStructure>,
    ) -> Result<Vec<Row>> {
        tracing::trace!(sql = %stmt.sql, params = stmt.params.len(), "fetch");
        match self {
            Backend::Postgres(pool) => postgres::fetch_all(pool, stmt).await,
            Backend::Sqlite(pool) => sqlite::fetch_all(pool, stmt, hints).await,
            Backend::MySql(pool) => mysql::fetch_all(pool, stmt, hints).await,
        }
    }

    /// Lazy row stream; the query runs on first poll
    pub fn fetch(&self, stmt: Statement, hints: Option<Arc<TableStructure>>) -> RowStream {
        let backend = self.clone();
        stream::once(async move { backend.fetch_all(&stmt, hints.as_deref()).await })
            .map_ok(|rows| stream::iter(rows.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// Execute an INSERT and return the generated key
    ///
    /// Uses the statement's `RETURNING` column where supported and the
    /// connection's last insert id on MySQL/MariaDB.
    pub async fn insert_returning(&self, stmt: &Statement) -> Result<Value> {
        tracing::trace!(sql = %stmt.sql, params = stmt.params.len(), "insert");
        match self {
            Backend::Postgres(pool) => postgres::insert_returning(pool, stmt).await,
            Backend::Sqlite(pool) => sqlite::insert_returning(pool, stmt).await,
            Backend::MySql(pool) => mysql::insert_returning(pool, stmt).await,
        }
    }

    /// Read table, column and index metadata for a schema
    pub async fn reflect(
        &self,
        schema: Option<&str>,
    ) -> std::result::Result<Vec<TableStructure>, sqlx::Error> {
        match self {
            Backend::Postgres(pool) => postgres::reflect(pool, schema).await,
            Backend::Sqlite(pool) => sqlite::reflect(pool).await,
            Backend::MySql(pool) => mysql::reflect(pool, schema).await,
        }
    }

    /// Start a transaction on a pooled connection
    pub async fn begin(&self) -> Result<Transaction> {
        let tx = match self {
            Backend::Postgres(pool) => Transaction::Postgres(pool.begin().await?),
            Backend::Sqlite(pool) => Transaction::Sqlite(pool.begin().await?),
            Backend::MySql(pool) => Transaction::MySql(pool.begin().await?),
        };
        Ok(tx)
    }

    /// Close the pool; later calls are no-ops
    pub async fn close(&self) {
        match self {
            Backend::Postgres(pool) => pool.close().await,
            Backend::Sqlite(pool) => pool.close().await,
            Backend::MySql(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Backend::Postgres(pool) => pool.is_closed(),
            Backend::Sqlite(pool) => pool.is_closed(),
            Backend::MySql(pool) => pool.is_closed(),
        }
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// An open transaction
///
/// Dropping it without calling [`Transaction::commit`] rolls it back.
#[derive(Debug)]
pub enum Transaction {
    Postgres(sqlx::Transaction<'static, sqlx::Postgres>),
    Sqlite(sqlx::Transaction<'static, sqlx::Sqlite>),
    MySql(sqlx::Transaction<'static, sqlx::MySql>),
}

impl Transaction {
    pub fn dialect(&self) -> Dialect {
        match self {
            Transaction::Postgres(_) => Dialect::Postgres,
            Transaction::Sqlite(_) => Dialect::Sqlite,
            Transaction::MySql(_) => Dialect::MySql,
        }
    }

    /// Execute a statement inside the transaction
    pub async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        let affected = match self {
            Transaction::Postgres(tx) => postgres::execute(&mut **tx, stmt).await?,
            Transaction::Sqlite(tx) => sqlite::execute(&mut **tx, stmt).await?,
            Transaction::MySql(tx) => mysql::execute(&mut **tx, stmt).await?,
        };
        Ok(affected)
    }

    /// Run a query inside the transaction and decode every row
    pub async fn fetch_all(&mut self, stmt: &Statement) -> Result<Vec<Row>> {
        match self {
            Transaction::Postgres(tx) => postgres::fetch_all(&mut **tx, stmt).await,
            Transaction::Sqlite(tx) => sqlite::fetch_all(&mut **tx, stmt, None).await,
            Transaction::MySql(tx) => mysql::fetch_all(&mut **tx, stmt, None).await,
        }
    }

    /// Run raw SQL with `:name` parameters
    pub async fn query(&mut self, sql: &str, params: &Row) -> Result<Vec<Row>> {
        let stmt = Statement::from_named(sql, params, self.dialect()).map_err(DatasetError::Query)?;
        self.fetch_all(&stmt).await
    }

    pub async fn commit(self) -> Result<()> {
        match self {
            Transaction::Postgres(tx) => tx.commit().await,
            Transaction::Sqlite(tx) => tx.commit().await,
            Transaction::MySql(tx) => tx.commit().await,
        }
        .map_err(|e| DatasetError::transaction(format!("Commit failed: {}", e)))
    }

    pub async fn rollback(self) -> Result<()> {
        match self {
            Transaction::Postgres(tx) => tx.rollback().await,
            Transaction::Sqlite(tx) => tx.rollback().await,
            Transaction::MySql(tx) => tx.rollback().await,
        }
        .map_err(|e| DatasetError::transaction(format!("Rollback failed: {}", e)))
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Reflected column: table, name, declared type, nullable, primary key
pub(crate) type RawColumn = (String, String, String, bool, bool);

/// Reflected index column: table, index, unique, column
pub(crate) type RawIndexColumn = (String, String, bool, String);

/// Group flat metadata rows into table structures
///
/// Column and index rows must arrive in ordinal order per table.
pub(crate) fn assemble(
    tables: Vec<String>,
    columns: Vec<RawColumn>,
    index_columns: Vec<RawIndexColumn>,
) -> Vec<TableStructure> {
    let mut structures: BTreeMap<String, TableStructure> = tables
        .into_iter()
        .map(|name| {
            let structure = TableStructure {
                name: name.clone(),
                columns: Vec::new(),
                indexes: Vec::new(),
            };
            (name, structure)
        })
        .collect();

    for (table, name, declared_type, nullable, primary_key) in columns {
        if let Some(structure) = structures.get_mut(&table) {
            structure.columns.push(ColumnInfo {
                column_type: ColumnType::from_sql_type(&declared_type),
                name,
                declared_type,
                nullable,
                primary_key,
            });
        }
    }

    for (table, index, unique, column) in index_columns {
        let Some(structure) = structures.get_mut(&table) else {
            continue;
        };
        match structure.indexes.iter_mut().find(|i| i.name == index) {
            Some(existing) => existing.columns.push(column),
            None => structure.indexes.push(IndexInfo {
                name: index,
                columns: vec![column],
                unique,
            }),
        }
    }

    structures.into_values().collect()
}

/// Restore a value's logical type from the reflected column type
///
/// SQLite stores booleans as integers and decimals, dates and JSON as
/// numbers or text; MariaDB reports JSON as text.
pub(crate) fn coerce(value: Value, hint: Option<&ColumnType>) -> Value {
    match (hint, value) {
        (Some(ColumnType::Boolean), Value::Int(i)) => Value::Bool(i != 0),
        (Some(ColumnType::Float), Value::Int(i)) => Value::Float(i as f64),
        (Some(ColumnType::Numeric { .. }), Value::Int(i)) => Value::Decimal(Decimal::from(i)),
        (Some(ColumnType::Numeric { .. }), Value::Float(f)) => {
            decimal_from_f64(f).map(Value::Decimal).unwrap_or(Value::Float(f))
        }
        (Some(ColumnType::Numeric { .. }), Value::Text(s)) => match Decimal::from_str(s.trim()) {
            Ok(d) => Value::Decimal(d),
            Err(_) => Value::Text(s),
        },
        (Some(ColumnType::Date), Value::Text(s)) => match parse_date(&s) {
            Some(d) => Value::Date(d),
            None => Value::Text(s),
        },
        (Some(ColumnType::DateTime), Value::Text(s)) => match parse_datetime(&s) {
            Some(dt) => Value::DateTime(dt),
            None => Value::Text(s),
        },
        (Some(ColumnType::Json { .. }), Value::Text(s)) => match serde_json::from_str(&s) {
            Ok(doc) => Value::Json(doc),
            Err(_) => Value::Text(s),
        },
        (_, value) => value,
    }
}

/// Shortest decimal that prints like the float
fn decimal_from_f64(f: f64) -> Option<Decimal> {
    Decimal::from_str(&f.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(f))
}

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S%.f";

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Column types of a reflected table, by column name
pub(crate) fn column_hint<'a>(
    hints: Option<&'a TableStructure>,
    column: &str,
) -> Option<&'a ColumnType> {
    hints
        .and_then(|structure| structure.column(column))
        .and_then(|info| info.column_type.as_ref())
}
