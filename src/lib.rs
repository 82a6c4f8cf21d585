//! # dbset
//!
//! Dictionary-shaped CRUD and upsert over SQL databases, with automatic
//! schema evolution.
//!
//! Rows are plain maps of column name to [`Value`]. Writing a row to a table
//! that does not exist creates it; writing a column the table lacks adds it,
//! with the column type inferred from the value. Reads filter with a small
//! operator grammar that is validated against the reflected table structure.
//!
//! ## Features
//!
//! - **Backends**: PostgreSQL, SQLite and MySQL/MariaDB through sqlx
//! - **Type Inference**: column types derived from values, with widening rules
//! - **Schema Evolution**: tables, columns and indexes created on demand
//! - **Filters**: comparison, set, pattern, null and range operators
//! - **Read-Only Mode**: write operations and non-SELECT raw queries rejected
//! - **Primary Keys**: auto-increment integers, UUIDs or custom generators
//! - **Blocking API**: the same operations without async, see [`blocking`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dbset::{Database, Filters, FindOptions, Operator, row};
//! use futures_util::TryStreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect_url("sqlite:///tmp/people.db").await?;
//!     let people = db.table("people");
//!
//!     // Creates the table and its columns on first write
//!     people.insert(row! { "name" => "John", "age" => 30 }).await?;
//!     people.insert(row! { "name" => "Jane", "age" => 25, "city" => "Oslo" }).await?;
//!
//!     // Insert or update keyed by name
//!     people.upsert(row! { "name" => "John", "age" => 31 }, &["name"]).await?;
//!
//!     let adults: Vec<_> = people
//!         .find(
//!             FindOptions::new()
//!                 .filters(Filters::new().op("age", Operator::Gte, 18))
//!                 .order_by("-age"),
//!         )
//!         .await?
//!         .try_collect()
//!         .await?;
//!     println!("{} adults", adults.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use dbset::{DatabaseConfig, PrimaryKeyKind};
//!
//! let config = DatabaseConfig::builder("postgres://localhost/mydb")
//!     .schema("analytics")                    // Qualify every table
//!     .primary_key_type(PrimaryKeyKind::Uuid) // VARCHAR(36) UUID keys
//!     .pool_size(10)
//!     .read_only(false)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.pool.max_connections(), 20);
//! ```

pub mod backend;
pub mod blocking;
pub mod config;
pub mod database;
pub mod error;
pub mod inference;
pub mod schema;
pub mod sql;
pub mod table;
pub mod types;
pub mod value;

// Re-export main types for convenience
pub use backend::{Dialect, RowStream, Transaction};
pub use config::{DatabaseConfig, DatabaseConfigBuilder, PoolConfig};
pub use database::Database;
pub use error::{DatasetError, Result};
pub use inference::TypeInference;
pub use schema::{ColumnInfo, IndexInfo, SchemaManager, TableStructure};
pub use table::{BatchOptions, Columns, FindOptions, IndexOptions, Table, WriteOptions};
pub use types::{
    ColumnDefinition, ColumnType, IndexDefinition, JsonFlavor, KeyGenerator, PrimaryKeyConfig,
    PrimaryKeyKind,
};
pub use value::{Row, Value};

// Re-export SQL utilities for advanced users
pub use sql::{
    Conjunction, Direction, Filter, Filters, Operator, Statement, extract_table_names,
    quote_identifier, validate_readonly, validate_tables_exist,
};
