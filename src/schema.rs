//! Schema management
//!
//! Reflects table structures from the database and evolves them on demand:
//! creating tables, adding columns and creating indexes. Reflection results
//! are held as an immutable snapshot that every reflection replaces whole.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Dialect};
use crate::error::{DatasetError, Result};
use crate::sql::ddl::{DdlGenerator, generate_index_name};
use crate::sql::sanitize::validate_identifier;
use crate::types::{ColumnDefinition, ColumnType, IndexDefinition, PrimaryKeyConfig};

// ============================================================================
// Reflected Structures
// ============================================================================

/// A reflected column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Type as the database reports it
    pub declared_type: String,
    /// Descriptor parsed from `declared_type`, when it maps to one
    pub column_type: Option<ColumnType>,
    pub nullable: bool,
    pub primary_key: bool,
}

/// A reflected secondary index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    /// Columns in key order
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexInfo {
    /// Whether the index covers exactly `columns`, in any order
    pub fn covers(&self, columns: &[String]) -> bool {
        let mut mine: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        let mut theirs: Vec<&str> = columns.iter().map(String::as_str).collect();
        mine.sort_unstable();
        mine.dedup();
        theirs.sort_unstable();
        theirs.dedup();
        mine == theirs
    }
}

/// Reflected structure of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStructure {
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

impl TableStructure {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// First primary key column
    pub fn primary_key(&self) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// Index over exactly `columns`, ignoring order
    pub fn find_index(&self, columns: &[String]) -> Option<&IndexInfo> {
        self.indexes.iter().find(|i| i.covers(columns))
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    tables: BTreeMap<String, Arc<TableStructure>>,
}

// ============================================================================
// Schema Manager
// ============================================================================

/// Reflects and evolves the tables of one schema
#[derive(Debug)]
pub struct SchemaManager {
    backend: Backend,
    schema: Option<String>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl SchemaManager {
    /// Create a manager for `schema` (backend default when `None`)
    ///
    /// SQLite has no schemas; a configured one is ignored with a warning.
    pub fn new(backend: Backend, schema: Option<String>) -> Self {
        let schema = match (backend.dialect(), schema) {
            (Dialect::Sqlite, Some(schema)) => {
                tracing::warn!(schema = %schema, "SQLite does not support schemas; ignoring");
                None
            }
            (_, schema) => schema,
        };
        Self {
            backend,
            schema,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Effective schema used to qualify table names
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    fn ddl(&self) -> DdlGenerator<'_> {
        DdlGenerator::new(self.backend.dialect(), self.schema.as_deref())
    }

    /// Accept `schema.table` when the prefix is the configured schema
    pub(crate) fn resolve<'n>(&self, name: &'n str) -> &'n str {
        match (&self.schema, name.split_once('.')) {
            (Some(schema), Some((prefix, table))) if prefix == schema => table,
            _ => name,
        }
    }

    fn cached(&self, name: &str) -> Option<Arc<TableStructure>> {
        self.snapshot.read().tables.get(name).cloned()
    }

    /// Re-read table metadata and replace the snapshot
    pub async fn reflect(&self) -> Result<()> {
        let structures = self
            .backend
            .reflect(self.schema.as_deref())
            .await
            .map_err(|e| {
                DatasetError::schema_failure("Failed to reflect database schema", None, e)
            })?;

        let snapshot = Snapshot {
            tables: structures
                .into_iter()
                .map(|s| (s.name.clone(), Arc::new(s)))
                .collect(),
        };
        tracing::debug!(tables = snapshot.tables.len(), "Reflected database schema");
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(())
    }

    async fn reflected(&self, name: &str) -> Result<Option<Arc<TableStructure>>> {
        self.reflect().await?;
        Ok(self.cached(name))
    }

    /// Structure of `name`, creating the table when allowed
    ///
    /// Without `ensure_exists` a missing table is `TableNotFound`.
    pub async fn get_table(
        &self,
        name: &str,
        ensure_exists: bool,
        primary_key: &PrimaryKeyConfig,
    ) -> Result<Arc<TableStructure>> {
        let name = self.resolve(name);
        if let Some(structure) = self.reflected(name).await? {
            return Ok(structure);
        }
        if !ensure_exists {
            return Err(DatasetError::table_not_found(name));
        }
        self.create_table(name, &[], primary_key).await
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let name = self.resolve(name);
        Ok(self.reflected(name).await?.is_some())
    }

    /// Names of every table in the schema, sorted
    pub async fn table_names(&self) -> Result<Vec<String>> {
        self.reflect().await?;
        Ok(self.snapshot.read().tables.keys().cloned().collect())
    }

    /// Create a table with the primary key and `columns`
    pub async fn create_table(
        &self,
        name: &str,
        columns: &[ColumnDefinition],
        primary_key: &PrimaryKeyConfig,
    ) -> Result<Arc<TableStructure>> {
        let name = self.resolve(name);
        validate_identifier(name).map_err(DatasetError::validation)?;
        for column in columns {
            validate_identifier(&column.name).map_err(DatasetError::validation)?;
        }
        let sql = self.ddl().generate_create_table(name, primary_key, columns);

        self.backend.execute_ddl(&sql).await.map_err(|e| {
            let message = format!("Failed to create table '{}'", name);
            DatasetError::schema_failure(message, Some(name), e)
        })?;
        tracing::info!(table = %name, primary_key = %primary_key.column_name(), "Created table");

        self.reflected(name).await?.ok_or_else(|| {
            DatasetError::schema(format!("Table '{}' not found after creation", name), Some(name))
        })
    }

    /// Add every column of `required` the table lacks
    pub async fn ensure_columns(
        &self,
        table: &str,
        required: &[(String, ColumnType)],
    ) -> Result<Arc<TableStructure>> {
        let table = self.resolve(table);
        let mut structure = self
            .reflected(table)
            .await?
            .ok_or_else(|| DatasetError::table_not_found(table))?;

        for (column, column_type) in required {
            if !structure.has_column(column) {
                structure = self.add_column(table, column, column_type).await?;
            }
        }
        Ok(structure)
    }

    /// ALTER TABLE ... ADD COLUMN
    ///
    /// A column added concurrently by another writer counts as success.
    pub async fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: &ColumnType,
    ) -> Result<Arc<TableStructure>> {
        let table = self.resolve(table);
        validate_identifier(column).map_err(DatasetError::validation)?;
        let definition = ColumnDefinition::new(column, column_type.clone());
        let sql = self.ddl().generate_add_column(table, &definition);

        if let Err(e) = self.backend.execute_ddl(&sql).await {
            let raced = self
                .reflected(table)
                .await?
                .filter(|structure| structure.has_column(column));
            return match raced {
                Some(structure) => Ok(structure),
                None => Err(DatasetError::schema_failure(
                    format!("Failed to add column '{}' to table '{}'", column, table),
                    Some(table),
                    e,
                )),
            };
        }
        tracing::info!(
            table = %table,
            column = %column,
            column_type = %column_type,
            "Added column"
        );

        self.reflected(table).await?.ok_or_else(|| DatasetError::table_not_found(table))
    }

    /// Create an index over `columns` unless one with the same column set exists
    ///
    /// Returns the new index's name, or the existing index's name.
    pub async fn create_index(
        &self,
        table: &str,
        columns: &[String],
        name: Option<&str>,
        unique: bool,
        text_prefix: u32,
    ) -> Result<String> {
        if columns.is_empty() {
            return Err(DatasetError::query("columns list cannot be empty"));
        }

        let table = self.resolve(table);
        let structure = self
            .reflected(table)
            .await?
            .ok_or_else(|| DatasetError::table_not_found(table))?;

        for column in columns {
            if !structure.has_column(column) {
                return Err(DatasetError::column_not_found(column, table));
            }
        }

        if let Some(existing) = structure.find_index(columns) {
            tracing::debug!(table = %table, index = %existing.name, "Index already exists");
            return Ok(existing.name.clone());
        }

        let index_name = name
            .map(str::to_string)
            .unwrap_or_else(|| generate_index_name(table, columns));
        let mut index = IndexDefinition::new(index_name.clone(), columns.to_vec());
        if unique {
            index = index.unique();
        }
        if self.dialect() == Dialect::MySql {
            for column in columns {
                let is_text = structure
                    .column(column)
                    .and_then(|c| c.column_type.as_ref())
                    .is_some_and(ColumnType::is_text);
                if is_text {
                    index = index.prefix(column.clone(), text_prefix);
                }
            }
        }

        let sql = self.ddl().generate_create_index(table, &index);
        self.backend.execute_ddl(&sql).await.map_err(|e| {
            DatasetError::schema_failure(
                format!("Failed to create index '{}' on table '{}'", index_name, table),
                Some(table),
                e,
            )
        })?;
        tracing::info!(table = %table, index = %index_name, unique, "Created index");

        self.reflect().await?;
        Ok(index_name)
    }

    /// Whether an index over exactly `columns` (any order) exists
    pub async fn index_exists(&self, table: &str, columns: &[String]) -> Result<bool> {
        let table = self.resolve(table);
        Ok(self
            .reflected(table)
            .await?
            .is_some_and(|structure| structure.find_index(columns).is_some()))
    }

    /// Drop a table; `TableNotFound` when it does not exist
    pub async fn drop_table(&self, name: &str) -> Result<()> {
        let name = self.resolve(name);
        if self.reflected(name).await?.is_none() {
            return Err(DatasetError::table_not_found(name));
        }

        let sql = self.ddl().generate_drop_table(name);
        self.backend.execute_ddl(&sql).await.map_err(|e| {
            DatasetError::schema_failure(format!("Failed to drop table '{}'", name), Some(name), e)
        })?;
        tracing::info!(table = %name, "Dropped table");

        self.reflect().await
    }
}
