//! DDL Generation for Dynamic Schema Management
//!
//! Generates CREATE TABLE, ALTER TABLE ADD COLUMN, CREATE INDEX and DROP
//! TABLE statements for the configured dialect and schema.

use sha2::{Digest, Sha256};

use crate::backend::Dialect;
use crate::sql::sanitize::{qualified_name, quote_identifier};
use crate::types::{ColumnDefinition, IndexDefinition, PrimaryKeyConfig, PrimaryKeyKind};

/// Longest identifier PostgreSQL accepts without truncating
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

const HASH_SUFFIX_LENGTH: usize = 8;

/// DDL Generator for dynamically managed tables
pub struct DdlGenerator<'a> {
    dialect: Dialect,
    schema: Option<&'a str>,
}

impl<'a> DdlGenerator<'a> {
    /// Create a new DDL generator; `schema` qualifies every table name
    pub fn new(dialect: Dialect, schema: Option<&'a str>) -> Self {
        Self { dialect, schema }
    }

    fn table(&self, table_name: &str) -> String {
        qualified_name(self.schema, table_name, self.dialect)
    }

    /// Generate CREATE TABLE IF NOT EXISTS with the primary key first
    ///
    /// A column in `columns` with the primary key's name is skipped.
    pub fn generate_create_table(
        &self,
        table_name: &str,
        primary_key: &PrimaryKeyConfig,
        columns: &[ColumnDefinition],
    ) -> String {
        let mut column_defs = vec![self.format_primary_key(primary_key)];

        for col in columns {
            if col.name == primary_key.column_name() {
                continue;
            }
            column_defs.push(self.format_column_definition(col));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table(table_name),
            column_defs.join(", ")
        )
    }

    /// Generate ALTER TABLE ... ADD COLUMN
    pub fn generate_add_column(&self, table_name: &str, column: &ColumnDefinition) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table(table_name),
            self.format_column_definition(column)
        )
    }

    /// Generate DROP TABLE statement
    pub fn generate_drop_table(&self, table_name: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table(table_name))
    }

    /// Generate CREATE INDEX statement
    ///
    /// MySQL/MariaDB has no `IF NOT EXISTS` for indexes; callers check for an
    /// existing index first. Prefix lengths are only rendered there too.
    pub fn generate_create_index(&self, table_name: &str, index: &IndexDefinition) -> String {
        let quoted_columns: Vec<String> = index
            .columns
            .iter()
            .map(|col| {
                let quoted = quote_identifier(col, self.dialect);
                match (self.dialect, index.prefix_for(col)) {
                    (Dialect::MySql, Some(len)) => format!("{}({})", quoted, len),
                    _ => quoted,
                }
            })
            .collect();

        let unique_clause = if index.unique { "UNIQUE " } else { "" };
        let if_not_exists = match self.dialect {
            Dialect::MySql => "",
            _ => "IF NOT EXISTS ",
        };

        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            unique_clause,
            if_not_exists,
            quote_identifier(&index.name, self.dialect),
            self.table(table_name),
            quoted_columns.join(", ")
        )
    }

    /// Format the primary key column for CREATE TABLE
    pub fn format_primary_key(&self, primary_key: &PrimaryKeyConfig) -> String {
        let name = quote_identifier(primary_key.column_name(), self.dialect);
        match (primary_key.kind(), self.dialect) {
            (PrimaryKeyKind::Integer, Dialect::Postgres) => {
                format!("{} BIGSERIAL PRIMARY KEY", name)
            }
            // rowid alias; must be spelled INTEGER to autoincrement
            (PrimaryKeyKind::Integer, Dialect::Sqlite) => format!("{} INTEGER PRIMARY KEY", name),
            (PrimaryKeyKind::Integer, Dialect::MySql) => {
                format!("{} BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY", name)
            }
            (_, dialect) => format!(
                "{} {} PRIMARY KEY",
                name,
                primary_key.storage_type().to_sql_type(dialect)
            ),
        }
    }

    /// Format a single column definition for CREATE TABLE or ALTER TABLE ADD COLUMN
    pub fn format_column_definition(&self, col: &ColumnDefinition) -> String {
        let mut def = format!(
            "{} {}",
            quote_identifier(&col.name, self.dialect),
            col.column_type.to_sql_type(self.dialect)
        );
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }
}

/// Deterministic index name: `idx_{table}_{col1}_{col2}...`
///
/// Names longer than 63 characters are cut and suffixed with `_` plus the
/// first 8 hex digits of the SHA-256 of the full name.
pub fn generate_index_name(table_name: &str, columns: &[String]) -> String {
    let base_name = format!("idx_{}_{}", table_name, columns.join("_"));

    if base_name.chars().count() <= MAX_IDENTIFIER_LENGTH {
        return base_name;
    }

    let digest = Sha256::digest(base_name.as_bytes());
    let hash_suffix: String = digest
        .iter()
        .take(HASH_SUFFIX_LENGTH / 2)
        .map(|b| format!("{:02x}", b))
        .collect();
    let prefix: String = base_name
        .chars()
        .take(MAX_IDENTIFIER_LENGTH - HASH_SUFFIX_LENGTH - 1)
        .collect();

    format!("{}_{}", prefix, hash_suffix)
}
