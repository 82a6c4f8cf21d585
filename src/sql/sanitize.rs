//! SQL Identifier Sanitization Utilities
//!
//! Every table, column and index name is quoted with the dialect's identifier
//! quote before it reaches SQL text; values always travel as bind parameters.

use crate::backend::Dialect;

/// Quote a SQL identifier for the given dialect
///
/// PostgreSQL and SQLite use double quotes, MySQL/MariaDB use backticks.
/// Embedded quote characters are escaped by doubling them.
///
/// # Example
/// ```
/// use dbset::Dialect;
/// use dbset::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("my_table", Dialect::Postgres), "\"my_table\"");
/// assert_eq!(quote_identifier("my_table", Dialect::MySql), "`my_table`");
/// ```
pub fn quote_identifier(identifier: &str, dialect: Dialect) -> String {
    match dialect {
        Dialect::MySql => format!("`{}`", identifier.replace('`', "``")),
        Dialect::Postgres | Dialect::Sqlite => {
            format!("\"{}\"", identifier.replace('"', "\"\""))
        }
    }
}

/// Quote a table name, prefixed with its schema when one is configured
pub fn qualified_name(schema: Option<&str>, table: &str, dialect: Dialect) -> String {
    match schema {
        Some(schema) => format!(
            "{}.{}",
            quote_identifier(schema, dialect),
            quote_identifier(table, dialect)
        ),
        None => quote_identifier(table, dialect),
    }
}

/// Validate a table or column name
///
/// Names are always quoted, so any text is accepted except an empty name or
/// one containing a NUL byte, which no backend can store.
pub fn validate_identifier(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Identifier cannot be empty".to_string());
    }
    if name.contains('\0') {
        return Err(format!("Identifier '{}' contains a NUL byte", name.escape_debug()));
    }
    Ok(())
}
