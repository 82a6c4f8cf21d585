//! Error types for dataset operations

use thiserror::Error;

/// Errors that can occur during dataset operations
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound { column: String, table: String },

    #[error("{operation} not allowed in read-only mode")]
    ReadOnly { operation: String },

    #[error("Schema error: {message}")]
    Schema {
        message: String,
        table: Option<String>,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Type inference error: {0}")]
    TypeInference(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatasetError {
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    pub fn column_not_found(column: impl Into<String>, table: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            column: column.into(),
            table: table.into(),
        }
    }

    pub fn read_only(operation: impl Into<String>) -> Self {
        Self::ReadOnly {
            operation: operation.into(),
        }
    }

    /// Schema error without an underlying backend failure
    pub fn schema(message: impl Into<String>, table: Option<&str>) -> Self {
        Self::Schema {
            message: message.into(),
            table: table.map(str::to_string),
            source: None,
        }
    }

    /// Wrap a backend failure raised by a DDL or reflection step
    pub fn schema_failure(
        message: impl Into<String>,
        table: Option<&str>,
        source: sqlx::Error,
    ) -> Self {
        let message = format!("{}: {}", message.into(), source);
        Self::Schema {
            message,
            table: table.map(str::to_string),
            source: Some(source),
        }
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn type_inference(msg: impl Into<String>) -> Self {
        Self::TypeInference(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Table name carried by the error, when there is one
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::TableNotFound { table } | Self::ColumnNotFound { table, .. } => Some(table),
            Self::Schema { table, .. } => table.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatasetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_their_subjects() {
        assert_eq!(
            DatasetError::column_not_found("ghost", "users").to_string(),
            "Column 'ghost' not found in table 'users'"
        );
        assert_eq!(
            DatasetError::read_only("INSERT").to_string(),
            "INSERT not allowed in read-only mode"
        );
        assert_eq!(
            DatasetError::table_not_found("users").to_string(),
            "Table not found: users"
        );
    }

    #[test]
    fn test_table_accessor() {
        assert_eq!(DatasetError::table_not_found("a").table(), Some("a"));
        assert_eq!(DatasetError::schema("boom", Some("b")).table(), Some("b"));
        assert_eq!(DatasetError::schema("boom", None).table(), None);
        assert_eq!(DatasetError::query("bad").table(), None);
    }

    #[test]
    fn test_schema_failure_keeps_source() {
        let err = DatasetError::schema_failure(
            "Failed to create table 'users'",
            Some("users"),
            sqlx::Error::PoolClosed,
        );
        assert!(err.to_string().starts_with("Schema error: Failed to create table 'users'"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
