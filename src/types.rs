//! Core type definitions
//!
//! Includes column type descriptors, column and index definitions, and the
//! primary key configuration shared by every table a database creates.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::Dialect;
use crate::error::{DatasetError, Result};
use crate::value::Value;

// ============================================================================
// Column Type Descriptors
// ============================================================================

/// Encoding used for JSON document columns
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JsonFlavor {
    /// Plain JSON text
    Generic,
    /// Backend-optimized binary JSON (PostgreSQL JSONB)
    Binary,
}

/// Storage type of a column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,

    /// 64-bit integer
    Integer,

    /// Double precision float
    Float,

    /// Exact decimal; both parts unset means an unconstrained NUMERIC
    Numeric {
        precision: Option<u8>,
        scale: Option<u8>,
    },

    /// Unbounded text
    Text,

    /// Bounded string; `None` length is treated as unbounded when merging
    #[serde(rename = "varchar")]
    VarChar { length: Option<u32> },

    Date,

    /// Timestamp without time zone
    DateTime,

    Json { flavor: JsonFlavor },
}

impl ColumnType {
    /// Create a Numeric type with specified precision and scale
    pub fn numeric(precision: u8, scale: u8) -> Self {
        ColumnType::Numeric {
            precision: Some(precision),
            scale: Some(scale),
        }
    }

    pub fn varchar(length: u32) -> Self {
        ColumnType::VarChar {
            length: Some(length),
        }
    }

    pub fn json(flavor: JsonFlavor) -> Self {
        ColumnType::Json { flavor }
    }

    /// Whether an index on this column needs a prefix length on MySQL/MariaDB
    pub fn is_text(&self) -> bool {
        matches!(self, ColumnType::Text)
    }

    /// Convert column type to the dialect's SQL type string
    pub fn to_sql_type(&self, dialect: Dialect) -> String {
        match self {
            ColumnType::Boolean => match dialect {
                Dialect::MySql => "BOOL".to_string(),
                _ => "BOOLEAN".to_string(),
            },
            ColumnType::Integer => match dialect {
                Dialect::Sqlite => "INTEGER".to_string(),
                _ => "BIGINT".to_string(),
            },
            ColumnType::Float => match dialect {
                Dialect::Postgres => "DOUBLE PRECISION".to_string(),
                Dialect::Sqlite => "FLOAT".to_string(),
                Dialect::MySql => "DOUBLE".to_string(),
            },
            ColumnType::Numeric { precision, scale } => {
                let base = match dialect {
                    Dialect::MySql => "DECIMAL",
                    _ => "NUMERIC",
                };
                match (precision, scale) {
                    // precision can be below scale for values like 0.000001
                    (Some(p), Some(s)) => format!("{}({},{})", base, (*p).max(*s), s),
                    (Some(p), None) => format!("{}({})", base, p),
                    _ => base.to_string(),
                }
            }
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::VarChar { length } => match (length, dialect) {
                (Some(len), _) => format!("VARCHAR({})", len),
                (None, Dialect::MySql) => "VARCHAR(255)".to_string(),
                (None, _) => "VARCHAR".to_string(),
            },
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => match dialect {
                Dialect::Postgres => "TIMESTAMP WITHOUT TIME ZONE".to_string(),
                _ => "DATETIME".to_string(),
            },
            ColumnType::Json { flavor } => match (dialect, flavor) {
                (Dialect::Postgres, JsonFlavor::Binary) => "JSONB".to_string(),
                _ => "JSON".to_string(),
            },
        }
    }

    /// Map a reflected, declared SQL type back into a descriptor
    ///
    /// Accepts the spellings the supported backends report (`bigint`,
    /// `character varying(36)`, `numeric(10,2)`, `tinyint(1)`, ...). Returns
    /// `None` for types with no descriptor, such as `time` or `blob`.
    pub fn from_sql_type(declared: &str) -> Option<Self> {
        let upper = declared.trim().to_ascii_uppercase();
        let upper = upper.trim_end_matches(" UNSIGNED").trim();

        let (base, args, rest) = match upper.find('(') {
            Some(open) => {
                let close = upper[open..].find(')').map(|c| open + c)?;
                (
                    upper[..open].trim(),
                    Some(&upper[open + 1..close]),
                    upper[close + 1..].trim(),
                )
            }
            None => (upper, None, ""),
        };
        let base = if rest.is_empty() {
            base.to_string()
        } else {
            format!("{} {}", base, rest)
        };

        let numbers: Vec<u32> = args
            .map(|a| a.split(',').filter_map(|p| p.trim().parse().ok()).collect())
            .unwrap_or_default();

        let column_type = match base.as_str() {
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "TINYINT" if numbers.first() == Some(&1) => ColumnType::Boolean,
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "MEDIUMINT" | "TINYINT" | "INT2"
            | "INT4" | "INT8" | "SERIAL" | "BIGSERIAL" => ColumnType::Integer,
            "FLOAT" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT4" | "FLOAT8" => {
                ColumnType::Float
            }
            "NUMERIC" | "DECIMAL" => ColumnType::Numeric {
                precision: numbers.first().map(|p| (*p).min(u8::MAX as u32) as u8),
                scale: numbers.get(1).map(|s| (*s).min(u8::MAX as u32) as u8),
            },
            "TEXT" | "CLOB" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => ColumnType::Text,
            "VARCHAR" | "CHARACTER VARYING" | "NVARCHAR" | "CHAR" | "CHARACTER" | "BPCHAR"
            | "NCHAR" => ColumnType::VarChar {
                length: numbers.first().copied(),
            },
            "DATE" => ColumnType::Date,
            "DATETIME" => ColumnType::DateTime,
            b if b.starts_with("TIMESTAMP") => ColumnType::DateTime,
            "JSONB" => ColumnType::Json {
                flavor: JsonFlavor::Binary,
            },
            "JSON" => ColumnType::Json {
                flavor: JsonFlavor::Generic,
            },
            _ => return None,
        };
        Some(column_type)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Boolean => write!(f, "Boolean"),
            ColumnType::Integer => write!(f, "Integer"),
            ColumnType::Float => write!(f, "Float"),
            ColumnType::Numeric {
                precision: Some(p),
                scale: Some(s),
            } => write!(f, "Numeric({}, {})", p, s),
            ColumnType::Numeric { .. } => write!(f, "Numeric"),
            ColumnType::Text => write!(f, "Text"),
            ColumnType::VarChar { length: Some(l) } => write!(f, "VarChar({})", l),
            ColumnType::VarChar { length: None } => write!(f, "VarChar"),
            ColumnType::Date => write!(f, "Date"),
            ColumnType::DateTime => write!(f, "DateTime"),
            ColumnType::Json { flavor } => write!(f, "Json({:?})", flavor),
        }
    }
}

// ============================================================================
// Column and Index Definitions
// ============================================================================

fn default_nullable() -> bool {
    true
}

/// Column definition used when creating tables and adding columns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,

    #[serde(flatten)]
    pub column_type: ColumnType,

    /// Whether the column allows NULL values (default: true)
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl ColumnDefinition {
    /// Create a new column definition with a name and type
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Set the column as non-nullable
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Index definition handed to the DDL generator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDefinition {
    pub name: String,

    /// Columns included in the index, in key order
    pub columns: Vec<String>,

    #[serde(default)]
    pub unique: bool,

    /// Prefix lengths for text columns (MySQL/MariaDB only)
    #[serde(default)]
    pub prefix_lengths: Vec<(String, u32)>,
}

impl IndexDefinition {
    /// Create a new index definition
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            prefix_lengths: Vec::new(),
        }
    }

    /// Set the index as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Index only the first `length` characters of `column`
    pub fn prefix(mut self, column: impl Into<String>, length: u32) -> Self {
        self.prefix_lengths.push((column.into(), length));
        self
    }

    pub fn prefix_for(&self, column: &str) -> Option<u32> {
        self.prefix_lengths
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, len)| *len)
    }
}

// ============================================================================
// Primary Keys
// ============================================================================

/// How primary key values are produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryKeyKind {
    /// Backend auto-increment
    Integer,
    /// UUID v4 string generated client-side
    Uuid,
    /// Caller supplied generator and storage type
    Custom,
}

impl FromStr for PrimaryKeyKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(PrimaryKeyKind::Integer),
            "uuid" => Ok(PrimaryKeyKind::Uuid),
            "custom" => Ok(PrimaryKeyKind::Custom),
            other => Err(DatasetError::config(format!(
                "Unknown primary key type '{}' (expected integer, uuid or custom)",
                other
            ))),
        }
    }
}

/// Function producing a fresh primary key value
pub type KeyGenerator = Arc<dyn Fn() -> Value + Send + Sync>;

/// Primary key configuration, fixed for the life of a database handle
#[derive(Clone)]
pub struct PrimaryKeyConfig {
    kind: PrimaryKeyKind,
    column_name: String,
    generator: Option<KeyGenerator>,
    storage_type: ColumnType,
}

impl PrimaryKeyConfig {
    /// Build a configuration, validating the parts each kind requires
    ///
    /// - `Integer` ignores any generator; values come from auto-increment
    /// - `Uuid` defaults to v4 UUID strings stored as `VARCHAR(36)`
    /// - `Custom` requires both `generator` and `storage_type`
    pub fn new(
        kind: PrimaryKeyKind,
        column_name: impl Into<String>,
        generator: Option<KeyGenerator>,
        storage_type: Option<ColumnType>,
    ) -> Result<Self> {
        let column_name = column_name.into();
        match kind {
            PrimaryKeyKind::Integer => Ok(Self {
                kind,
                column_name,
                generator: None,
                storage_type: ColumnType::Integer,
            }),
            PrimaryKeyKind::Uuid => Ok(Self {
                kind,
                column_name,
                generator: Some(generator.unwrap_or_else(uuid_generator)),
                storage_type: storage_type.unwrap_or(ColumnType::varchar(36)),
            }),
            PrimaryKeyKind::Custom => {
                let generator = generator.ok_or_else(|| {
                    DatasetError::config("CUSTOM pk_type requires generator")
                })?;
                let storage_type = storage_type.ok_or_else(|| {
                    DatasetError::config("CUSTOM pk_type requires storage type")
                })?;
                Ok(Self {
                    kind,
                    column_name,
                    generator: Some(generator),
                    storage_type,
                })
            }
        }
    }

    /// Auto-increment integer key named `id`
    pub fn integer() -> Self {
        Self {
            kind: PrimaryKeyKind::Integer,
            column_name: "id".to_string(),
            generator: None,
            storage_type: ColumnType::Integer,
        }
    }

    /// UUID string key named `id`
    pub fn uuid() -> Self {
        Self {
            kind: PrimaryKeyKind::Uuid,
            column_name: "id".to_string(),
            generator: Some(uuid_generator()),
            storage_type: ColumnType::varchar(36),
        }
    }

    /// Custom key named `id`
    pub fn custom<F>(generator: F, storage_type: ColumnType) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            kind: PrimaryKeyKind::Custom,
            column_name: "id".to_string(),
            generator: Some(Arc::new(generator)),
            storage_type,
        }
    }

    /// Rename the key column
    pub fn with_column(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = column_name.into();
        self
    }

    /// Replace the generator (ignored for integer keys)
    pub fn with_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        if self.kind != PrimaryKeyKind::Integer {
            self.generator = Some(Arc::new(generator));
        }
        self
    }

    pub fn kind(&self) -> PrimaryKeyKind {
        self.kind
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn storage_type(&self) -> &ColumnType {
        &self.storage_type
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Whether the backend assigns key values
    pub fn autoincrement(&self) -> bool {
        self.kind == PrimaryKeyKind::Integer
    }

    /// Produce a new key value, or `None` for auto-increment keys
    pub fn generate_value(&self) -> Option<Value> {
        self.generator.as_ref().map(|generate| generate())
    }
}

impl Default for PrimaryKeyConfig {
    fn default() -> Self {
        Self::integer()
    }
}

impl fmt::Debug for PrimaryKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimaryKeyConfig")
            .field("kind", &self.kind)
            .field("column_name", &self.column_name)
            .field("generator", &self.generator.as_ref().map(|_| "<fn>"))
            .field("storage_type", &self.storage_type)
            .finish()
    }
}

fn uuid_generator() -> KeyGenerator {
    Arc::new(|| Value::Text(uuid::Uuid::new_v4().to_string()))
}
