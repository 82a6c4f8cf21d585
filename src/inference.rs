//! Column type inference from runtime values
//!
//! Picks a storage type for each value written to a table and widens two
//! candidate types into one that can hold both.

use rust_decimal::Decimal;

use crate::backend::Dialect;
use crate::error::{DatasetError, Result};
use crate::types::{ColumnType, JsonFlavor};
use crate::value::{Row, Value};

/// Largest NUMERIC precision emitted in DDL
pub const MAX_NUMERIC_PRECISION: u8 = 38;

/// Stateless type inference rules
pub struct TypeInference;

impl TypeInference {
    /// Infer the column type for a single value
    ///
    /// `Null` infers `Text`; callers that see a later non-null value widen
    /// through [`TypeInference::merge`].
    pub fn infer(value: &Value, dialect: Dialect) -> Result<ColumnType> {
        let column_type = match value {
            Value::Null => ColumnType::Text,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Int(_) => ColumnType::Integer,
            Value::Decimal(d) => {
                let (precision, scale) = Self::decimal_precision(d);
                ColumnType::numeric(precision, scale)
            }
            Value::Float(_) => ColumnType::Float,
            Value::DateTime(_) => ColumnType::DateTime,
            Value::Date(_) => ColumnType::Date,
            Value::Text(_) => ColumnType::Text,
            Value::Bytes(_) => ColumnType::Text,
            Value::Json(_) | Value::List(_) => ColumnType::json(match dialect {
                Dialect::Postgres => JsonFlavor::Binary,
                _ => JsonFlavor::Generic,
            }),
            Value::Time(_) => {
                return Err(DatasetError::type_inference(format!(
                    "Cannot infer column type for value of type '{}'",
                    value.type_name()
                )));
            }
        };
        Ok(column_type)
    }

    /// Infer a type for every entry of a row, keyed by column name
    pub fn infer_row(row: &Row, dialect: Dialect) -> Result<Vec<(String, ColumnType)>> {
        row.iter()
            .map(|(name, value)| Ok((name.clone(), Self::infer(value, dialect)?)))
            .collect()
    }

    /// Precision and scale needed to store a decimal exactly
    pub fn decimal_precision(value: &Decimal) -> (u8, u8) {
        if value.is_zero() {
            return (1, 0);
        }

        let digits = value.mantissa().unsigned_abs().to_string().len() as u32;
        let scale = value.scale();
        let precision = digits.max(1);

        if precision > MAX_NUMERIC_PRECISION as u32 {
            (
                MAX_NUMERIC_PRECISION,
                scale.min(MAX_NUMERIC_PRECISION as u32) as u8,
            )
        } else {
            (precision as u8, scale as u8)
        }
    }

    /// Widen two types into one that can hold values of both
    pub fn merge(a: &ColumnType, b: &ColumnType) -> ColumnType {
        use ColumnType::*;

        match (a, b) {
            (VarChar { length: la }, VarChar { length: lb }) => VarChar {
                length: match (la, lb) {
                    (Some(x), Some(y)) => Some((*x).max(*y)),
                    _ => None,
                },
            },
            (
                Numeric {
                    precision: pa,
                    scale: sa,
                },
                Numeric {
                    precision: pb,
                    scale: sb,
                },
            ) => {
                let scale = max_opt(*sa, *sb);
                let precision = match (max_opt(*pa, *pb), scale) {
                    (Some(p), Some(s)) => Some(p.max(s)),
                    (p, _) => p,
                };
                Numeric { precision, scale }
            }
            (Json { flavor: fa }, Json { flavor: fb }) => {
                if *fa == JsonFlavor::Binary || *fb == JsonFlavor::Binary {
                    ColumnType::json(JsonFlavor::Binary)
                } else {
                    ColumnType::json(JsonFlavor::Generic)
                }
            }
            (x, y) if x == y => x.clone(),
            (Integer, Float) | (Float, Integer) => Float,
            (Numeric { .. }, Integer) => a.clone(),
            (Integer, Numeric { .. }) => b.clone(),
            (Numeric { .. }, Float) | (Float, Numeric { .. }) => Float,
            (Date, DateTime) | (DateTime, Date) => DateTime,
            _ => Text,
        }
    }
}

fn max_opt(a: Option<u8>, b: Option<u8>) -> Option<u8> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}
