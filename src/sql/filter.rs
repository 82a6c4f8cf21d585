//! Filter building for SQL WHERE clauses
//!
//! Converts column-keyed [`Filters`] into a [`Predicate`] tree checked
//! against a reflected table structure, then renders the tree into SQL with
//! bind parameters.
//!
//! # Supported Operators
//! - Comparison: `=`, `==`, `!=`, `>`, `>=`, `<`, `<=`
//! - Sets: `in`, `not_in`
//! - Patterns: `like`, `ilike`, `not_like`, `startswith`, `endswith`, `contains`
//! - Identity: `is`, `is_not`
//! - Ranges: `between`

use std::fmt;
use std::str::FromStr;

use crate::backend::Dialect;
use crate::error::DatasetError;
use crate::schema::TableStructure;
use crate::sql::dml::StatementBuilder;
use crate::value::{Row, Value};

// ============================================================================
// Operators
// ============================================================================

/// Closed set of filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    ILike,
    NotLike,
    StartsWith,
    EndsWith,
    Contains,
    Is,
    IsNot,
    Between,
}

impl Operator {
    /// Every accepted operator spelling, in documentation order
    pub const NAMES: &'static [&'static str] = &[
        "=",
        "==",
        "!=",
        ">",
        ">=",
        "<",
        "<=",
        "in",
        "not_in",
        "like",
        "ilike",
        "not_like",
        "startswith",
        "endswith",
        "contains",
        "is",
        "is_not",
        "between",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Like => "like",
            Operator::ILike => "ilike",
            Operator::NotLike => "not_like",
            Operator::StartsWith => "startswith",
            Operator::EndsWith => "endswith",
            Operator::Contains => "contains",
            Operator::Is => "is",
            Operator::IsNot => "is_not",
            Operator::Between => "between",
        }
    }
}

impl FromStr for Operator {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "=" | "==" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "like" => Operator::Like,
            "ilike" => Operator::ILike,
            "not_like" => Operator::NotLike,
            "startswith" => Operator::StartsWith,
            "endswith" => Operator::EndsWith,
            "contains" => Operator::Contains,
            "is" => Operator::Is,
            "is_not" => Operator::IsNot,
            "between" => Operator::Between,
            other => {
                return Err(DatasetError::query(format!(
                    "Unknown operator: '{}'. Valid operators: {}",
                    other,
                    Operator::NAMES.join(", ")
                )));
            }
        };
        Ok(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How top-level filter entries are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl FromStr for Conjunction {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(Conjunction::And),
            "OR" => Ok(Conjunction::Or),
            _ => Err(DatasetError::query(format!(
                "Invalid conjunction: '{}'. Must be 'AND' or 'OR'",
                s
            ))),
        }
    }
}

/// Sort direction for ORDER BY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

// ============================================================================
// Filter Expressions
// ============================================================================

/// Condition on one column
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Bare value: equality, or `IS NULL` for Null
    Equals(Value),
    /// Operator map; entries are AND-ed together
    Operators(Vec<(Operator, Value)>),
}

/// Ordered column filters
///
/// ```
/// use dbset::{Filters, Operator, Value};
///
/// let filters = Filters::new()
///     .eq("status", "active")
///     .op("age", Operator::Gte, 18)
///     .op("age", Operator::Lt, 65);
/// assert_eq!(filters.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    entries: Vec<(String, Filter)>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality filter on `column`, replacing any earlier condition on it
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let filter = Filter::Equals(value.into());
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = filter,
            None => self.entries.push((column, filter)),
        }
        self
    }

    /// Operator filter on `column`; several operators on one column are AND-ed
    pub fn op(mut self, column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some((_, Filter::Operators(ops))) => ops.push((op, value)),
            Some(entry) => entry.1 = Filter::Operators(vec![(op, value)]),
            None => self.entries.push((column, Filter::Operators(vec![(op, value)]))),
        }
        self
    }

    /// Operator filter with the operator given by name
    pub fn with(
        self,
        column: impl Into<String>,
        op: &str,
        value: impl Into<Value>,
    ) -> crate::Result<Self> {
        let op = op.parse::<Operator>()?;
        Ok(self.op(column, op, value))
    }

    /// Equality filters from every entry of a row
    pub fn from_row(row: &Row) -> Self {
        row.iter()
            .fold(Self::new(), |filters, (column, value)| filters.eq(column.clone(), value.clone()))
    }

    /// Parse filters from a JSON object
    ///
    /// Object-valued entries are operator maps (`{"age": {">=": 18}}`);
    /// anything else is an equality operand.
    pub fn from_json(json: &serde_json::Value) -> crate::Result<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| DatasetError::query("Filters must be a JSON object"))?;

        let mut filters = Self::new();
        for (column, value) in object {
            match value {
                serde_json::Value::Object(ops) => {
                    for (op, operand) in ops {
                        let operand = Value::from_json(operand.clone());
                        filters = filters.with(column.clone(), op, operand)?;
                    }
                }
                other => filters = filters.eq(column.clone(), Value::from_json(other.clone())),
            }
        }
        Ok(filters)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Filter)> {
        self.entries.iter().map(|(column, filter)| (column.as_str(), filter))
    }
}

impl From<Row> for Filters {
    fn from(row: Row) -> Self {
        Filters::from_row(&row)
    }
}

// ============================================================================
// Predicates
// ============================================================================

/// Validated WHERE clause tree
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: &'static str,
        value: Value,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Like {
        column: String,
        pattern: Value,
        negated: bool,
        case_insensitive: bool,
    },
    Is {
        column: String,
        value: Value,
        negated: bool,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Join predicates; a single predicate is returned as-is
    fn combine(mut parts: Vec<Predicate>, conjunction: Conjunction) -> Option<Predicate> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(match conjunction {
                Conjunction::And => Predicate::And(parts),
                Conjunction::Or => Predicate::Or(parts),
            }),
        }
    }

    /// Render as SQL, registering operands with the builder
    pub fn to_sql(&self, b: &mut StatementBuilder) -> String {
        let dialect = b.dialect();
        match self {
            Predicate::Compare { column, op, value } => {
                let column = b.quote(column);
                format!("{} {} {}", column, op, b.param(value.clone()))
            }
            Predicate::IsNull { column, negated } => format!(
                "{} IS {}NULL",
                b.quote(column),
                if *negated { "NOT " } else { "" }
            ),
            Predicate::In {
                values, negated, ..
            } if values.is_empty() => {
                if *negated {
                    "1 = 1".to_string()
                } else {
                    "1 = 0".to_string()
                }
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                let column = b.quote(column);
                let list = values
                    .iter()
                    .map(|v| b.param(v.clone()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "{} {}IN ({})",
                    column,
                    if *negated { "NOT " } else { "" },
                    list
                )
            }
            Predicate::Like {
                column,
                pattern,
                negated,
                case_insensitive,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let column = b.quote(column);
                let param = b.param(pattern.clone());
                match (case_insensitive, dialect) {
                    (true, Dialect::Postgres) => format!("{} {}ILIKE {}", column, not, param),
                    (true, _) => format!("LOWER({}) {}LIKE LOWER({})", column, not, param),
                    (false, _) => format!("{} {}LIKE {}", column, not, param),
                }
            }
            Predicate::Is {
                column,
                value,
                negated,
            } => {
                let column = b.quote(column);
                let not = if *negated { "NOT " } else { "" };
                match value {
                    Value::Null => format!("{} IS {}NULL", column, not),
                    Value::Bool(flag) => format!(
                        "{} IS {}{}",
                        column,
                        not,
                        if *flag { "TRUE" } else { "FALSE" }
                    ),
                    other => {
                        let param = b.param(other.clone());
                        match (dialect, negated) {
                            (Dialect::Postgres, false) => {
                                format!("{} IS NOT DISTINCT FROM {}", column, param)
                            }
                            (Dialect::Postgres, true) => {
                                format!("{} IS DISTINCT FROM {}", column, param)
                            }
                            (Dialect::MySql, false) => format!("{} <=> {}", column, param),
                            (Dialect::MySql, true) => format!("NOT ({} <=> {})", column, param),
                            (Dialect::Sqlite, _) => format!("{} IS {}{}", column, not, param),
                        }
                    }
                }
            }
            Predicate::Between { column, low, high } => {
                let column = b.quote(column);
                let low = b.param(low.clone());
                let high = b.param(high.clone());
                format!("{} BETWEEN {} AND {}", column, low, high)
            }
            Predicate::And(parts) => join_parts(parts, " AND ", b),
            Predicate::Or(parts) => join_parts(parts, " OR ", b),
        }
    }
}

fn join_parts(parts: &[Predicate], separator: &str, b: &mut StatementBuilder) -> String {
    parts
        .iter()
        .map(|p| format!("({})", p.to_sql(b)))
        .collect::<Vec<_>>()
        .join(separator)
}

// ============================================================================
// Builder
// ============================================================================

/// Validates filters against a table structure and produces predicates
pub struct FilterBuilder;

impl FilterBuilder {
    /// Build a WHERE predicate; `None` when there is nothing to filter on
    ///
    /// Every referenced column must exist in `structure`. Failures are
    /// returned as messages for the caller to wrap as query errors.
    pub fn build(
        structure: &TableStructure,
        filters: &Filters,
        conjunction: Conjunction,
    ) -> Result<Option<Predicate>, String> {
        let mut clauses = Vec::with_capacity(filters.len());

        for (column, filter) in filters.iter() {
            if !structure.has_column(column) {
                return Err(missing_column(column, structure));
            }

            match filter {
                Filter::Equals(value) => clauses.push(equality(column, value.clone(), false)),
                Filter::Operators(ops) => {
                    let mut column_clauses = Vec::with_capacity(ops.len());
                    for (op, operand) in ops {
                        column_clauses.push(build_operator(column, *op, operand)?);
                    }
                    if let Some(clause) = Predicate::combine(column_clauses, Conjunction::And) {
                        clauses.push(clause);
                    }
                }
            }
        }

        Ok(Predicate::combine(clauses, conjunction))
    }

    /// Parse ORDER BY specs; a leading `-` sorts descending
    pub fn parse_order_by(
        structure: &TableStructure,
        specs: &[String],
    ) -> Result<Vec<(String, Direction)>, String> {
        specs
            .iter()
            .map(|spec| {
                let (column, direction) = match spec.strip_prefix('-') {
                    Some(column) => (column, Direction::Desc),
                    None => (spec.as_str(), Direction::Asc),
                };
                if !structure.has_column(column) {
                    return Err(missing_column(column, structure));
                }
                Ok((column.to_string(), direction))
            })
            .collect()
    }
}

fn missing_column(column: &str, structure: &TableStructure) -> String {
    format!("Column '{}' not found in table '{}'", column, structure.name)
}

fn equality(column: &str, value: Value, negated: bool) -> Predicate {
    if value.is_null() {
        return Predicate::IsNull {
            column: column.to_string(),
            negated,
        };
    }
    Predicate::Compare {
        column: column.to_string(),
        op: if negated { "!=" } else { "=" },
        value,
    }
}

fn build_operator(column: &str, op: Operator, operand: &Value) -> Result<Predicate, String> {
    let col = column.to_string();
    let predicate = match op {
        Operator::Eq => equality(column, operand.clone(), false),
        Operator::Ne => equality(column, operand.clone(), true),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => Predicate::Compare {
            column: col,
            op: op.name(),
            value: operand.clone(),
        },
        Operator::In | Operator::NotIn => {
            let values = sequence(operand).ok_or_else(|| {
                format!(
                    "{} operator requires a list, got: {}",
                    op.name().to_ascii_uppercase(),
                    operand.type_name()
                )
            })?;
            Predicate::In {
                column: col,
                values,
                negated: op == Operator::NotIn,
            }
        }
        Operator::Like | Operator::ILike | Operator::NotLike => Predicate::Like {
            column: col,
            pattern: operand.clone(),
            negated: op == Operator::NotLike,
            case_insensitive: op == Operator::ILike,
        },
        Operator::StartsWith | Operator::EndsWith | Operator::Contains => {
            let text = scalar_text(operand).ok_or_else(|| {
                format!(
                    "{} operator requires a scalar value, got: {}",
                    op.name().to_ascii_uppercase(),
                    operand.type_name()
                )
            })?;
            let pattern = match op {
                Operator::StartsWith => format!("{}%", text),
                Operator::EndsWith => format!("%{}", text),
                _ => format!("%{}%", text),
            };
            Predicate::Like {
                column: col,
                pattern: Value::Text(pattern),
                negated: false,
                case_insensitive: false,
            }
        }
        Operator::Is | Operator::IsNot => Predicate::Is {
            column: col,
            value: operand.clone(),
            negated: op == Operator::IsNot,
        },
        Operator::Between => {
            let bounds = sequence(operand)
                .filter(|values| values.len() == 2)
                .ok_or_else(|| {
                    format!(
                        "BETWEEN operator requires a list of 2 values, got: {}",
                        operand.to_json()
                    )
                })?;
            let mut bounds = bounds.into_iter();
            let (Some(low), Some(high)) = (bounds.next(), bounds.next()) else {
                return Err("BETWEEN operator requires a list of 2 values".to_string());
            };
            Predicate::Between {
                column: col,
                low,
                high,
            }
        }
    };
    Ok(predicate)
}

/// Elements of a list operand; JSON arrays count as lists
fn sequence(operand: &Value) -> Option<Vec<Value>> {
    match operand {
        Value::List(items) => Some(items.clone()),
        Value::Json(serde_json::Value::Array(items)) => {
            Some(items.iter().cloned().map(Value::from_json).collect())
        }
        _ => None,
    }
}

fn scalar_text(operand: &Value) -> Option<String> {
    match operand {
        Value::Text(s) => Some(s.clone()),
        Value::Int(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Decimal(d) => Some(d.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Date(d) => Some(d.to_string()),
        Value::DateTime(dt) => Some(dt.to_string()),
        _ => None,
    }
}
