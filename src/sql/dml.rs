//! Data statement generation
//!
//! Builds SELECT, COUNT, INSERT, UPDATE and DELETE statements with values
//! carried as bind parameters in the dialect's placeholder syntax.

use crate::backend::Dialect;
use crate::sql::filter::{Direction, Predicate};
use crate::sql::sanitize::quote_identifier;
use crate::value::{Row, Value};

/// SQL text plus its positional parameters, ready to execute
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Rewrite `:name` placeholders into the dialect's positional form
    ///
    /// Text inside quotes (string literals and quoted identifiers) is copied
    /// untouched, as are `::type` casts. Every occurrence binds its own
    /// parameter so repeated names work with `?` placeholders too.
    pub fn from_named(sql: &str, params: &Row, dialect: Dialect) -> Result<Self, String> {
        let mut out = String::with_capacity(sql.len());
        let mut values = Vec::new();
        let chars: Vec<char> = sql.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            match c {
                '\'' | '"' | '`' => {
                    out.push(c);
                    i += 1;
                    while i < chars.len() {
                        out.push(chars[i]);
                        if chars[i] == c {
                            // doubled quote is an escape, keep scanning
                            if i + 1 < chars.len() && chars[i + 1] == c {
                                out.push(c);
                                i += 2;
                                continue;
                            }
                            i += 1;
                            break;
                        }
                        i += 1;
                    }
                }
                ':' if i + 1 < chars.len() && chars[i + 1] == ':' => {
                    out.push_str("::");
                    i += 2;
                }
                ':' if i + 1 < chars.len() && is_name_start(chars[i + 1]) => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_name_char(chars[end]) {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    let value = params
                        .get(&name)
                        .ok_or_else(|| format!("Missing value for query parameter ':{}'", name))?;
                    if value.is_null() {
                        out.push_str("NULL");
                    } else {
                        values.push(value.clone());
                        out.push_str(&dialect.placeholder(values.len()));
                    }
                    i = end;
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
        }

        Ok(Self::with_params(out, values))
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Accumulates bind parameters while SQL text is rendered
///
/// Placeholders are numbered in the order [`StatementBuilder::param`] is
/// called, so fragments must be rendered left to right.
#[derive(Debug)]
pub struct StatementBuilder {
    dialect: Dialect,
    params: Vec<Value>,
}

impl StatementBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn quote(&self, identifier: &str) -> String {
        quote_identifier(identifier, self.dialect)
    }

    /// Register a value and return its placeholder
    ///
    /// NULL is rendered inline so it needs no backend type.
    pub fn param(&mut self, value: Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    pub fn finish(self, sql: String) -> Statement {
        Statement::with_params(sql, self.params)
    }
}

/// Parameters of a SELECT against one table
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    /// Columns to return; empty selects every column
    pub columns: Vec<String>,
    pub distinct: bool,
    pub predicate: Option<Predicate>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Build a SELECT statement
///
/// `table` is the already-quoted (and possibly schema-qualified) name.
pub fn build_select(dialect: Dialect, table: &str, query: &SelectQuery) -> Statement {
    let mut b = StatementBuilder::new(dialect);

    let columns = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query
            .columns
            .iter()
            .map(|c| b.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!(
        "SELECT {}{} FROM {}",
        if query.distinct { "DISTINCT " } else { "" },
        columns,
        table
    );

    if let Some(predicate) = &query.predicate {
        let clause = predicate.to_sql(&mut b);
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }

    if !query.order_by.is_empty() {
        let order = query
            .order_by
            .iter()
            .map(|(column, direction)| format!("{} {}", b.quote(column), direction.as_sql()))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }

    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
        }
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
        (None, Some(offset)) => match dialect {
            Dialect::Postgres => sql.push_str(&format!(" OFFSET {}", offset)),
            Dialect::Sqlite => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            Dialect::MySql => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", u64::MAX, offset))
            }
        },
        (None, None) => {}
    }

    b.finish(sql)
}

/// Build `SELECT COUNT(*)` with an optional predicate
pub fn build_count(dialect: Dialect, table: &str, predicate: Option<&Predicate>) -> Statement {
    let mut b = StatementBuilder::new(dialect);
    let mut sql = format!("SELECT COUNT(*) AS count FROM {}", table);
    if let Some(predicate) = predicate {
        let clause = predicate.to_sql(&mut b);
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
    b.finish(sql)
}

/// Build a single-row INSERT
///
/// `returning` names a column to hand back on dialects with `RETURNING`.
pub fn build_insert(
    dialect: Dialect,
    table: &str,
    row: &Row,
    returning: Option<&str>,
) -> Statement {
    let mut b = StatementBuilder::new(dialect);

    let mut sql = if row.is_empty() {
        match dialect {
            Dialect::MySql => format!("INSERT INTO {} () VALUES ()", table),
            _ => format!("INSERT INTO {} DEFAULT VALUES", table),
        }
    } else {
        let columns = row.keys().map(|c| b.quote(c)).collect::<Vec<_>>().join(", ");
        let values = row
            .values()
            .map(|v| b.param(v.clone()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({}) VALUES ({})", table, columns, values)
    };

    if let Some(column) = returning.filter(|_| dialect.supports_returning()) {
        sql.push_str(" RETURNING ");
        sql.push_str(&b.quote(column));
    }

    b.finish(sql)
}

/// Build a multi-row INSERT over a fixed column list
///
/// Rows missing a column get NULL in that position.
pub fn build_insert_many(
    dialect: Dialect,
    table: &str,
    columns: &[String],
    rows: &[Row],
) -> Statement {
    let mut b = StatementBuilder::new(dialect);

    let column_list = columns.iter().map(|c| b.quote(c)).collect::<Vec<_>>().join(", ");
    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let values = columns
            .iter()
            .map(|c| b.param(row.get(c).cloned().unwrap_or(Value::Null)))
            .collect::<Vec<_>>()
            .join(", ");
        tuples.push(format!("({})", values));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        column_list,
        tuples.join(", ")
    );
    b.finish(sql)
}

/// Build an UPDATE; callers guarantee both the SET list and predicate exist
pub fn build_update(
    dialect: Dialect,
    table: &str,
    values: &Row,
    predicate: &Predicate,
) -> Statement {
    let mut b = StatementBuilder::new(dialect);

    let assignments = values
        .iter()
        .map(|(column, value)| {
            let column = b.quote(column);
            format!("{} = {}", column, b.param(value.clone()))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let clause = predicate.to_sql(&mut b);

    let sql = format!("UPDATE {} SET {} WHERE {}", table, assignments, clause);
    b.finish(sql)
}

/// Build a DELETE; the predicate is mandatory
pub fn build_delete(dialect: Dialect, table: &str, predicate: &Predicate) -> Statement {
    let mut b = StatementBuilder::new(dialect);
    let clause = predicate.to_sql(&mut b);
    let sql = format!("DELETE FROM {} WHERE {}", table, clause);
    b.finish(sql)
}
