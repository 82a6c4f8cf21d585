//! SQLite backend
//!
//! SQLite values carry one of five storage classes, so rows are decoded by
//! the runtime class and then coerced with the reflected column types.

use std::str::FromStr;

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row as _, Sqlite, SqlitePool, TypeInfo, ValueRef};

use super::{
    DATE_FORMAT, DATETIME_FORMAT, RawColumn, RawIndexColumn, TIME_FORMAT, assemble, coerce,
    column_hint,
};
use crate::error::Result;
use crate::schema::TableStructure;
use crate::sql::Statement;
use crate::value::{Row, Value};

const MEMORY_POOL_SIZE: u32 = 4;

/// Whether the URL names a private in-memory database
fn is_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Open a pool; the shared pool settings do not apply to SQLite
///
/// An in-memory database lives only as long as its connections, so its pool
/// keeps one connection open forever. The connections share one cache, which
/// lets reads run beside an open transaction. A read of a table that the open
/// transaction has written waits until that transaction ends.
pub(crate) async fn connect(url: &str) -> std::result::Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

    if is_memory(url) {
        SqlitePoolOptions::new()
            .max_connections(MEMORY_POOL_SIZE)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options.shared_cache(true))
            .await
    } else {
        SqlitePoolOptions::new().connect_with(options).await
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(v.to_string()),
        Value::Text(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        Value::Date(v) => query.bind(v.format(DATE_FORMAT).to_string()),
        Value::DateTime(v) => query.bind(v.format(DATETIME_FORMAT).to_string()),
        Value::Time(v) => query.bind(v.format(TIME_FORMAT).to_string()),
        Value::Json(v) => query.bind(v.to_string()),
        Value::List(_) => query.bind(value.to_json().to_string()),
    }
}

fn build_query(stmt: &Statement) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    stmt.params
        .iter()
        .fold(sqlx::query(&stmt.sql), |query, value| bind_value(query, value))
}

fn decode_value(row: &SqliteRow, index: usize) -> std::result::Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage_class = raw.type_info().name().to_string();

    let value = match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => Value::Int(row.try_get_unchecked(index)?),
        "REAL" => Value::Float(row.try_get_unchecked(index)?),
        "BLOB" => Value::Bytes(row.try_get_unchecked(index)?),
        _ => Value::Text(row.try_get_unchecked(index)?),
    };
    Ok(value)
}

fn decode_row(row: &SqliteRow, hints: Option<&TableStructure>) -> Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, index)?;
        out.insert(column.name().to_string(), coerce(value, column_hint(hints, column.name())));
    }
    Ok(out)
}

pub(crate) async fn execute<'c, E>(
    executor: E,
    stmt: &Statement,
) -> std::result::Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Sqlite>,
{
    Ok(build_query(stmt).execute(executor).await?.rows_affected())
}

pub(crate) async fn fetch_all<'c, E>(
    executor: E,
    stmt: &Statement,
    hints: Option<&TableStructure>,
) -> Result<Vec<Row>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows = build_query(stmt).fetch_all(executor).await?;
    rows.iter().map(|row| decode_row(row, hints)).collect()
}

pub(crate) async fn insert_returning<'c, E>(executor: E, stmt: &Statement) -> Result<Value>
where
    E: Executor<'c, Database = Sqlite>,
{
    match build_query(stmt).fetch_optional(executor).await? {
        Some(row) if !row.columns().is_empty() => Ok(decode_value(&row, 0)?),
        _ => Ok(Value::Null),
    }
}

const TABLES_SQL: &str = "SELECT name FROM sqlite_master \
    WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

const COLUMNS_SQL: &str =
    r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?) ORDER BY cid"#;

const INDEXES_SQL: &str =
    r#"SELECT name, "unique" FROM pragma_index_list(?) WHERE origin = 'c' ORDER BY name"#;

pub(crate) async fn reflect(
    pool: &SqlitePool,
) -> std::result::Result<Vec<TableStructure>, sqlx::Error> {
    let tables: Vec<(String,)> = sqlx::query_as(TABLES_SQL).fetch_all(pool).await?;

    let mut columns: Vec<RawColumn> = Vec::new();
    let mut indexes: Vec<RawIndexColumn> = Vec::new();

    for (table,) in &tables {
        let table_columns: Vec<(String, String, i64, i64)> =
            sqlx::query_as(COLUMNS_SQL).bind(table).fetch_all(pool).await?;
        for (name, declared_type, not_null, pk) in table_columns {
            columns.push((table.clone(), name, declared_type, not_null == 0, pk > 0));
        }

        let table_indexes: Vec<(String, i64)> =
            sqlx::query_as(INDEXES_SQL).bind(table).fetch_all(pool).await?;
        for (index, unique) in table_indexes {
            let index_columns: Vec<(Option<String>,)> =
                sqlx::query_as("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                    .bind(&index)
                    .fetch_all(pool)
                    .await?;
            // expression columns have no name
            for column in index_columns.into_iter().filter_map(|(column,)| column) {
                indexes.push((table.clone(), index.clone(), unique != 0, column));
            }
        }
    }

    Ok(assemble(
        tables.into_iter().map(|(name,)| name).collect(),
        columns,
        indexes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_memory() {
        assert!(is_memory("sqlite::memory:"));
        assert!(is_memory("sqlite:file:shared?mode=memory&cache=shared"));
        assert!(!is_memory("sqlite:///tmp/data.db"));
    }
}
