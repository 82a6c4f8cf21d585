//! MySQL and MariaDB backend

use rust_decimal::Decimal;
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, MySql, MySqlPool, Row as _, TypeInfo, ValueRef};

use super::{RawColumn, RawIndexColumn, assemble, coerce, column_hint};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::schema::TableStructure;
use crate::sql::Statement;
use crate::value::{Row, Value};

/// sqlx only understands the `mysql` scheme; MariaDB speaks the same protocol
fn normalize_url(url: &str) -> String {
    match url.get(..10) {
        Some(scheme) if scheme.eq_ignore_ascii_case("mariadb://") => {
            format!("mysql://{}", &url[10..])
        }
        _ => url.to_string(),
    }
}

pub(crate) async fn connect(
    url: &str,
    pool: &PoolConfig,
) -> std::result::Result<MySqlPool, sqlx::Error> {
    MySqlPoolOptions::new()
        .max_connections(pool.max_connections())
        .acquire_timeout(pool.timeout)
        .max_lifetime(Some(pool.recycle))
        .test_before_acquire(pool.pre_ping)
        .connect(&normalize_url(url))
        .await
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        Value::Date(v) => query.bind(*v),
        Value::DateTime(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Json(v) => query.bind(v.clone()),
        Value::List(_) => query.bind(value.to_json()),
    }
}

fn build_query(stmt: &Statement) -> Query<'_, MySql, MySqlArguments> {
    stmt.params
        .iter()
        .fold(sqlx::query(&stmt.sql), |query, value| bind_value(query, value))
}

fn decode_value(row: &MySqlRow, index: usize) -> std::result::Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.column(index).type_info().name();
    let value = match type_name {
        "BOOLEAN" => Value::Bool(row.try_get(index)?),
        name if name.ends_with("UNSIGNED") => {
            let v: u64 = row.try_get_unchecked(index)?;
            i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Decimal(Decimal::from(v)))
        }
        // integer decoding reads the wire width, so any signed size works
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::Int(row.try_get_unchecked(index)?)
        }
        "FLOAT" => Value::Float(row.try_get::<f32, _>(index)? as f64),
        "DOUBLE" => Value::Float(row.try_get(index)?),
        "DECIMAL" => Value::Decimal(row.try_get(index)?),
        "DATE" => Value::Date(row.try_get(index)?),
        "DATETIME" | "TIMESTAMP" => Value::DateTime(row.try_get(index)?),
        "TIME" => Value::Time(row.try_get(index)?),
        "JSON" => Value::Json(row.try_get(index)?),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
            Value::Bytes(row.try_get(index)?)
        }
        _ => Value::Text(row.try_get(index)?),
    };
    Ok(value)
}

fn decode_row(row: &MySqlRow, hints: Option<&TableStructure>) -> Result<Row> {
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
    E: Executor<'c, Database = MySql>,
{
    Ok(build_query(stmt).execute(executor).await?.rows_affected())
}

pub(crate) async fn fetch_all<'c, E>(
    executor: E,
    stmt: &Statement,
    hints: Option<&TableStructure>,
) -> Result<Vec<Row>>
where
    E: Executor<'c, Database = MySql>,
{
    let rows = build_query(stmt).fetch_all(executor).await?;
    rows.iter().map(|row| decode_row(row, hints)).collect()
}

/// MySQL has no `RETURNING`; the generated key comes from the OK packet
pub(crate) async fn insert_returning<'c, E>(executor: E, stmt: &Statement) -> Result<Value>
where
    E: Executor<'c, Database = MySql>,
{
    let result = build_query(stmt).execute(executor).await?;
    match result.last_insert_id() {
        0 => Ok(Value::Null),
        id => Ok(i64::try_from(id)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Decimal(Decimal::from(id)))),
    }
}

const TABLES_SQL: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR)
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
      AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

const COLUMNS_SQL: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR),
           CAST(COLUMN_NAME AS CHAR),
           CAST(COLUMN_TYPE AS CHAR),
           CAST(IS_NULLABLE AS CHAR),
           CAST(COLUMN_KEY AS CHAR)
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
    ORDER BY TABLE_NAME, ORDINAL_POSITION
"#;

const INDEXES_SQL: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR),
           CAST(INDEX_NAME AS CHAR),
           CAST(NON_UNIQUE AS SIGNED),
           CAST(COLUMN_NAME AS CHAR)
    FROM information_schema.STATISTICS
    WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
      AND INDEX_NAME <> 'PRIMARY'
    ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX
"#;

pub(crate) async fn reflect(
    pool: &MySqlPool,
    schema: Option<&str>,
) -> std::result::Result<Vec<TableStructure>, sqlx::Error> {
    let tables: Vec<(String,)> = sqlx::query_as(TABLES_SQL).bind(schema).fetch_all(pool).await?;

    let columns: Vec<(String, String, String, String, String)> =
        sqlx::query_as(COLUMNS_SQL).bind(schema).fetch_all(pool).await?;
    let columns: Vec<RawColumn> = columns
        .into_iter()
        .map(|(table, name, declared_type, nullable, key)| {
            (table, name, declared_type, nullable.eq_ignore_ascii_case("YES"), key == "PRI")
        })
        .collect();

    let indexes: Vec<(String, String, i64, Option<String>)> =
        sqlx::query_as(INDEXES_SQL).bind(schema).fetch_all(pool).await?;
    let indexes: Vec<RawIndexColumn> = indexes
        .into_iter()
        .filter_map(|(table, index, non_unique, column)| {
            column.map(|c| (table, index, non_unique == 0, c))
        })
        .collect();

    Ok(assemble(
        tables.into_iter().map(|(name,)| name).collect(),
        columns,
        indexes,
    ))
}
