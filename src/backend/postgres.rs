//! PostgreSQL backend

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Executor, PgPool, Postgres, Row as _, TypeInfo, ValueRef};

use super::{RawColumn, RawIndexColumn, assemble};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::schema::TableStructure;
use crate::sql::Statement;
use crate::value::{Row, Value};

pub(crate) async fn connect(
    url: &str,
    pool: &PoolConfig,
) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(pool.max_connections())
        .acquire_timeout(pool.timeout)
        .max_lifetime(Some(pool.recycle))
        .test_before_acquire(pool.pre_ping)
        .connect(url)
        .await
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
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

fn build_query(stmt: &Statement) -> Query<'_, Postgres, PgArguments> {
    stmt.params
        .iter()
        .fold(sqlx::query(&stmt.sql), |query, value| bind_value(query, value))
}

fn decode_value(row: &PgRow, index: usize) -> std::result::Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match row.column(index).type_info().name() {
        "BOOL" => Value::Bool(row.try_get(index)?),
        "INT2" => Value::Int(row.try_get::<i16, _>(index)? as i64),
        "INT4" => Value::Int(row.try_get::<i32, _>(index)? as i64),
        "INT8" => Value::Int(row.try_get(index)?),
        "FLOAT4" => Value::Float(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" => Value::Float(row.try_get(index)?),
        "NUMERIC" => Value::Decimal(row.try_get(index)?),
        "DATE" => Value::Date(row.try_get(index)?),
        "TIMESTAMP" => Value::DateTime(row.try_get(index)?),
        "TIMESTAMPTZ" => Value::DateTime(row.try_get::<DateTime<Utc>, _>(index)?.naive_utc()),
        "TIME" => Value::Time(row.try_get(index)?),
        "JSON" | "JSONB" => Value::Json(row.try_get(index)?),
        "UUID" => Value::Text(row.try_get::<uuid::Uuid, _>(index)?.to_string()),
        "BYTEA" => Value::Bytes(row.try_get(index)?),
        _ => Value::Text(row.try_get(index)?),
    };
    Ok(value)
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_value(row, index)?);
    }
    Ok(out)
}

pub(crate) async fn execute<'c, E>(
    executor: E,
    stmt: &Statement,
) -> std::result::Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    Ok(build_query(stmt).execute(executor).await?.rows_affected())
}

pub(crate) async fn fetch_all<'c, E>(executor: E, stmt: &Statement) -> Result<Vec<Row>>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = build_query(stmt).fetch_all(executor).await?;
    rows.iter().map(decode_row).collect()
}

pub(crate) async fn insert_returning<'c, E>(executor: E, stmt: &Statement) -> Result<Value>
where
    E: Executor<'c, Database = Postgres>,
{
    match build_query(stmt).fetch_optional(executor).await? {
        Some(row) if !row.columns().is_empty() => Ok(decode_value(&row, 0)?),
        _ => Ok(Value::Null),
    }
}

const TABLES_SQL: &str = r#"
    SELECT c.relname::text
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname::text = COALESCE($1::text, current_schema()::text)
    ORDER BY c.relname
"#;

const COLUMNS_SQL: &str = r#"
    SELECT c.relname::text,
           a.attname::text,
           format_type(a.atttypid, a.atttypmod),
           NOT a.attnotnull,
           EXISTS (
               SELECT 1 FROM pg_index ix
               WHERE ix.indrelid = c.oid
                 AND ix.indisprimary
                 AND a.attnum = ANY(ix.indkey::int2[])
           )
    FROM pg_attribute a
    JOIN pg_class c ON c.oid = a.attrelid
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND a.attnum > 0
      AND NOT a.attisdropped
      AND n.nspname::text = COALESCE($1::text, current_schema()::text)
    ORDER BY c.relname, a.attnum
"#;

const INDEXES_SQL: &str = r#"
    SELECT t.relname::text,
           i.relname::text,
           ix.indisunique,
           a.attname::text
    FROM pg_index ix
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE NOT ix.indisprimary
      AND t.relkind IN ('r', 'p')
      AND n.nspname::text = COALESCE($1::text, current_schema()::text)
    ORDER BY t.relname, i.relname, k.ord
"#;

pub(crate) async fn reflect(
    pool: &PgPool,
    schema: Option<&str>,
) -> std::result::Result<Vec<TableStructure>, sqlx::Error> {
    let tables: Vec<(String,)> = sqlx::query_as(TABLES_SQL).bind(schema).fetch_all(pool).await?;
    let columns: Vec<RawColumn> = sqlx::query_as(COLUMNS_SQL).bind(schema).fetch_all(pool).await?;
    let indexes: Vec<RawIndexColumn> =
        sqlx::query_as(INDEXES_SQL).bind(schema).fetch_all(pool).await?;

    Ok(assemble(
        tables.into_iter().map(|(name,)| name).collect(),
        columns,
        indexes,
    ))
}
