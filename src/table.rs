//! Table facade
//!
//! Dictionary-shaped row operations on one table. Writes infer column types
//! from the data and evolve the table before executing; reads load the
//! reflected structure lazily and validate filters against it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::TryStreamExt;
use parking_lot::RwLock;

use crate::backend::{Dialect, RowStream};
use crate::database::Shared;
use crate::error::{DatasetError, Result};
use crate::inference::TypeInference;
use crate::schema::TableStructure;
use crate::sql::dml::{
    build_count, build_delete, build_insert, build_insert_many, build_select, build_update,
};
use crate::sql::{Conjunction, FilterBuilder, Filters, SelectQuery, qualified_name};
use crate::types::{ColumnType, PrimaryKeyKind};
use crate::value::{Row, Value};

/// Default rows per batch for `insert_many` and `upsert_many`
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

// ============================================================================
// Options
// ============================================================================

/// Column list accepted by index, distinct and ordering calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Columns(Vec<String>);

impl Columns {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for Columns {
    fn from(column: &str) -> Self {
        Columns(vec![column.to_string()])
    }
}

impl From<String> for Columns {
    fn from(column: String) -> Self {
        Columns(vec![column])
    }
}

impl From<Vec<String>> for Columns {
    fn from(columns: Vec<String>) -> Self {
        Columns(columns)
    }
}

impl From<Vec<&str>> for Columns {
    fn from(columns: Vec<&str>) -> Self {
        Columns(columns.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Columns {
    fn from(columns: &[&str]) -> Self {
        Columns(columns.iter().map(|c| c.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Columns {
    fn from(columns: [&str; N]) -> Self {
        Columns(columns.iter().map(|c| c.to_string()).collect())
    }
}

/// Options for single-row writes
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Override the database `ensure_schema` setting for this call
    pub ensure: Option<bool>,
    /// Explicit column types; they win over inferred ones
    pub types: BTreeMap<String, ColumnType>,
}

impl WriteOptions {
    pub fn ensure(mut self, ensure: bool) -> Self {
        self.ensure = Some(ensure);
        self
    }

    pub fn column_type(mut self, column: impl Into<String>, column_type: ColumnType) -> Self {
        self.types.insert(column.into(), column_type);
        self
    }
}

/// Options for batch writes
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub chunk_size: usize,
    pub ensure: Option<bool>,
    pub types: BTreeMap<String, ColumnType>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ensure: None,
            types: BTreeMap::new(),
        }
    }
}

impl BatchOptions {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn ensure(mut self, ensure: bool) -> Self {
        self.ensure = Some(ensure);
        self
    }

    pub fn column_type(mut self, column: impl Into<String>, column_type: ColumnType) -> Self {
        self.types.insert(column.into(), column_type);
        self
    }
}

/// Options for `find`
///
/// ```
/// use dbset::{FindOptions, Filters, Operator};
///
/// let options = FindOptions::new()
///     .filters(Filters::new().op("age", Operator::Gte, 18))
///     .order_by(["-age", "name"])
///     .limit(10);
/// assert_eq!(options.limit, Some(10));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Maximum rows; `None` or 0 means unlimited
    pub limit: Option<u64>,
    /// Rows to skip; 0 means none
    pub offset: Option<u64>,
    /// Column names, `-` prefix for descending
    pub order_by: Vec<String>,
    pub filters: Filters,
    pub conjunction: Conjunction,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn order_by(mut self, columns: impl Into<Columns>) -> Self {
        self.order_by = columns.into().into_vec();
        self
    }

    pub fn filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn conjunction(mut self, conjunction: Conjunction) -> Self {
        self.conjunction = conjunction;
        self
    }
}

impl From<Filters> for FindOptions {
    fn from(filters: Filters) -> Self {
        FindOptions::new().filters(filters)
    }
}

/// Options for `create_index`
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Explicit name; derived from table and columns when `None`
    pub name: Option<String>,
    pub unique: bool,
}

impl IndexOptions {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

// ============================================================================
// Table
// ============================================================================

#[derive(Debug)]
struct TableState {
    name: String,
    shared: Arc<Shared>,
    structure: RwLock<Option<Arc<TableStructure>>>,
}

/// Handle to one table of a [`Database`](crate::Database)
///
/// Handles are cheap to clone and share their cached structure.
#[derive(Debug, Clone)]
pub struct Table {
    state: Arc<TableState>,
}

impl Table {
    pub(crate) fn new(name: String, shared: Arc<Shared>) -> Self {
        Self {
            state: Arc::new(TableState {
                name,
                shared,
                structure: RwLock::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    fn shared(&self) -> &Shared {
        &self.state.shared
    }

    fn dialect(&self) -> Dialect {
        self.shared().backend.dialect()
    }

    fn read_only(&self) -> bool {
        self.shared().config.read_only
    }

    fn check_writable(&self, operation: &str) -> Result<()> {
        if self.read_only() {
            return Err(DatasetError::read_only(operation));
        }
        Ok(())
    }

    fn ensure_default(&self, ensure: Option<bool>) -> bool {
        ensure.unwrap_or(self.shared().config.ensure_schema)
    }

    /// Quoted, schema-qualified table name
    fn sql_name(&self) -> String {
        qualified_name(self.shared().schema.schema(), self.name(), self.dialect())
    }

    fn cache(&self, structure: Arc<TableStructure>) -> Arc<TableStructure> {
        *self.state.structure.write() = Some(structure.clone());
        structure
    }

    fn forget(&self) {
        *self.state.structure.write() = None;
    }

    /// Cached structure, loading it on first use
    ///
    /// Loading creates the table only when the handle may evolve the schema.
    async fn structure(&self) -> Result<Arc<TableStructure>> {
        if let Some(structure) = self.state.structure.read().clone() {
            return Ok(structure);
        }
        let shared = self.shared();
        let ensure = shared.config.ensure_schema && !shared.config.read_only;
        let structure = shared
            .schema
            .get_table(self.name(), ensure, &shared.config.primary_key)
            .await?;
        Ok(self.cache(structure))
    }

    /// Load the table for a write, creating it when `ensure` is set
    async fn load_for_write(&self, ensure: bool) -> Result<Arc<TableStructure>> {
        let shared = self.shared();
        let structure = shared
            .schema
            .get_table(self.name(), ensure, &shared.config.primary_key)
            .await?;
        Ok(self.cache(structure))
    }

    /// Add the primary key value when the key kind has a generator
    fn assign_key(&self, row: &mut Row) {
        let primary_key = &self.shared().config.primary_key;
        if row.contains_key(primary_key.column_name()) {
            return;
        }
        if let Some(value) = primary_key.generate_value() {
            row.insert(primary_key.column_name().to_string(), value);
        }
    }

    /// Column types for `rows`, explicit overrides first
    ///
    /// Columns are typed from the first row that carries them.
    fn required_types<'r>(
        &self,
        rows: impl IntoIterator<Item = &'r Row>,
        overrides: &BTreeMap<String, ColumnType>,
    ) -> Result<Vec<(String, ColumnType)>> {
        let dialect = self.dialect();
        let mut required: Vec<(String, ColumnType)> = overrides
            .iter()
            .map(|(column, column_type)| (column.clone(), column_type.clone()))
            .collect();
        let mut seen: BTreeSet<String> = overrides.keys().cloned().collect();

        for row in rows {
            for (column, value) in row {
                if seen.contains(column) {
                    continue;
                }
                required.push((column.clone(), TypeInference::infer(value, dialect)?));
                seen.insert(column.clone());
            }
        }
        Ok(required)
    }

    async fn ensure_columns(
        &self,
        required: &[(String, ColumnType)],
    ) -> Result<Arc<TableStructure>> {
        let structure = self.shared().schema.ensure_columns(self.name(), required).await?;
        Ok(self.cache(structure))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert one row and return its primary key
    pub async fn insert(&self, row: Row) -> Result<Value> {
        self.insert_with(row, WriteOptions::default()).await
    }

    /// Insert one row with per-call schema options
    pub async fn insert_with(&self, mut row: Row, options: WriteOptions) -> Result<Value> {
        self.check_writable("INSERT")?;
        let ensure = self.ensure_default(options.ensure);

        self.load_for_write(ensure).await?;
        self.assign_key(&mut row);

        if ensure {
            let required = self.required_types([&row], &options.types)?;
            self.ensure_columns(&required).await?;
        }

        let shared = self.shared();
        let primary_key = &shared.config.primary_key;
        let column = primary_key.column_name();

        if primary_key.kind() != PrimaryKeyKind::Integer || row.contains_key(column) {
            let stmt = build_insert(self.dialect(), &self.sql_name(), &row, None);
            shared.backend.execute(&stmt).await?;
            return Ok(row.get(column).cloned().unwrap_or(Value::Null));
        }

        let stmt = build_insert(self.dialect(), &self.sql_name(), &row, Some(column));
        shared.backend.insert_returning(&stmt).await
    }

    /// Insert many rows with multi-row INSERTs; returns the number written
    pub async fn insert_many(&self, mut rows: Vec<Row>, options: BatchOptions) -> Result<u64> {
        self.check_writable("INSERT")?;
        if rows.is_empty() {
            return Ok(0);
        }
        let ensure = self.ensure_default(options.ensure);

        self.load_for_write(ensure).await?;
        for row in rows.iter_mut() {
            self.assign_key(row);
        }

        if ensure {
            let required = self.required_types(rows.iter(), &options.types)?;
            self.ensure_columns(&required).await?;
        }

        // A NULL bound into an auto-increment key does not generate one
        let key = self.shared().config.primary_key.column_name();
        let (keyed, unkeyed): (Vec<Row>, Vec<Row>) =
            rows.into_iter().partition(|row| row.contains_key(key));

        let mut total = 0u64;
        for group in [keyed, unkeyed] {
            total += self.insert_group(&group, options.chunk_size).await?;
        }
        tracing::debug!(table = %self.name(), rows = total, "Inserted rows");
        Ok(total)
    }

    /// Write rows sharing one column union, `chunk_size` rows per statement
    async fn insert_group(&self, rows: &[Row], chunk_size: usize) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns: Vec<String> = rows
            .iter()
            .flat_map(|row| row.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let dialect = self.dialect();
        let table = self.sql_name();
        let backend = &self.shared().backend;

        if columns.is_empty() {
            for row in rows {
                backend.execute(&build_insert(dialect, &table, row, None)).await?;
            }
            return Ok(rows.len() as u64);
        }

        let chunk_size = chunk_size
            .max(1)
            .min((dialect.max_params() / columns.len()).max(1));

        let mut total = 0u64;
        for chunk in rows.chunks(chunk_size) {
            let stmt = build_insert_many(dialect, &table, &columns, chunk);
            backend.execute(&stmt).await?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }

    /// Update rows and return the number affected
    ///
    /// With `keys`, the WHERE clause matches the row's values for those key
    /// columns (keys missing from the table or the row are ignored) and the
    /// keys are left out of the SET list. Without keys, `filters` decide.
    pub async fn update(&self, row: Row, keys: &[&str], filters: Filters) -> Result<u64> {
        self.check_writable("UPDATE")?;
        let structure = self.structure().await?;

        let (values, filters) = if keys.is_empty() {
            (row, filters)
        } else {
            let key_filters = keys
                .iter()
                .filter(|key| structure.has_column(key))
                .filter_map(|key| row.get(*key).map(|value| (*key, value.clone())))
                .fold(Filters::new(), |filters, (key, value)| filters.eq(key, value));
            let values: Row = row
                .into_iter()
                .filter(|(column, _)| !keys.contains(&column.as_str()))
                .collect();
            (values, key_filters)
        };

        if values.is_empty() {
            return Ok(0);
        }
        if let Some(column) = values.keys().find(|c| !structure.has_column(c)) {
            return Err(DatasetError::column_not_found(column.clone(), self.name()));
        }

        let predicate = FilterBuilder::build(&structure, &filters, Conjunction::And)
            .map_err(DatasetError::Query)?
            .ok_or_else(|| DatasetError::query("UPDATE requires WHERE clause (filters or keys)"))?;

        let stmt = build_update(self.dialect(), &self.sql_name(), &values, &predicate);
        self.shared().backend.execute(&stmt).await
    }

    /// Insert the row, or update the row whose `keys` match
    pub async fn upsert(&self, row: Row, keys: &[&str]) -> Result<Option<Value>> {
        self.upsert_with(row, keys, WriteOptions::default()).await
    }

    /// Upsert with per-call schema options
    ///
    /// An update returns the matched row's `id` field; an insert returns the
    /// new primary key.
    pub async fn upsert_with(
        &self,
        row: Row,
        keys: &[&str],
        options: WriteOptions,
    ) -> Result<Option<Value>> {
        self.check_writable("UPSERT")?;
        let ensure = self.ensure_default(options.ensure);

        if ensure {
            self.prepare_upsert(&row, keys, &options.types).await?;
        }

        let lookup = keys.iter().fold(Filters::new(), |filters, key| {
            filters.eq(*key, row.get(*key).cloned().unwrap_or(Value::Null))
        });
        let existing = match self.find_one(lookup).await {
            Ok(existing) => existing,
            Err(DatasetError::Query(message)) => {
                tracing::warn!(
                    table = %self.name(),
                    error = %message,
                    "Upsert lookup failed; inserting"
                );
                None
            }
            Err(e) => return Err(e),
        };

        match existing {
            Some(existing) => {
                self.update(row, keys, Filters::new()).await?;
                Ok(existing.get("id").cloned())
            }
            None => self.insert_with(row, options).await.map(Some),
        }
    }

    /// Create the table, its columns and an index over the keys
    async fn prepare_upsert(
        &self,
        row: &Row,
        keys: &[&str],
        overrides: &BTreeMap<String, ColumnType>,
    ) -> Result<()> {
        let structure = self.load_for_write(true).await?;
        let required = self.required_types([row], overrides)?;
        self.ensure_columns(&required).await?;

        let index_keys: Vec<String> = keys
            .iter()
            .filter(|key| structure.has_column(key) || row.contains_key(**key))
            .map(|key| key.to_string())
            .collect();
        if !index_keys.is_empty() {
            let shared = self.shared();
            shared
                .schema
                .create_index(
                    self.name(),
                    &index_keys,
                    None,
                    false,
                    shared.config.text_index_prefix,
                )
                .await?;
        }
        self.forget();
        Ok(())
    }

    /// Upsert each row in turn; returns the number of rows processed
    ///
    /// Schema preparation runs once, from the first row. Not atomic.
    pub async fn upsert_many(
        &self,
        rows: Vec<Row>,
        keys: &[&str],
        options: BatchOptions,
    ) -> Result<u64> {
        self.check_writable("UPSERT")?;
        let Some(first) = rows.first() else {
            return Ok(0);
        };

        if self.ensure_default(options.ensure) {
            self.prepare_upsert(first, keys, &options.types).await?;
        }

        let chunk_size = options.chunk_size.max(1);
        let total = rows.len();
        let per_row = WriteOptions {
            ensure: Some(false),
            types: options.types,
        };

        for (index, row) in rows.into_iter().enumerate() {
            self.upsert_with(row, keys, per_row.clone()).await?;
            let processed = index + 1;
            if processed % chunk_size == 0 || processed == total {
                tracing::debug!(table = %self.name(), processed, total, "Upserted rows");
            }
        }
        Ok(total as u64)
    }

    /// Delete matching rows; filters are mandatory
    pub async fn delete(&self, filters: Filters) -> Result<u64> {
        self.check_writable("DELETE")?;
        if filters.is_empty() {
            return Err(DatasetError::query("DELETE requires WHERE clause (provide filters)"));
        }

        let structure = self.structure().await?;
        let predicate = FilterBuilder::build(&structure, &filters, Conjunction::And)
            .map_err(DatasetError::Query)?
            .ok_or_else(|| DatasetError::query("DELETE requires WHERE clause (provide filters)"))?;

        let stmt = build_delete(self.dialect(), &self.sql_name(), &predicate);
        self.shared().backend.execute(&stmt).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Stream rows matching the options
    ///
    /// The stream is single-pass; call `find` again to iterate again.
    pub async fn find(&self, options: impl Into<FindOptions>) -> Result<RowStream> {
        let options = options.into();
        let structure = self.structure().await?;

        let predicate = FilterBuilder::build(&structure, &options.filters, options.conjunction)
            .map_err(DatasetError::Query)?;
        let order_by = FilterBuilder::parse_order_by(&structure, &options.order_by)
            .map_err(DatasetError::Query)?;

        let query = SelectQuery {
            predicate,
            order_by,
            limit: options.limit.filter(|limit| *limit > 0),
            offset: options.offset.filter(|offset| *offset > 0),
            ..SelectQuery::default()
        };
        let stmt = build_select(self.dialect(), &self.sql_name(), &query);
        Ok(self.shared().backend.fetch(stmt, Some(structure)))
    }

    /// First row matching `filters`
    pub async fn find_one(&self, filters: Filters) -> Result<Option<Row>> {
        let mut rows = self.find(FindOptions::new().filters(filters).limit(1)).await?;
        rows.try_next().await
    }

    /// Stream every row
    pub async fn all(&self) -> Result<RowStream> {
        self.find(FindOptions::new()).await
    }

    pub async fn count(&self, filters: Filters) -> Result<u64> {
        let structure = self.structure().await?;
        let predicate = FilterBuilder::build(&structure, &filters, Conjunction::And)
            .map_err(DatasetError::Query)?;

        let stmt = build_count(self.dialect(), &self.sql_name(), predicate.as_ref());
        let rows = self.shared().backend.fetch_all(&stmt, None).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Stream distinct combinations of `columns`
    pub async fn distinct(
        &self,
        columns: impl Into<Columns>,
        filters: Filters,
    ) -> Result<RowStream> {
        let columns = columns.into();
        if columns.is_empty() {
            return Err(DatasetError::query("DISTINCT requires at least one column"));
        }

        let structure = self.structure().await?;
        if let Some(column) = columns.as_slice().iter().find(|c| !structure.has_column(c)) {
            return Err(DatasetError::query(format!(
                "Column '{}' not found in table '{}'",
                column,
                self.name()
            )));
        }
        let predicate = FilterBuilder::build(&structure, &filters, Conjunction::And)
            .map_err(DatasetError::Query)?;

        let query = SelectQuery {
            columns: columns.into_vec(),
            distinct: true,
            predicate,
            ..SelectQuery::default()
        };
        let stmt = build_select(self.dialect(), &self.sql_name(), &query);
        Ok(self.shared().backend.fetch(stmt, Some(structure)))
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Create an index over `columns`; returns its name
    ///
    /// Idempotent: an existing index over the same column set is reused.
    pub async fn create_index(
        &self,
        columns: impl Into<Columns>,
        options: IndexOptions,
    ) -> Result<String> {
        self.check_writable("CREATE INDEX")?;
        let columns = columns.into();
        self.structure().await?;

        let shared = self.shared();
        let name = shared
            .schema
            .create_index(
                self.name(),
                columns.as_slice(),
                options.name.as_deref(),
                options.unique,
                shared.config.text_index_prefix,
            )
            .await?;
        self.forget();
        Ok(name)
    }

    /// Whether an index over exactly `columns` exists
    pub async fn has_index(&self, columns: impl Into<Columns>) -> Result<bool> {
        let columns = columns.into();
        self.structure().await?;
        self.shared().schema.index_exists(self.name(), columns.as_slice()).await
    }

    /// Column names in table order
    pub async fn columns(&self) -> Result<Vec<String>> {
        let structure = self.structure().await?;
        Ok(structure.columns.iter().map(|c| c.name.clone()).collect())
    }

    pub async fn exists(&self) -> Result<bool> {
        self.shared().schema.table_exists(self.name()).await
    }

    /// Drop the table
    pub async fn drop(&self) -> Result<()> {
        self.check_writable("DROP")?;
        self.shared().schema.drop_table(self.name()).await?;
        self.forget();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_conversions() {
        assert_eq!(Columns::from("email").into_vec(), vec!["email"]);
        assert_eq!(Columns::from(["country", "city"]).into_vec(), vec!["country", "city"]);
        assert_eq!(
            Columns::from(vec!["a".to_string(), "b".to_string()]).as_slice(),
            &["a".to_string(), "b".to_string()]
        );
        assert!(Columns::from(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_find_options_builder() {
        let options = FindOptions::new()
            .limit(5)
            .offset(10)
            .order_by("-age")
            .conjunction(Conjunction::Or);
        assert_eq!(options.limit, Some(5));
        assert_eq!(options.offset, Some(10));
        assert_eq!(options.order_by, vec!["-age"]);
        assert_eq!(options.conjunction, Conjunction::Or);
        assert!(options.filters.is_empty());
    }

    #[test]
    fn test_batch_options_defaults() {
        let options = BatchOptions::default();
        assert_eq!(options.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(options.ensure.is_none());
        assert!(options.types.is_empty());

        let options = options.chunk_size(50).ensure(false).column_type("price", ColumnType::Float);
        assert_eq!(options.chunk_size, 50);
        assert_eq!(options.ensure, Some(false));
        assert_eq!(options.types.get("price"), Some(&ColumnType::Float));
    }
}
