//! SQL utilities
//!
//! Provides SQL generation, sanitization, filter building and read-only
//! query validation.

pub mod ddl;
pub mod dml;
pub mod filter;
pub mod readonly;
pub mod sanitize;

pub use ddl::{DdlGenerator, generate_index_name};
pub use dml::{SelectQuery, Statement, StatementBuilder};
pub use filter::{Conjunction, Direction, Filter, FilterBuilder, Filters, Operator, Predicate};
pub use readonly::{extract_table_names, validate_readonly, validate_tables_exist};
pub use sanitize::{qualified_name, quote_identifier, validate_identifier};
