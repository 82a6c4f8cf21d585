//! Read-only query validation
//!
//! A keyword-level guard for raw SQL run against a read-only database, plus
//! helpers to find the tables a query references. This is a surface check,
//! not a SQL parser.

use std::sync::LazyLock;

use regex::Regex;

/// Keywords that make a statement a write or DDL
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "EXECUTE", "EXEC",
];

static FORBIDDEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|")))
        .expect("forbidden keyword pattern is valid")
});

static FUNCTION_FROM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(EXTRACT|SUBSTRING|POSITION|TRIM)\s*\([^)]*\bFROM\b[^)]*\)")
        .expect("function pattern is valid")
});

static TABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([a-zA-Z_][a-zA-Z0-9_]*)").expect("table pattern is valid")
});

/// Check that `sql` is a single read-only SELECT
///
/// # Returns
/// Ok(()) if valid, Err with message if invalid
///
/// # Example
/// ```
/// use dbset::sql::validate_readonly;
///
/// assert!(validate_readonly("SELECT * FROM users").is_ok());
/// assert!(validate_readonly("DELETE FROM users").is_err());
/// ```
pub fn validate_readonly(sql: &str) -> Result<(), String> {
    let clean = sql.trim();

    if clean.is_empty() {
        return Err("Empty SQL query".to_string());
    }

    if !clean
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("SELECT"))
    {
        return Err("Query must start with SELECT".to_string());
    }

    if let Some(found) = FORBIDDEN_PATTERN.captures(clean).and_then(|c| c.get(1)) {
        return Err(format!(
            "Forbidden keyword detected: {}",
            found.as_str().to_ascii_uppercase()
        ));
    }

    Ok(())
}

/// Table names referenced after `FROM` and `JOIN`, in first-seen order
///
/// Function calls that use `FROM` inside their arguments (`EXTRACT(YEAR FROM
/// ts)`, `TRIM(x FROM y)`, ...) are removed first. Aliases are ignored.
pub fn extract_table_names(sql: &str) -> Vec<String> {
    let cleaned = FUNCTION_FROM_PATTERN.replace_all(sql, "");

    let mut tables: Vec<String> = Vec::new();
    for captures in TABLE_PATTERN.captures_iter(&cleaned) {
        let Some(name) = captures.get(1) else {
            continue;
        };
        if !tables.iter().any(|t| t == name.as_str()) {
            tables.push(name.as_str().to_string());
        }
    }
    tables
}

/// Names referenced by `sql` that are missing from `existing`
///
/// Comparison is case-insensitive.
pub fn validate_tables_exist(sql: &str, existing: &[String]) -> Vec<String> {
    let existing: Vec<String> = existing.iter().map(|t| t.to_lowercase()).collect();
    extract_table_names(sql)
        .into_iter()
        .filter(|table| !existing.contains(&table.to_lowercase()))
        .collect()
}
