//! Engine-level error taxonomy.
//!
//! Validation findings stay data ([`Violation`] lists); this module covers
//! everything that can go wrong once a query heads for execution, plus the
//! execution-time errors recovered from backend error text so callers see a
//! single taxonomy.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::transpiler::TranspileError;
use crate::validator::Violation;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The query failed one or more policy checks. Carries the complete
    /// violation list so a caller can repair or report every issue at once.
    #[error("Query validation failed:\n{}", format_violations(.violations))]
    Validation { violations: Vec<Violation> },

    /// A column reference matched more than one table in scope.
    #[error("Ambiguous column reference: {0}")]
    AmbiguousReference(String),

    /// The backend rejected a column the validator could not know about.
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// The backend rejected a table (e.g. present in the vocabulary but
    /// absent from the connected schema).
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error(transparent)]
    Transpile(#[from] TranspileError),

    /// Result exceeded the configured row limit and the caller asked for
    /// strict limiting instead of truncation.
    #[error("Row limit exceeded: result has {actual} rows, limit is {limit}")]
    RowLimitExceeded { actual: usize, limit: usize },

    #[error("Database error: {0}")]
    Backend(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueryError {
    pub fn validation(violations: Vec<Violation>) -> Self {
        QueryError::Validation { violations }
    }
}

/// One violation per line, so an error payload lists every finding in a
/// single readable block.
fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("- {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

static AMBIGUOUS_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)ambiguous reference to column name "?([\w.]+)"?|column reference "?([\w.]+)"? is ambiguous"#,
    )
    .expect("valid regex")
});

static MISSING_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)referenced column "?([\w.]+)"? not found|column "?([\w.]+)"? does not exist"#,
    )
    .expect("valid regex")
});

static MISSING_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)table with name "?([\w.]+)"? does not exist|relation "?([\w.]+)"? does not exist"#,
    )
    .expect("valid regex")
});

fn first_capture(captures: &regex::Captures<'_>) -> String {
    captures
        .iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Map raw backend error text onto the taxonomy. Backends disagree on
/// message shape (DuckDB binder errors, Postgres `does not exist` forms);
/// unrecognized text stays a generic backend error.
pub fn classify_backend_error(message: &str) -> QueryError {
    if let Some(captures) = AMBIGUOUS_COLUMN.captures(message) {
        return QueryError::AmbiguousReference(first_capture(&captures));
    }
    if let Some(captures) = MISSING_COLUMN.captures(message) {
        return QueryError::ColumnNotFound(first_capture(&captures));
    }
    if let Some(captures) = MISSING_TABLE.captures(message) {
        return QueryError::TableNotFound(first_capture(&captures));
    }
    QueryError::Backend(message.to_string())
}

pub type QueryResult<T> = Result<T, QueryError>;
