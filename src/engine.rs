//! Query execution pipeline.
//!
//! The engine wires the pieces together: validate against policy, transpile
//! to the warehouse dialect, execute through a [`QueryBackend`], then cap and
//! render the result. The backend is a trait so the pipeline runs the same
//! against a real warehouse connection or an in-memory test double.

use tracing::{debug, info};

use crate::error::{classify_backend_error, QueryError, QueryResult};
use crate::policy::Policy;
use crate::transpiler::{transpile, Dialect};
use crate::validator::Validator;

/// A tabular query result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Rows {
    /// Drop rows past `limit`. Returns how many were removed.
    pub fn truncate(&mut self, limit: usize) -> usize {
        if self.rows.len() <= limit {
            return 0;
        }
        let removed = self.rows.len() - limit;
        self.rows.truncate(limit);
        removed
    }

    /// Render as CSV: header row, then data rows. Fields containing commas,
    /// quotes, or newlines are quoted with doubled inner quotes.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_csv_row(&mut out, self.columns.iter().map(String::as_str));
        for row in &self.rows {
            push_csv_row(&mut out, row.iter().map(String::as_str));
        }
        out
    }
}

fn push_csv_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Anything that can run SQL and hand back rows. Errors are reported as raw
/// backend text; the engine classifies them afterwards.
pub trait QueryBackend {
    fn execute(&mut self, sql: &str) -> Result<Rows, String>;
}

/// The validated-query execution engine.
pub struct QueryEngine<B> {
    backend: B,
    validator: Validator,
    policy: Policy,
    source_dialect: Dialect,
    target_dialect: Dialect,
    cdm_schema: String,
    vocab_schema: String,
    strict_row_limit: bool,
}

impl<B: QueryBackend> QueryEngine<B> {
    pub fn new(backend: B, policy: Policy, source: Dialect, target: Dialect) -> Self {
        Self {
            backend,
            validator: Validator::new(policy.clone()),
            policy,
            source_dialect: source,
            target_dialect: target,
            cdm_schema: "cdm".to_string(),
            vocab_schema: "vocab".to_string(),
            strict_row_limit: false,
        }
    }

    pub fn with_schemas(mut self, cdm: impl Into<String>, vocab: impl Into<String>) -> Self {
        self.cdm_schema = cdm.into();
        self.vocab_schema = vocab.into();
        self
    }

    /// Fail queries whose results exceed the row limit instead of silently
    /// truncating them.
    pub fn with_strict_row_limit(mut self) -> Self {
        self.strict_row_limit = true;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Validate, transpile, and execute a read-only query. The result is
    /// rendered as CSV, capped at the policy row limit; a note is appended
    /// when rows were dropped.
    pub fn read_query(&mut self, sql: &str) -> QueryResult<String> {
        let violations = self.validator.validate(sql);
        if !violations.is_empty() {
            debug!(count = violations.len(), "query rejected");
            return Err(QueryError::validation(violations));
        }

        let executable = if self.source_dialect == self.target_dialect {
            sql.to_string()
        } else {
            transpile(sql, self.source_dialect, self.target_dialect)?
        };

        let mut rows = self
            .backend
            .execute(&executable)
            .map_err(|message| classify_backend_error(&message))?;

        if self.strict_row_limit && rows.rows.len() > self.policy.row_limit {
            return Err(QueryError::RowLimitExceeded {
                actual: rows.rows.len(),
                limit: self.policy.row_limit,
            });
        }

        let removed = rows.truncate(self.policy.row_limit);
        info!(
            rows = rows.rows.len(),
            truncated = removed,
            "query executed"
        );

        let mut csv = rows.to_csv();
        if removed > 0 {
            csv.push_str(&format!(
                "-- Result truncated to {} rows ({} more not shown).\n",
                self.policy.row_limit, removed
            ));
        }
        Ok(csv)
    }

    /// Describe the visible CDM schema by querying `information_schema`
    /// directly on the target warehouse. Source-value columns are filtered
    /// out in SQL unless the policy allows them.
    pub fn describe_schema(&mut self) -> QueryResult<String> {
        let sql = self.information_schema_query();
        let rows = self
            .backend
            .execute(&sql)
            .map_err(|message| classify_backend_error(&message))?;
        Ok(rows.to_csv())
    }

    /// Build the introspection query over the policy's visible tables.
    fn information_schema_query(&self) -> String {
        let tables = self
            .policy
            .visible_tables()
            .iter()
            .map(|t| format!("'{}'", t))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT table_schema, table_name, column_name, data_type \
             FROM information_schema.columns \
             WHERE table_schema IN ('{}', '{}') \
             AND lower(table_name) IN ({})",
            self.cdm_schema, self.vocab_schema, tables
        );
        if !self.policy.allow_source_value_columns {
            sql.push_str(" AND lower(column_name) NOT LIKE '%_source_value%'");
            sql.push_str(" AND lower(column_name) NOT LIKE '%_source_concept_id%'");
        }
        for column in &self.policy.exclude_columns {
            sql.push_str(&format!(" AND lower(column_name) <> '{}'", column));
        }
        sql.push_str(" ORDER BY table_schema, table_name, ordinal_position");
        sql
    }
}
