//! Rule-based SQL validator.
//!
//! Parses a query and runs an ordered battery of policy checks against the
//! syntax tree. Violations are accumulated and returned as data, never
//! raised, so a caller (or an automated query-repair step) sees every
//! problem in a single round trip.

use std::collections::HashSet;
use std::ops::ControlFlow;

use sqlparser::ast::{Expr, ObjectName, Query, SetExpr, Statement, Visit, Visitor};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use strsim::levenshtein;
use tracing::debug;

use crate::policy::{OMOP_TABLES, Policy};

/// A single validation finding. Pure data: the validator returns a list of
/// these instead of raising per-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Input is not parsable as SQL. Fatal: no further checks run.
    Syntax { message: String },
    /// Query is empty or contains only whitespace.
    EmptyQuery,
    /// Statement kind outside the allowed set (only SELECT is permitted).
    NotSelect { kind: String },
    NoTablesFound,
    NoColumnsFound,
    /// References tables outside the canonical OMOP vocabulary. Aggregates
    /// every such table; `suggestions` pairs a missing name with its closest
    /// vocabulary match where one exists.
    TableNotFound {
        tables: Vec<String>,
        suggestions: Vec<(String, String)>,
    },
    /// References tables on the configured deny-list.
    UnauthorizedTable { tables: Vec<String> },
    /// References columns on the configured deny-list.
    UnauthorizedColumn { columns: Vec<String> },
    /// References `*_source_value` / `*_source_concept_id` columns while the
    /// policy forbids them.
    SourceValueColumn { columns: Vec<String> },
}

impl Violation {
    /// Stable kind tag for uniform reporting upstream.
    pub fn kind(&self) -> &'static str {
        match self {
            Violation::Syntax { .. } => "syntax",
            Violation::EmptyQuery => "empty_query",
            Violation::NotSelect { .. } => "not_select",
            Violation::NoTablesFound => "no_tables_found",
            Violation::NoColumnsFound => "no_columns_found",
            Violation::TableNotFound { .. } => "table_not_found",
            Violation::UnauthorizedTable { .. } => "unauthorized_table",
            Violation::UnauthorizedColumn { .. } | Violation::SourceValueColumn { .. } => {
                "unauthorized_column"
            }
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::Syntax { message } => write!(f, "SQL syntax error: {}", message),
            Violation::EmptyQuery => write!(f, "Query cannot be empty."),
            Violation::NotSelect { kind } => write!(
                f,
                "Only SELECT statements are allowed for security reasons (got: {}).",
                kind
            ),
            Violation::NoTablesFound => write!(f, "No tables found in the query."),
            Violation::NoColumnsFound => write!(f, "No columns found in the query."),
            Violation::TableNotFound {
                tables,
                suggestions,
            } => {
                write!(f, "Tables not found in OMOP CDM: {}.", tables.join(", "))?;
                for (table, candidate) in suggestions {
                    write!(f, " Did you mean '{}' instead of '{}'?", candidate, table)?;
                }
                Ok(())
            }
            Violation::UnauthorizedTable { tables } => {
                write!(f, "Unauthorized tables in query: {}.", tables.join(", "))
            }
            Violation::UnauthorizedColumn { columns } => {
                write!(f, "Unauthorized columns in query: {}.", columns.join(", "))
            }
            Violation::SourceValueColumn { columns } => write!(
                f,
                "Source value columns are not allowed: {}. Use the corresponding \
                 concept_id columns with a join on the concept table instead. Inform \
                 the user that this is a security measure to prevent data leakage.",
                columns.join(", ")
            ),
        }
    }
}

/// Table and column references collected from a parsed statement, in
/// document order, de-duplicated case-insensitively.
struct RefCollector {
    cte_names: HashSet<String>,
    tables: Vec<String>,
    columns: Vec<String>,
    seen_tables: HashSet<String>,
    seen_columns: HashSet<String>,
}

impl RefCollector {
    fn new() -> Self {
        Self {
            cte_names: HashSet::new(),
            tables: Vec::new(),
            columns: Vec::new(),
            seen_tables: HashSet::new(),
            seen_columns: HashSet::new(),
        }
    }

    fn record_table(&mut self, name: &str) {
        let folded = name.to_lowercase();
        if self.seen_tables.insert(folded) {
            self.tables.push(name.to_string());
        }
    }

    fn record_column(&mut self, name: &str) {
        let folded = name.to_lowercase();
        if self.seen_columns.insert(folded) {
            self.columns.push(name.to_string());
        }
    }
}

impl Visitor for RefCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        // Names introduced by WITH refer to derived tables, not schema
        // objects; exempt them from the vocabulary check.
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<()> {
        if let Some(ident) = relation.0.last() {
            self.record_table(&ident.value);
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<()> {
        match expr {
            Expr::Identifier(ident) => self.record_column(&ident.value),
            Expr::CompoundIdentifier(parts) => {
                if let Some(ident) = parts.last() {
                    self.record_column(&ident.value);
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

/// Validates SQL text against a [`Policy`].
///
/// Stateless apart from the immutable policy, so one instance can serve
/// concurrent calls.
#[derive(Debug, Clone)]
pub struct Validator {
    policy: Policy,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

impl Validator {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Validate a query. Returns every violation found; an empty list means
    /// the query is safe to execute.
    ///
    /// Checks run in a fixed order: parse, statement kind, table/column
    /// presence, vocabulary membership, deny-lists, source-value convention.
    /// A parse failure or a non-SELECT root stops the battery early since
    /// the later structural checks are meaningless on those shapes.
    pub fn validate(&self, sql: &str) -> Vec<Violation> {
        if sql.trim().is_empty() {
            return vec![Violation::EmptyQuery];
        }

        let statements = match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
            Ok(statements) => statements,
            Err(err) => {
                return vec![Violation::Syntax {
                    message: err.to_string(),
                }];
            }
        };

        let statement = match statements.as_slice() {
            [] => return vec![Violation::EmptyQuery],
            [statement] => statement,
            _ => {
                return vec![Violation::Syntax {
                    message: format!(
                        "expected a single SQL statement, found {}",
                        statements.len()
                    ),
                }];
            }
        };

        if let Some(kind) = non_select_kind(statement) {
            return vec![Violation::NotSelect { kind }];
        }

        let mut collector = RefCollector::new();
        let _ = statement.visit(&mut collector);

        let mut violations = Vec::new();

        if collector.tables.is_empty() {
            violations.push(Violation::NoTablesFound);
        }
        if collector.columns.is_empty() {
            violations.push(Violation::NoColumnsFound);
        }

        let unknown: Vec<String> = collector
            .tables
            .iter()
            .filter(|t| {
                let folded = t.to_lowercase();
                !self.policy.is_omop_table(&folded) && !collector.cte_names.contains(&folded)
            })
            .cloned()
            .collect();
        if !unknown.is_empty() {
            let suggestions = unknown
                .iter()
                .filter_map(|t| did_you_mean(&t.to_lowercase()).map(|s| (t.clone(), s)))
                .collect();
            violations.push(Violation::TableNotFound {
                tables: unknown,
                suggestions,
            });
        }

        let denied_tables: Vec<String> = collector
            .tables
            .iter()
            .filter(|t| self.policy.is_excluded_table(&t.to_lowercase()))
            .cloned()
            .collect();
        if !denied_tables.is_empty() {
            violations.push(Violation::UnauthorizedTable {
                tables: denied_tables,
            });
        }

        let denied_columns: Vec<String> = collector
            .columns
            .iter()
            .filter(|c| self.policy.is_excluded_column(&c.to_lowercase()))
            .cloned()
            .collect();
        if !denied_columns.is_empty() {
            violations.push(Violation::UnauthorizedColumn {
                columns: denied_columns,
            });
        }

        if !self.policy.allow_source_value_columns {
            let source_columns: Vec<String> = collector
                .columns
                .iter()
                .filter(|c| self.policy.is_source_value_column(&c.to_lowercase()))
                .cloned()
                .collect();
            if !source_columns.is_empty() {
                violations.push(Violation::SourceValueColumn {
                    columns: source_columns,
                });
            }
        }

        debug!(
            violations = violations.len(),
            tables = collector.tables.len(),
            columns = collector.columns.len(),
            "validated query"
        );

        violations
    }
}

/// Returns the statement kind name when the root is not a plain SELECT.
fn non_select_kind(statement: &Statement) -> Option<String> {
    match statement {
        Statement::Query(query) => set_expr_kind(query.body.as_ref()),
        Statement::Insert(_) => Some("INSERT".to_string()),
        Statement::Update { .. } => Some("UPDATE".to_string()),
        Statement::Delete(_) => Some("DELETE".to_string()),
        Statement::Truncate { .. } => Some("TRUNCATE".to_string()),
        Statement::Drop { .. } => Some("DROP".to_string()),
        other => Some(kind_label(&other.to_string())),
    }
}

fn set_expr_kind(body: &SetExpr) -> Option<String> {
    match body {
        SetExpr::Select(_) => None,
        // Redundant parens around the whole query; still a SELECT.
        SetExpr::Query(inner) => set_expr_kind(inner.body.as_ref()),
        SetExpr::SetOperation { op, .. } => Some(op.to_string().to_uppercase()),
        SetExpr::Values(_) => Some("VALUES".to_string()),
        other => Some(kind_label(&other.to_string())),
    }
}

/// First keyword of the rendered statement, as a readable kind name.
fn kind_label(rendered: &str) -> String {
    rendered
        .trim_start_matches(['(', ' '])
        .split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .to_uppercase()
}

/// Find the closest OMOP table name within a Levenshtein threshold.
fn did_you_mean(input: &str) -> Option<String> {
    let mut best_match = None;
    let mut min_dist = usize::MAX;

    for cand in OMOP_TABLES {
        let dist = levenshtein(input, cand);

        // Dynamic threshold based on length
        let threshold = match input.len() {
            0..=2 => 0,
            3..=5 => 2,
            _ => 3,
        };

        if dist <= threshold && dist < min_dist {
            min_dist = dist;
            best_match = Some(cand.to_string());
        }
    }

    best_match
}
