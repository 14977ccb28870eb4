//! Dialect transpiler.
//!
//! Rewrites PostgreSQL date-arithmetic and range-type idioms into Databricks
//! Spark SQL equivalents by transforming the parsed tree, then re-printing
//! it. Rewriting iterates to a fixed point because one rule's output can
//! expose a pattern for another rule one level up.

mod matchers;
mod rewrite;

use std::ops::ControlFlow;
use std::str::FromStr;

use sqlparser::ast::{Expr, Statement, VisitMut, VisitorMut};
use sqlparser::dialect::{
    DatabricksDialect, Dialect as ParserDialect, DuckDbDialect, GenericDialect, PostgreSqlDialect,
};
use sqlparser::parser::Parser;
use thiserror::Error;
use tracing::debug;

pub use matchers::{
    abs_sub_operands, date_sub_operands, daterange_args, epoch_day_operands, is_numeric_value,
    looks_like_range, range_intersection_operands, range_overlap_operands,
};

/// Rewrite passes are re-applied until the printed SQL stops changing; this
/// cap guarantees termination if a rule pair were ever to oscillate.
const MAX_REWRITE_PASSES: usize = 10;

/// SQL dialects understood by the transpiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Databricks,
    DuckDb,
    Generic,
}

impl Dialect {
    fn parser(&self) -> Box<dyn ParserDialect> {
        match self {
            Dialect::Postgres => Box::new(PostgreSqlDialect {}),
            Dialect::Databricks => Box::new(DatabricksDialect {}),
            Dialect::DuckDb => Box::new(DuckDbDialect {}),
            Dialect::Generic => Box::new(GenericDialect {}),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Databricks => "databricks",
            Dialect::DuckDb => "duckdb",
            Dialect::Generic => "generic",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = TranspileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "databricks" | "spark" => Ok(Dialect::Databricks),
            "duckdb" => Ok(Dialect::DuckDb),
            "generic" => Ok(Dialect::Generic),
            other => Err(TranspileError {
                message: format!("unknown dialect: {}", other),
                sql: String::new(),
            }),
        }
    }
}

/// Transpilation failed: the input did not parse, or the dialect pair is
/// unusable. Carries the original SQL for diagnosis.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to transpile query: {message} (sql: {sql})")]
pub struct TranspileError {
    pub message: String,
    pub sql: String,
}

struct ExprRewriter {
    changed: bool,
}

impl VisitorMut for ExprRewriter {
    type Break = ();

    fn post_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<()> {
        if let Some(replacement) = rewrite::rewrite_expr(expr) {
            *expr = replacement;
            self.changed = true;
        }
        ControlFlow::Continue(())
    }
}

/// Transpile a query between dialects.
///
/// Identical source and target dialects return the input unchanged. The
/// custom rewrite rules apply to the Postgres→Databricks pair only; any
/// other pair is parsed and re-printed without structural changes.
pub fn transpile(sql: &str, from: Dialect, to: Dialect) -> Result<String, TranspileError> {
    if from == to {
        return Ok(sql.to_string());
    }

    let custom_rules = from == Dialect::Postgres && to == Dialect::Databricks;
    let input = if custom_rules {
        rewrite::mark_interval_casts(&rewrite::mark_empty_predicates(sql))
    } else {
        sql.to_string()
    };

    let mut statements =
        Parser::parse_sql(from.parser().as_ref(), &input).map_err(|err| TranspileError {
            message: err.to_string(),
            sql: sql.to_string(),
        })?;
    if statements.is_empty() {
        return Err(TranspileError {
            message: "empty query".to_string(),
            sql: sql.to_string(),
        });
    }

    if custom_rules {
        for statement in &mut statements {
            rewrite_to_fixed_point(statement);
        }
    }

    let rendered = statements
        .iter()
        .map(Statement::to_string)
        .collect::<Vec<_>>()
        .join(";\n");

    // An emptiness marker that survived the fixed-point loop means the
    // predicate's operand was not a recognizable range; shipping the
    // marker would leak an internal identifier into executable SQL.
    if custom_rules
        && (rendered.contains(rewrite::IS_EMPTY_MARKER)
            || rendered.contains(rewrite::NOT_EMPTY_MARKER))
    {
        return Err(TranspileError {
            message: "IS [NOT] EMPTY applied to an expression that is not a recognizable range"
                .to_string(),
            sql: sql.to_string(),
        });
    }

    Ok(rendered)
}

/// Re-apply the rule set until a pass leaves the printed statement
/// unchanged, bounded by [`MAX_REWRITE_PASSES`].
fn rewrite_to_fixed_point(statement: &mut Statement) {
    let mut rendered = statement.to_string();
    for pass in 0..MAX_REWRITE_PASSES {
        let mut rewriter = ExprRewriter { changed: false };
        let _ = statement.visit(&mut rewriter);
        let after = statement.to_string();
        if !rewriter.changed || after == rendered {
            debug!(passes = pass + 1, "rewrite converged");
            return;
        }
        rendered = after;
    }
    debug!(passes = MAX_REWRITE_PASSES, "rewrite pass cap reached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn to_databricks(sql: &str) -> String {
        transpile(sql, Dialect::Postgres, Dialect::Databricks).expect("transpile")
    }

    #[test]
    fn test_same_dialect_is_a_no_op() {
        let sql = "SELECT (a - b) <= 30 FROM person";
        let out = transpile(sql, Dialect::Postgres, Dialect::Postgres).expect("transpile");
        assert_eq!(out, sql);
    }

    #[test]
    fn test_parse_failure_is_fatal() {
        let err = transpile("SELEC 1", Dialect::Postgres, Dialect::Databricks).unwrap_err();
        assert!(err.sql.contains("SELEC 1"));
    }

    #[test]
    fn test_date_subtraction_becomes_datediff() {
        let out = to_databricks(
            "SELECT person_id FROM condition_occurrence co \
             WHERE (co.condition_start_date - co.condition_end_date) <= 30",
        );
        assert!(
            out.contains("DATEDIFF(co.condition_start_date, co.condition_end_date) <= 30"),
            "got: {}",
            out
        );
    }

    #[test]
    fn test_cast_wrapped_subtraction() {
        let out = to_databricks(
            "SELECT 1 FROM visit_occurrence \
             WHERE (CAST(visit_end_date AS TIMESTAMP) - CAST(visit_start_date AS TIMESTAMP)) > 7",
        );
        assert!(
            out.contains("DATEDIFF(visit_end_date, visit_start_date) > 7"),
            "got: {}",
            out
        );
    }

    #[test]
    fn test_epoch_pattern_drops_division_wrapper() {
        let out = to_databricks(
            "SELECT 1 FROM visit_occurrence \
             WHERE CAST(EXTRACT(EPOCH FROM (visit_end_datetime - visit_start_datetime)) / 86400 AS BIGINT) <= 30",
        );
        assert!(
            out.contains("DATEDIFF(visit_end_datetime, visit_start_datetime) <= 30"),
            "got: {}",
            out
        );
        assert!(!out.contains("86400"), "got: {}", out);
    }

    #[test]
    fn test_abs_difference() {
        let out = to_databricks(
            "SELECT 1 FROM measurement WHERE ABS(measurement_date - visit_start_date) < 14",
        );
        assert!(
            out.contains("ABS(DATEDIFF(measurement_date, visit_start_date)) < 14"),
            "got: {}",
            out
        );
    }

    #[test]
    fn test_year_arithmetic_untouched() {
        let sql = "SELECT 1 FROM person \
                   WHERE EXTRACT(YEAR FROM observation_period_start_date) - year_of_birth >= 18";
        let out = to_databricks(sql);
        assert!(!out.contains("DATEDIFF"), "got: {}", out);
    }

    #[test]
    fn test_daterange_becomes_struct() {
        let out = to_databricks(
            "SELECT DATERANGE(drug_era_start_date, drug_era_end_date) FROM drug_era",
        );
        assert!(
            out.contains("NAMED_STRUCT('start', drug_era_start_date, 'end', drug_era_end_date)"),
            "got: {}",
            out
        );
    }

    #[test]
    fn test_range_overlap() {
        let out = to_databricks("SELECT 1 FROM drug_era WHERE r1 && r2");
        assert!(
            out.contains("r1.start <= r2.end AND r2.start <= r1.end"),
            "got: {}",
            out
        );
    }

    #[test]
    fn test_nested_ranges_reach_fixed_point() {
        let out = to_databricks(
            "SELECT 1 FROM condition_era \
             WHERE DATERANGE(a_start, a_end) && (DATERANGE(b_start, b_end) * DATERANGE(c_start, c_end))",
        );
        assert!(!out.contains("&&"), "got: {}", out);
        assert!(!out.contains("DATERANGE"), "got: {}", out);
        assert!(out.contains("GREATEST"), "got: {}", out);
        assert!(out.contains("LEAST"), "got: {}", out);
    }

    #[test]
    fn test_is_empty_predicates() {
        let out = to_databricks("SELECT 1 FROM drug_era WHERE dr IS EMPTY");
        assert!(out.contains("dr.start > dr.end"), "got: {}", out);

        let out = to_databricks("SELECT 1 FROM drug_era WHERE dr IS NOT EMPTY");
        assert!(out.contains("dr.start <= dr.end"), "got: {}", out);
    }

    #[test]
    fn test_is_empty_on_unrecognized_range_is_an_error() {
        let err = transpile(
            "SELECT 1 FROM drug_era WHERE my_range(x) IS EMPTY",
            Dialect::Postgres,
            Dialect::Databricks,
        )
        .unwrap_err();
        assert!(err.message.contains("EMPTY"), "got: {}", err.message);
        // The original SQL is reported, not the internally marked form.
        assert_eq!(err.sql, "SELECT 1 FROM drug_era WHERE my_range(x) IS EMPTY");
    }

    #[test]
    fn test_interval_cast_in_scalar_context() {
        let out = to_databricks(
            "SELECT visit_start_date + '30 days'::interval FROM visit_occurrence",
        );
        assert!(out.contains("INTERVAL 30 DAY"), "got: {}", out);
        assert!(!out.contains("::"), "got: {}", out);
    }

    #[test]
    fn test_date_plus_days() {
        let out = to_databricks(
            "SELECT drug_exposure_start_date + 30 FROM drug_exposure",
        );
        assert!(
            out.contains("DATE_ADD(drug_exposure_start_date, 30)"),
            "got: {}",
            out
        );
    }

    #[test]
    fn test_ordinary_multiplication_untouched() {
        let out = to_databricks("SELECT quantity * 3 FROM drug_exposure");
        assert!(out.contains("quantity * 3"), "got: {}", out);
    }

    #[test]
    fn test_window_interval_frame() {
        let out = to_databricks(
            "SELECT SUM(quantity) OVER (ORDER BY drug_exposure_start_date \
             RANGE BETWEEN CURRENT ROW AND '30 days'::interval FOLLOWING) FROM drug_exposure",
        );
        assert!(out.contains("INTERVAL 30 DAY FOLLOWING"), "got: {}", out);
    }

    #[test]
    fn test_dialect_round_trip_names() {
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("Databricks".parse::<Dialect>().unwrap(), Dialect::Databricks);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
