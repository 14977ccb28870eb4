//! Structural rewrite rules: PostgreSQL date/range idioms to their
//! Databricks Spark SQL equivalents.
//!
//! Each rule is conservative: when a node does not match confidently it is
//! left untouched, so unfamiliar SQL passes through unchanged.

use sqlparser::ast::{
    BinaryOperator, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArgumentList,
    FunctionArguments, Ident, Interval, ObjectName, Value,
};

use super::matchers::{
    abs_sub_operands, date_sub_operands, daterange_args, epoch_day_operands, interval_cast_parts,
    interval_literal_parts, is_numeric_value, range_intersection_operands, range_overlap_operands,
    range_struct_fields, unwrap_nested,
};

/// Marker identifiers injected by [`mark_empty_predicates`] for the
/// `IS [NOT] EMPTY` range predicates, which the SQL parser cannot represent
/// directly.
pub(super) const IS_EMPTY_MARKER: &str = "__RANGE_IS_EMPTY__";
pub(super) const NOT_EMPTY_MARKER: &str = "__RANGE_NOT_EMPTY__";

/// Which bound of a range record to project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeField {
    Start,
    End,
}

impl RangeField {
    fn name(self) -> &'static str {
        match self {
            RangeField::Start => "start",
            RangeField::End => "end",
        }
    }
}

/// Plain function call expression.
fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function(Function {
        name: ObjectName(vec![Ident::new(name)]),
        args: FunctionArguments::List(FunctionArgumentList {
            duplicate_treatment: None,
            args: args
                .into_iter()
                .map(|arg| FunctionArg::Unnamed(FunctionArgExpr::Expr(arg)))
                .collect(),
            clauses: vec![],
        }),
        filter: None,
        null_treatment: None,
        over: None,
        within_group: vec![],
        parameters: FunctionArguments::None,
    })
}

fn string_literal(value: &str) -> Expr {
    Expr::Value(Value::SingleQuotedString(value.to_string()))
}

/// `DATEDIFF(end, start)` — Databricks returns whole days, end minus start.
fn datediff(end: Expr, start: Expr) -> Expr {
    call("DATEDIFF", vec![end, start])
}

/// Two-field record standing in for a PostgreSQL range value:
/// `NAMED_STRUCT('start', start, 'end', end)`.
fn range_struct(start: Expr, end: Expr) -> Expr {
    call(
        "NAMED_STRUCT",
        vec![string_literal("start"), start, string_literal("end"), end],
    )
}

/// Project one bound out of a range expression.
///
/// A record produced by an earlier rewrite pass is destructured directly;
/// identifier references become a dotted field access. Anything else is not
/// confidently a range and yields `None`, leaving the caller's node alone.
fn range_field(expr: &Expr, field: RangeField) -> Option<Expr> {
    match unwrap_nested(expr) {
        Expr::Function(func) => {
            let (start, end) = range_struct_fields(func)?;
            Some(match field {
                RangeField::Start => start.clone(),
                RangeField::End => end.clone(),
            })
        }
        Expr::Identifier(ident) => Some(Expr::CompoundIdentifier(vec![
            ident.clone(),
            Ident::new(field.name()),
        ])),
        Expr::CompoundIdentifier(parts) => {
            let mut parts = parts.clone();
            parts.push(Ident::new(field.name()));
            Some(Expr::CompoundIdentifier(parts))
        }
        _ => None,
    }
}

/// `R1.start <= R2.end AND R2.start <= R1.end`
fn overlap_condition(left: &Expr, right: &Expr) -> Option<Expr> {
    let left_start = range_field(left, RangeField::Start)?;
    let left_end = range_field(left, RangeField::End)?;
    let right_start = range_field(right, RangeField::Start)?;
    let right_end = range_field(right, RangeField::End)?;

    Some(Expr::BinaryOp {
        left: Box::new(Expr::BinaryOp {
            left: Box::new(left_start),
            op: BinaryOperator::LtEq,
            right: Box::new(right_end),
        }),
        op: BinaryOperator::And,
        right: Box::new(Expr::BinaryOp {
            left: Box::new(right_start),
            op: BinaryOperator::LtEq,
            right: Box::new(left_end),
        }),
    })
}

/// `NAMED_STRUCT('start', GREATEST(R1.start, R2.start), 'end', LEAST(R1.end, R2.end))`
fn intersection_struct(left: &Expr, right: &Expr) -> Option<Expr> {
    let left_start = range_field(left, RangeField::Start)?;
    let left_end = range_field(left, RangeField::End)?;
    let right_start = range_field(right, RangeField::Start)?;
    let right_end = range_field(right, RangeField::End)?;

    Some(range_struct(
        call("GREATEST", vec![left_start, right_start]),
        call("LEAST", vec![left_end, right_end]),
    ))
}

/// Emptiness predicate over a range record: empty means start after end.
fn emptiness_condition(range: &Expr, empty: bool) -> Option<Expr> {
    let start = range_field(range, RangeField::Start)?;
    let end = range_field(range, RangeField::End)?;
    let op = if empty {
        BinaryOperator::Gt
    } else {
        BinaryOperator::LtEq
    };
    Some(Expr::BinaryOp {
        left: Box::new(start),
        op,
        right: Box::new(end),
    })
}

fn is_marker(expr: &Expr, marker: &str) -> bool {
    matches!(expr, Expr::Identifier(ident) if ident.value == marker)
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
    )
}

/// Apply every rewrite rule to a single node. Returns the replacement
/// expression, or `None` when no rule matches.
pub(super) fn rewrite_expr(expr: &Expr) -> Option<Expr> {
    // '<N> <unit>'::interval → INTERVAL N UNIT (window frame bounds included).
    if let Some((number, field)) = interval_cast_parts(expr) {
        return Some(Expr::Interval(Interval {
            value: Box::new(Expr::Value(Value::Number(number, false))),
            leading_field: Some(field),
            leading_precision: None,
            last_field: None,
            fractional_seconds_precision: None,
        }));
    }

    // DATERANGE(start, end, ...) → range record. Bounds flag is dropped:
    // OMOP analytic queries use closed date ranges.
    if let Some((start, end, _bounds)) = daterange_args(expr) {
        return Some(range_struct(start.clone(), end.clone()));
    }

    // R1 && R2 → pairwise bound comparison.
    if let Some((left, right)) = range_overlap_operands(expr) {
        return overlap_condition(left, right);
    }

    // R1 * R2 → GREATEST/LEAST record.
    if let Some((left, right)) = range_intersection_operands(expr) {
        return intersection_struct(left, right);
    }

    if let Expr::BinaryOp { left, op, right } = expr {
        // Emptiness markers injected by the textual pre-pass.
        if *op == BinaryOperator::Eq {
            if is_marker(right, IS_EMPTY_MARKER) {
                return emptiness_condition(left, true);
            }
            if is_marker(right, NOT_EMPTY_MARKER) {
                return emptiness_condition(left, false);
            }
        }

        // date + N → DATE_ADD(date, N). Left side must not itself be a
        // number, or integer arithmetic would be mangled.
        if *op == BinaryOperator::Plus
            && matches!(right.as_ref(), Expr::Value(Value::Number(_, _)))
            && !is_numeric_value(left)
        {
            return Some(call("DATE_ADD", vec![left.as_ref().clone(), right.as_ref().clone()]));
        }

        // Day-count comparisons: rewrite the date-difference idiom on the
        // left when the right side is a numeric threshold.
        if is_comparison(op) && is_numeric_value(right) {
            let replacement = if let Some((a, b)) = abs_sub_operands(left) {
                Some(call("ABS", vec![datediff(a, b)]))
            } else if let Some((a, b)) = epoch_day_operands(left) {
                Some(datediff(a, b))
            } else {
                date_sub_operands(left).map(|(a, b)| datediff(a, b))
            };
            if let Some(diff) = replacement {
                return Some(Expr::BinaryOp {
                    left: Box::new(diff),
                    op: op.clone(),
                    right: right.clone(),
                });
            }
        }
    }

    None
}

/// Rewrite `IS [NOT] EMPTY` predicates into marker comparisons before
/// parsing, since the parser has no production for them. The scan is
/// quote-aware so string and quoted-identifier contents pass through
/// untouched.
pub(super) fn mark_empty_predicates(sql: &str) -> String {
    let lower = sql.to_ascii_lowercase();
    let mut out = String::with_capacity(sql.len() + 16);
    let mut in_single = false;
    let mut in_double = false;
    let mut prev_word_char = false;
    let mut i = 0;

    while i < sql.len() {
        let c = sql[i..].chars().next().expect("in-bounds index");
        if c == '\'' && !in_double {
            in_single = !in_single;
        } else if c == '"' && !in_single {
            in_double = !in_double;
        } else if !in_single && !in_double && !prev_word_char {
            if let Some(len) = match_phrase(&lower[i..], &["is", "not", "empty"]) {
                out.push_str("= ");
                out.push_str(NOT_EMPTY_MARKER);
                i += len;
                prev_word_char = true;
                continue;
            }
            if let Some(len) = match_phrase(&lower[i..], &["is", "empty"]) {
                out.push_str("= ");
                out.push_str(IS_EMPTY_MARKER);
                i += len;
                prev_word_char = true;
                continue;
            }
        }
        prev_word_char = c.is_alphanumeric() || c == '_';
        out.push(c);
        i += c.len_utf8();
    }

    out
}

/// Rewrite `'<N> <unit>'::interval` casts into `INTERVAL N UNIT` literals
/// before parsing. The parser rejects the cast form inside window frame
/// bounds, so this has to happen textually. String literals that are not a
/// recognizable interval body, and anything inside quoted identifiers, pass
/// through untouched.
pub(super) fn mark_interval_casts(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_double = false;
    let mut i = 0;

    while i < sql.len() {
        let c = sql[i..].chars().next().expect("in-bounds index");
        if c == '"' {
            in_double = !in_double;
        } else if c == '\'' && !in_double {
            if let Some((literal, end)) = read_string_literal(sql, i) {
                if let Some(suffix) = match_interval_suffix(&sql[end..]) {
                    if let Some((number, field)) = interval_literal_parts(&literal) {
                        out.push_str(&format!("INTERVAL {} {}", number, field));
                        i = end + suffix;
                        continue;
                    }
                }
                out.push_str(&sql[i..end]);
                i = end;
                continue;
            }
        }
        out.push(c);
        i += c.len_utf8();
    }

    out
}

/// Read the single-quoted string literal starting at `start`, returning its
/// unescaped content and the index just past the closing quote. Doubled
/// quotes are the escape form. An unterminated literal yields `None`.
fn read_string_literal(sql: &str, start: usize) -> Option<(String, usize)> {
    let mut content = String::new();
    let mut i = start + 1;
    while i < sql.len() {
        let c = sql[i..].chars().next()?;
        if c == '\'' {
            if sql[i + 1..].starts_with('\'') {
                content.push('\'');
                i += 2;
                continue;
            }
            return Some((content, i + 1));
        }
        content.push(c);
        i += c.len_utf8();
    }
    None
}

/// Match an optional-whitespace `::interval` suffix at the start of `s`,
/// returning the matched length.
fn match_interval_suffix(s: &str) -> Option<usize> {
    let mut pos = s.len() - s.trim_start().len();
    if !s[pos..].starts_with("::") {
        return None;
    }
    pos += 2;
    pos += s[pos..].len() - s[pos..].trim_start().len();
    if !s.get(pos..pos + 8)?.eq_ignore_ascii_case("interval") {
        return None;
    }
    pos += 8;
    match s[pos..].chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(pos),
    }
}

/// Match whitespace-separated `words` at the start of `s`, returning the
/// matched length. The character after the phrase must not continue a word.
fn match_phrase(s: &str, words: &[&str]) -> Option<usize> {
    let mut pos = 0;
    for (idx, word) in words.iter().enumerate() {
        if idx > 0 {
            let rest = &s[pos..];
            let skipped = rest.len() - rest.trim_start().len();
            if skipped == 0 {
                return None;
            }
            pos += skipped;
        }
        if !s[pos..].starts_with(word) {
            return None;
        }
        pos += word.len();
    }
    match s[pos..].chars().next() {
        Some(c) if c.is_alphanumeric() || c == '_' => None,
        _ => Some(pos),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mark_empty_predicates() {
        assert_eq!(
            mark_empty_predicates("r IS EMPTY"),
            format!("r = {}", IS_EMPTY_MARKER)
        );
        assert_eq!(
            mark_empty_predicates("r is not empty"),
            format!("r = {}", NOT_EMPTY_MARKER)
        );
    }

    #[test]
    fn test_mark_empty_skips_strings_and_null_checks() {
        assert_eq!(
            mark_empty_predicates("SELECT 'x IS EMPTY' FROM t"),
            "SELECT 'x IS EMPTY' FROM t"
        );
        assert_eq!(
            mark_empty_predicates("x IS NOT NULL"),
            "x IS NOT NULL"
        );
        // Word boundary: identifiers ending in "is" must not trigger.
        assert_eq!(
            mark_empty_predicates("analysis empty_flag"),
            "analysis empty_flag"
        );
    }

    #[test]
    fn test_mark_interval_casts() {
        assert_eq!(mark_interval_casts("'30 days'::interval"), "INTERVAL 30 DAY");
        assert_eq!(mark_interval_casts("'1 month' :: INTERVAL"), "INTERVAL 1 MONTH");
    }

    #[test]
    fn test_mark_interval_casts_leaves_non_intervals() {
        // Not a `<N> <unit>` body.
        assert_eq!(mark_interval_casts("'soon'::interval"), "'soon'::interval");
        // No cast suffix.
        assert_eq!(
            mark_interval_casts("SELECT '30 days' FROM t"),
            "SELECT '30 days' FROM t"
        );
        // Inside a quoted identifier.
        assert_eq!(
            mark_interval_casts("\"'30 days'::interval\""),
            "\"'30 days'::interval\""
        );
    }

    #[test]
    fn test_mark_interval_casts_handles_escaped_quotes() {
        assert_eq!(
            mark_interval_casts("SELECT 'it''s'::interval FROM t"),
            "SELECT 'it''s'::interval FROM t"
        );
    }

    #[test]
    fn test_range_struct_shape() {
        let expr = range_struct(
            Expr::Identifier(Ident::new("a")),
            Expr::Identifier(Ident::new("b")),
        );
        assert_eq!(expr.to_string(), "NAMED_STRUCT('start', a, 'end', b)");
    }

    #[test]
    fn test_range_field_on_identifier() {
        let range = Expr::Identifier(Ident::new("dr"));
        let start = range_field(&range, RangeField::Start).expect("field");
        assert_eq!(start.to_string(), "dr.start");
    }

    #[test]
    fn test_range_field_destructures_struct() {
        let range = range_struct(
            Expr::Identifier(Ident::new("a")),
            Expr::Identifier(Ident::new("b")),
        );
        let end = range_field(&range, RangeField::End).expect("field");
        assert_eq!(end.to_string(), "b");
    }

    #[test]
    fn test_range_field_refuses_unknown_shapes() {
        let literal = Expr::Value(Value::Number("1".to_string(), false));
        assert!(range_field(&literal, RangeField::Start).is_none());
    }
}
