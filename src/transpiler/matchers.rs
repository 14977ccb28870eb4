//! AST shape recognizers for the dialect rewriter.
//!
//! Every matcher is a total, side-effect-free function from a node to either
//! the semantically relevant sub-expressions or `None`. Non-matching input
//! never produces partial output.

use sqlparser::ast::{
    BinaryOperator, CastKind, DataType, DateTimeField, Expr, Function, FunctionArg,
    FunctionArgExpr, FunctionArguments, Value,
};

/// Strip redundant parenthesization.
pub fn unwrap_nested(expr: &Expr) -> &Expr {
    match expr {
        Expr::Nested(inner) => unwrap_nested(inner),
        _ => expr,
    }
}

/// Remove a `CAST(... AS TIMESTAMP)` wrapper if present.
pub fn unwrap_timestamp_cast(expr: &Expr) -> &Expr {
    if let Expr::Cast {
        expr: inner,
        data_type: DataType::Timestamp(_, _),
        ..
    } = expr
    {
        return inner;
    }
    expr
}

/// `EXTRACT(YEAR FROM ...)` yields an integer, not a date; subtractions
/// involving it are integer arithmetic and must not become `DATEDIFF`.
pub fn is_year_extract(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Extract {
            field: DateTimeField::Year,
            ..
        }
    )
}

/// Match `A - B` (each operand optionally wrapped in a TIMESTAMP cast or
/// parens) and return the date operands. Rejects subtractions where either
/// operand is a year extraction.
pub fn date_sub_operands(expr: &Expr) -> Option<(Expr, Expr)> {
    let Expr::BinaryOp {
        left,
        op: BinaryOperator::Minus,
        right,
    } = unwrap_nested(expr)
    else {
        return None;
    };

    let left = unwrap_timestamp_cast(left);
    let right = unwrap_timestamp_cast(right);

    if is_year_extract(left) || is_year_extract(right) {
        return None;
    }

    Some((left.clone(), right.clone()))
}

/// Match the PostgreSQL day-difference idiom
/// `CAST(EXTRACT(EPOCH FROM (A - B)) / 86400 AS BIGINT)` and return `(A, B)`.
pub fn epoch_day_operands(expr: &Expr) -> Option<(Expr, Expr)> {
    let Expr::Cast {
        expr: inner,
        data_type: DataType::BigInt(_),
        ..
    } = expr
    else {
        return None;
    };

    let Expr::BinaryOp {
        left,
        op: BinaryOperator::Divide,
        right,
    } = unwrap_nested(inner)
    else {
        return None;
    };

    match unwrap_nested(right) {
        // Seconds in a day.
        Expr::Value(Value::Number(n, _)) if n == "86400" => {}
        _ => return None,
    }

    let Expr::Extract {
        field: DateTimeField::Epoch,
        expr: extracted,
        ..
    } = unwrap_nested(left)
    else {
        return None;
    };

    date_sub_operands(extracted)
}

/// Match `ABS(A - B)` (with optional redundant parens) and return `(A, B)`.
pub fn abs_sub_operands(expr: &Expr) -> Option<(Expr, Expr)> {
    let Expr::Function(func) = expr else {
        return None;
    };
    if !func.name.to_string().eq_ignore_ascii_case("abs") {
        return None;
    }
    let args = unnamed_args(func)?;
    match args.as_slice() {
        [arg] => date_sub_operands(arg),
        _ => None,
    }
}

/// Match a `DATERANGE(start, end[, bounds])` constructor call.
pub fn daterange_args(expr: &Expr) -> Option<(&Expr, &Expr, Option<&Expr>)> {
    let Expr::Function(func) = expr else {
        return None;
    };
    if !func.name.to_string().eq_ignore_ascii_case("daterange") {
        return None;
    }
    let args = unnamed_args(func)?;
    match args.as_slice() {
        [start, end] => Some((start, end, None)),
        [start, end, bounds, ..] => Some((start, end, Some(bounds))),
        _ => None,
    }
}

/// Match the PostgreSQL range-overlap operator `R1 && R2`.
pub fn range_overlap_operands(expr: &Expr) -> Option<(&Expr, &Expr)> {
    let Expr::BinaryOp { left, op, right } = expr else {
        return None;
    };
    if op.to_string() == "&&" {
        Some((left, right))
    } else {
        None
    }
}

/// Match `R1 * R2` used as range intersection. `*` doubles as ordinary
/// multiplication, so both operands must structurally look like ranges;
/// anything else is left to arithmetic.
pub fn range_intersection_operands(expr: &Expr) -> Option<(&Expr, &Expr)> {
    let Expr::BinaryOp {
        left,
        op: BinaryOperator::Multiply,
        right,
    } = expr
    else {
        return None;
    };
    if looks_like_range(left) && looks_like_range(right) {
        Some((left, right))
    } else {
        None
    }
}

/// Structural heuristic: nested range operators, range struct constructors,
/// and bare identifiers qualify; field accesses into `.start`/`.end` and
/// everything else do not.
pub fn looks_like_range(expr: &Expr) -> bool {
    match unwrap_nested(expr) {
        // A nested intersection is itself a range.
        Expr::BinaryOp {
            op: BinaryOperator::Multiply,
            ..
        } => true,
        Expr::Function(func) => is_range_struct(func),
        Expr::Identifier(ident) => !is_bound_field(&ident.value),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|ident| !is_bound_field(&ident.value))
            .unwrap_or(false),
        _ => false,
    }
}

fn is_bound_field(name: &str) -> bool {
    name.eq_ignore_ascii_case("start") || name.eq_ignore_ascii_case("end")
}

/// Is this one of the `NAMED_STRUCT('start', ..., 'end', ...)` records the
/// rewriter produces for ranges?
pub fn is_range_struct(func: &Function) -> bool {
    range_struct_fields(func).is_some()
}

/// Destructure a rewriter-produced range record into `(start, end)`.
pub fn range_struct_fields(func: &Function) -> Option<(&Expr, &Expr)> {
    if !func.name.to_string().eq_ignore_ascii_case("named_struct") {
        return None;
    }
    let args = unnamed_args(func)?;
    match args.as_slice() {
        [key_start, start, key_end, end]
            if is_string_literal(key_start, "start") && is_string_literal(key_end, "end") =>
        {
            Some((start, end))
        }
        _ => None,
    }
}

fn is_string_literal(expr: &Expr, expected: &str) -> bool {
    matches!(expr, Expr::Value(Value::SingleQuotedString(s)) if s.eq_ignore_ascii_case(expected))
}

/// Literal number, query placeholder, or an integer cast of either —
/// the shapes accepted as a day-count threshold on a comparison's
/// right-hand side.
pub fn is_numeric_value(expr: &Expr) -> bool {
    match expr {
        Expr::Value(Value::Number(_, _)) | Expr::Value(Value::Placeholder(_)) => true,
        Expr::Cast {
            expr: inner,
            data_type:
                DataType::Int(_) | DataType::Integer(_) | DataType::BigInt(_) | DataType::SmallInt(_),
            ..
        } => matches!(
            inner.as_ref(),
            Expr::Value(Value::Number(_, _)) | Expr::Value(Value::Placeholder(_))
        ),
        _ => false,
    }
}

/// Match a `'<N> <unit>'::interval` cast and return the literal parts.
pub fn interval_cast_parts(expr: &Expr) -> Option<(String, DateTimeField)> {
    let Expr::Cast {
        expr: inner,
        data_type: DataType::Interval,
        kind: CastKind::Cast | CastKind::DoubleColon,
        ..
    } = expr
    else {
        return None;
    };
    let Expr::Value(Value::SingleQuotedString(text)) = inner.as_ref() else {
        return None;
    };
    interval_literal_parts(text)
}

/// Parse an interval string literal body of the form `<N> <unit>`.
pub fn interval_literal_parts(text: &str) -> Option<(String, DateTimeField)> {
    let mut parts = text.split_whitespace();
    let number = parts.next()?;
    let unit = parts.next()?;
    if parts.next().is_some() || number.parse::<i64>().is_err() {
        return None;
    }
    let field = interval_unit(unit)?;
    Some((number.to_string(), field))
}

fn interval_unit(unit: &str) -> Option<DateTimeField> {
    let folded = unit.to_lowercase();
    let singular = folded.strip_suffix('s').unwrap_or(&folded);
    match singular {
        "day" => Some(DateTimeField::Day),
        "month" => Some(DateTimeField::Month),
        "year" => Some(DateTimeField::Year),
        "hour" => Some(DateTimeField::Hour),
        "minute" => Some(DateTimeField::Minute),
        "second" => Some(DateTimeField::Second),
        _ => None,
    }
}

/// Unnamed expression arguments of a function call, or `None` when the call
/// uses named/wildcard/subquery arguments.
pub fn unnamed_args(func: &Function) -> Option<Vec<&Expr>> {
    let FunctionArguments::List(list) = &func.args else {
        return None;
    };
    list.args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Some(expr),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    /// Parse the comparison expression out of `SELECT <expr> FROM t`.
    fn parse_expr(fragment: &str) -> Expr {
        let sql = format!("SELECT {} FROM t", fragment);
        let statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql).expect("parse");
        let sqlparser::ast::Statement::Query(query) = &statements[0] else {
            panic!("expected query");
        };
        let sqlparser::ast::SetExpr::Select(select) = query.body.as_ref() else {
            panic!("expected select");
        };
        let sqlparser::ast::SelectItem::UnnamedExpr(expr) = &select.projection[0] else {
            panic!("expected expr projection");
        };
        expr.clone()
    }

    #[test]
    fn test_date_sub_simple() {
        let expr = parse_expr("a.end_date - b.start_date");
        let (left, right) = date_sub_operands(&expr).expect("match");
        assert_eq!(left.to_string(), "a.end_date");
        assert_eq!(right.to_string(), "b.start_date");
    }

    #[test]
    fn test_date_sub_unwraps_casts_and_parens() {
        let expr = parse_expr("(CAST(a.end_date AS TIMESTAMP) - CAST(b.start_date AS TIMESTAMP))");
        let (left, right) = date_sub_operands(&expr).expect("match");
        assert_eq!(left.to_string(), "a.end_date");
        assert_eq!(right.to_string(), "b.start_date");
    }

    #[test]
    fn test_year_extract_guard() {
        let expr = parse_expr("EXTRACT(YEAR FROM visit_start_date) - year_of_birth");
        assert!(date_sub_operands(&expr).is_none());
    }

    #[test]
    fn test_plain_column_is_not_a_subtraction() {
        let expr = parse_expr("person_id");
        assert!(date_sub_operands(&expr).is_none());
    }

    #[test]
    fn test_epoch_day_pattern() {
        let expr =
            parse_expr("CAST(EXTRACT(EPOCH FROM (end_ts - start_ts)) / 86400 AS BIGINT)");
        let (left, right) = epoch_day_operands(&expr).expect("match");
        assert_eq!(left.to_string(), "end_ts");
        assert_eq!(right.to_string(), "start_ts");
    }

    #[test]
    fn test_epoch_pattern_requires_day_divisor() {
        let expr = parse_expr("CAST(EXTRACT(EPOCH FROM (end_ts - start_ts)) / 3600 AS BIGINT)");
        assert!(epoch_day_operands(&expr).is_none());
    }

    #[test]
    fn test_abs_with_subtraction() {
        let expr = parse_expr("ABS((end_date - start_date))");
        let (left, right) = abs_sub_operands(&expr).expect("match");
        assert_eq!(left.to_string(), "end_date");
        assert_eq!(right.to_string(), "start_date");
    }

    #[test]
    fn test_abs_without_subtraction() {
        let expr = parse_expr("ABS(balance)");
        assert!(abs_sub_operands(&expr).is_none());
    }

    #[test]
    fn test_daterange_call() {
        let expr = parse_expr("DATERANGE(start_date, end_date, '[]')");
        let (start, end, bounds) = daterange_args(&expr).expect("match");
        assert_eq!(start.to_string(), "start_date");
        assert_eq!(end.to_string(), "end_date");
        assert!(bounds.is_some());
    }

    #[test]
    fn test_intersection_heuristic_accepts_ranges() {
        let expr = parse_expr("r1 * r2");
        assert!(range_intersection_operands(&expr).is_some());
    }

    #[test]
    fn test_intersection_heuristic_rejects_bound_fields() {
        let expr = parse_expr("d2.dr.start * 3");
        assert!(range_intersection_operands(&expr).is_none());
        let expr = parse_expr("quantity * 3");
        // Numeric literal on the right disqualifies the pair.
        assert!(range_intersection_operands(&expr).is_none());
    }

    #[test]
    fn test_numeric_value_shapes() {
        assert!(is_numeric_value(&parse_expr("30")));
        assert!(is_numeric_value(&parse_expr("30::int")));
        assert!(is_numeric_value(&parse_expr("$1")));
        assert!(!is_numeric_value(&parse_expr("threshold")));
        assert!(!is_numeric_value(&parse_expr("'30'")));
    }

    #[test]
    fn test_interval_cast_parts() {
        let expr = parse_expr("'30 days'::interval");
        let (number, field) = interval_cast_parts(&expr).expect("match");
        assert_eq!(number, "30");
        assert_eq!(field, DateTimeField::Day);
    }

    #[test]
    fn test_interval_cast_rejects_malformed() {
        assert!(interval_cast_parts(&parse_expr("'a while'::interval")).is_none());
        assert!(interval_cast_parts(&parse_expr("'30'::interval")).is_none());
    }
}
