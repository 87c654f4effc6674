use super::{Comma, Delimited, Params, ToSql};

use crate::ast::{ComparisonOp, Expr, JunctionKind, Predicate};
use quarry_core::Error;

impl ToSql for &Predicate {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        match self {
            Predicate::Comparison { lhs, op, rhs } => {
                if f.serializer.is_sqlserver() && matches!(lhs, Expr::Tuple(_)) {
                    f.fail(Error::not_yet_implemented(
                        "tuple comparison on SQL Server",
                    ));
                }
                fmt!(f, lhs " " op " " rhs);
            }
            Predicate::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                fmt!(f, expr not " BETWEEN " low " AND " high);
            }
            Predicate::InList { list, negated, .. } if list.is_empty() => {
                fmt!(f, if *negated { "1=1" } else { "1=0" });
            }
            Predicate::InList {
                expr,
                list,
                negated,
            } => {
                if f.serializer.is_sqlserver() && matches!(expr, Expr::Tuple(_)) {
                    f.fail(Error::not_yet_implemented("tuple in-list on SQL Server"));
                }
                let not = if *negated { " NOT" } else { "" };
                fmt!(f, expr not " IN (" Comma(list) ")");
            }
            Predicate::InSubquery {
                expr,
                query,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                fmt!(f, expr not " IN (" query ")");
            }
            Predicate::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                let not = if *negated { " NOT" } else { "" };
                fmt!(f, expr not " LIKE " pattern);
                if let Some(escape) = escape {
                    let escape = Expr::literal(escape.to_string());
                    fmt!(f, " ESCAPE ");
                    (&escape).to_sql(f);
                }
            }
            Predicate::IsNull { expr, negated } => {
                let not = if *negated { " NOT" } else { "" };
                fmt!(f, expr " IS" not " NULL");
            }
            Predicate::Junction { predicates, .. } if predicates.is_empty() => {
                f.fail(Error::sql_ast_syntax("empty junction"));
            }
            Predicate::Junction { kind, predicates } => {
                let delim = match kind {
                    JunctionKind::And => " AND ",
                    JunctionKind::Or => " OR ",
                };
                fmt!(f, Delimited(predicates.iter().map(Nested), delim));
            }
            Predicate::Not(predicate) => fmt!(f, "NOT (" predicate ")"),
            Predicate::Exists { query, negated } => {
                let not = if *negated { "NOT " } else { "" };
                fmt!(f, not "EXISTS (" query ")");
            }
            Predicate::Boolean(expr) => {
                if f.serializer.is_sqlserver() {
                    fmt!(f, expr " = 1");
                } else {
                    fmt!(f, expr);
                }
            }
        }
    }
}

impl ToSql for &ComparisonOp {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(
            f,
            match self {
                ComparisonOp::Eq => "=",
                ComparisonOp::Ne => "<>",
                ComparisonOp::Lt => "<",
                ComparisonOp::Le => "<=",
                ComparisonOp::Gt => ">",
                ComparisonOp::Ge => ">=",
            }
        );
    }
}

/// A junction member; nested junctions are parenthesized.
struct Nested<'a>(&'a Predicate);

impl ToSql for Nested<'_> {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        match self.0 {
            Predicate::Junction { predicates, .. } if predicates.len() > 1 => {
                fmt!(f, "(" self.0 ")")
            }
            predicate => predicate.to_sql(f),
        }
    }
}
