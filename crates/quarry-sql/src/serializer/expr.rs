use super::{Comma, Flavor, Ident, Params, ToSql};

use crate::ast::{ArithmeticOp, ColumnRef, Expr, FunctionCall, JdbcParameter};
use quarry_core::{sqm::function::FunctionRender, Error};

impl ToSql for &Expr {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        match self {
            Expr::Column(column) => column.to_sql(f),
            Expr::Literal(value) => value.to_sql(f),
            Expr::Param(param) => param.to_sql(f),
            Expr::Function(function) => function.to_sql(f),
            Expr::CountStar => fmt!(f, "COUNT(*)"),
            Expr::Arithmetic { lhs, op, rhs } => {
                fmt!(f, Operand(lhs) " " op " " Operand(rhs));
            }
            Expr::Negate(expr) => fmt!(f, "-" Operand(expr)),
            Expr::Case { whens, otherwise } => {
                fmt!(f, "CASE");
                for (when, then) in whens {
                    fmt!(f, " WHEN " when " THEN " then);
                }
                if let Some(otherwise) = otherwise {
                    fmt!(f, " ELSE " otherwise);
                }
                fmt!(f, " END");
            }
            Expr::Tuple(items) => fmt!(f, "(" Comma(items) ")"),
            Expr::Subquery(query) => fmt!(f, "(" query ")"),
            Expr::Fragment(sql) => fmt!(f, sql),
        }
    }
}

impl ToSql for &ColumnRef {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        if let Some(qualifier) = &self.qualifier {
            fmt!(f, Ident(qualifier) ".");
        }
        fmt!(f, Ident(&self.column));
    }
}

impl ToSql for &JdbcParameter {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        let placeholder = f.params.push(self);
        fmt!(f, placeholder);
    }
}

impl ToSql for &ArithmeticOp {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(
            f,
            match self {
                ArithmeticOp::Add => "+",
                ArithmeticOp::Sub => "-",
                ArithmeticOp::Mul => "*",
                ArithmeticOp::Div => "/",
                ArithmeticOp::Mod => "%",
            }
        );
    }
}

/// An operand of an arithmetic expression, parenthesized when it is itself
/// arithmetic.
struct Operand<'a>(&'a Expr);

impl ToSql for Operand<'_> {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        if self.0.is_arithmetic() {
            fmt!(f, "(" self.0 ")");
        } else {
            self.0.to_sql(f);
        }
    }
}

impl ToSql for &FunctionCall {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        match &self.render {
            FunctionRender::Call(name) => {
                let distinct = if self.distinct { "DISTINCT " } else { "" };
                fmt!(f, name "(" distinct Comma(&self.args) ")");
            }
            FunctionRender::Pattern(pattern) => render_pattern(pattern, &self.args, f),
            FunctionRender::Keyword(keyword) => {
                f.dst.push_str(&keyword.to_ascii_uppercase());
            }
            FunctionRender::Concat => match f.flavor() {
                Flavor::Mysql => fmt!(f, "concat(" Comma(&self.args) ")"),
                Flavor::SqlServer => {
                    fmt!(f, "(" super::Delimited(&self.args, " + ") ")")
                }
                Flavor::Sqlite | Flavor::Postgresql => {
                    fmt!(f, "(" super::Delimited(&self.args, " || ") ")")
                }
            },
        }
    }
}

/// Substitutes `?1`, `?2`, … with the rendered arguments in text order. An
/// argument referenced twice is rendered (and its parameters pushed) twice.
fn render_pattern<P: Params>(pattern: &str, args: &[Expr], f: &mut super::Formatter<'_, P>) {
    let mut rest = pattern;

    while let Some(pos) = rest.find('?') {
        f.dst.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            f.dst.push('?');
            continue;
        }

        let index: usize = rest[..digits].parse().unwrap_or(0);
        rest = &rest[digits..];

        match index.checked_sub(1).and_then(|i| args.get(i)) {
            Some(arg) => arg.to_sql(f),
            None => f.fail(Error::sql_ast_syntax(format!(
                "function pattern `{pattern}` references argument {index} of {}",
                args.len()
            ))),
        }
    }

    f.dst.push_str(rest);
}
