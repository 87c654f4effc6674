use super::{Flavor, Formatter, ToSql};

use crate::ast::JdbcParameter;

/// Receives the parameters of a statement in the order their placeholders
/// appear in the rendered SQL.
pub trait Params {
    fn push(&mut self, param: &JdbcParameter) -> Placeholder;
}

/// One-based position of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder(pub usize);

impl Params for Vec<JdbcParameter> {
    fn push(&mut self, param: &JdbcParameter) -> Placeholder {
        self.push(param.clone());
        Placeholder(self.len())
    }
}

impl ToSql for Placeholder {
    fn to_sql<P: super::Params>(self, f: &mut Formatter<'_, P>) {
        match f.flavor() {
            Flavor::Mysql => fmt!(f, "?"),
            Flavor::Postgresql => fmt!(f, "$" self.0),
            Flavor::Sqlite => fmt!(f, "?" self.0),
            Flavor::SqlServer => fmt!(f, "@p" self.0),
        }
    }
}
