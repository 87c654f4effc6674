use super::{Ident, Params, ToSql};

use crate::ast::{JoinKind, LockMode, TableGroup, TableGroupJoin, TableJoin, TableReference};

impl ToSql for &TableGroup {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(f, self.primary);
        joins(self, f);
    }
}

fn joins<P: Params>(group: &TableGroup, f: &mut super::Formatter<'_, P>) {
    for join in &group.table_joins {
        join.to_sql(f);
    }
    for join in &group.group_joins {
        join.to_sql(f);
    }
}

impl ToSql for &TableReference {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        match self {
            TableReference::Table { name, alias } => {
                fmt!(f, Ident(name) " " Ident(alias));
                match f.table_hint {
                    Some(LockMode::Update) => fmt!(f, " WITH (UPDLOCK, ROWLOCK)"),
                    Some(LockMode::Share) => fmt!(f, " WITH (HOLDLOCK, ROWLOCK)"),
                    None => {}
                }
            }
            TableReference::Derived { query, alias } => {
                fmt!(f, "(" query ") " Ident(alias));
            }
        }
    }
}

impl ToSql for &JoinKind {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(
            f,
            match self {
                JoinKind::Inner => " INNER JOIN ",
                JoinKind::Left => " LEFT JOIN ",
                JoinKind::Right => " RIGHT JOIN ",
                JoinKind::Cross => " CROSS JOIN ",
            }
        );
    }
}

impl ToSql for &TableJoin {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(f, self.kind self.table " ON " self.on);
    }
}

impl ToSql for &TableGroupJoin {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        let group = &self.group;

        // An outer join onto a group whose tables are inner joined must keep
        // those inner joins from filtering the outer side.
        let nest = self.kind != JoinKind::Inner
            && group
                .table_joins
                .iter()
                .any(|join| join.kind == JoinKind::Inner);

        fmt!(f, self.kind);

        if nest {
            fmt!(f, "(" group.primary);
            for join in &group.table_joins {
                join.to_sql(f);
            }
            fmt!(f, ")");
        } else {
            fmt!(f, group.primary);
        }

        if let Some(on) = &self.on {
            fmt!(f, " ON " on);
        }

        if !nest {
            for join in &group.table_joins {
                join.to_sql(f);
            }
        }
        for join in &group.group_joins {
            join.to_sql(f);
        }
    }
}
