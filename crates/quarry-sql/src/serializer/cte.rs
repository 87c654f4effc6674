use super::{Comma, Flavor, Ident, Params, ToSql};

use crate::ast::{Cte, CycleClause, Materialization, SearchClause, SearchKind, With};
use quarry_core::Error;

impl ToSql for &With {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(f, "WITH ");

        // SQL Server infers recursion
        if self.recursive && !f.serializer.is_sqlserver() {
            fmt!(f, "RECURSIVE ");
        }

        fmt!(f, Comma(&self.ctes));
    }
}

impl ToSql for &Cte {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(f, Ident(&self.name));

        if !self.columns.is_empty() {
            fmt!(f, "(" Comma(self.columns.iter().map(Ident)) ")");
        }

        fmt!(f, " AS ");

        if f.flavor() == Flavor::Postgresql {
            match self.materialization {
                Materialization::Materialized => fmt!(f, "MATERIALIZED "),
                Materialization::NotMaterialized => fmt!(f, "NOT MATERIALIZED "),
                Materialization::Undefined => {}
            }
        }

        fmt!(f, "(" self.query ")");

        if self.search.is_some() || self.cycle.is_some() {
            if !f.serializer.capability.cte_search_cycle {
                f.fail(Error::not_yet_implemented(format!(
                    "search or cycle clause of CTE `{}` on {:?}",
                    self.name,
                    f.serializer.dialect()
                )));
                return;
            }

            if let Some(search) = &self.search {
                fmt!(f, search);
            }

            if let Some(cycle) = &self.cycle {
                fmt!(f, cycle);
            }
        }
    }
}

impl ToSql for &SearchClause {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        if self
            .columns
            .iter()
            .any(|(_, desc, nulls)| *desc || nulls.is_some())
        {
            f.fail(Error::not_yet_implemented(
                "descending or null-ordered search item in a native search clause",
            ));
            return;
        }

        let kind = match self.kind {
            SearchKind::BreadthFirst => " SEARCH BREADTH FIRST BY ",
            SearchKind::DepthFirst => " SEARCH DEPTH FIRST BY ",
        };
        let columns = Comma(self.columns.iter().map(|(column, ..)| Ident(column)));

        fmt!(f, kind columns " SET " Ident(&self.set_column));
    }
}

impl ToSql for &CycleClause {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(
            f,
            " CYCLE " Comma(self.columns.iter().map(Ident))
            " SET " Ident(&self.mark_column)
            " TO " self.cycle_value
            " DEFAULT " self.no_cycle_value
            " USING " Ident(&self.path_column)
        );
    }
}
