use super::{Comma, Flavor, Ident, Params, ToSql};

use crate::ast::{Assignment, DeleteStatement, InsertSource, InsertStatement, UpdateStatement};
use quarry_core::Error;

impl ToSql for &InsertStatement {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        let returning = !self.returning.is_empty();

        if returning && f.flavor() == Flavor::Mysql {
            f.fail(Error::not_yet_implemented(
                "reading generated values back from an insert on MySQL",
            ));
            return;
        }

        fmt!(f, "INSERT INTO " Ident(&self.table));

        let default_row = self.columns.is_empty()
            && matches!(&self.source, InsertSource::Values(rows) if rows.len() == 1);

        if default_row {
            if f.flavor() == Flavor::Mysql {
                fmt!(f, " () VALUES ()");
                return;
            }
            output_inserted(self, f);
            fmt!(f, " DEFAULT VALUES");
            returning_clause(self, f);
            return;
        }

        fmt!(f, " (" Comma(self.columns.iter().map(Ident)) ")");
        output_inserted(self, f);

        match &self.source {
            InsertSource::Values(rows) => {
                if rows.is_empty() {
                    f.fail(Error::sql_ast_syntax("insert without rows"));
                    return;
                }
                fmt!(f, " VALUES ");
                let mut s = "";
                for row in rows {
                    fmt!(f, s "(" Comma(row) ")");
                    s = ", ";
                }
            }
            InsertSource::Select(query) => fmt!(f, " " query),
        }

        returning_clause(self, f);
    }
}

/// SQL Server returns generated values from an `OUTPUT` clause placed before
/// the row source.
fn output_inserted<P: Params>(insert: &InsertStatement, f: &mut super::Formatter<'_, P>) {
    if insert.returning.is_empty() || !f.serializer.is_sqlserver() {
        return;
    }

    fmt!(f, " OUTPUT ");
    let mut s = "";
    for column in &insert.returning {
        fmt!(f, s "INSERTED." Ident(column));
        s = ", ";
    }
}

fn returning_clause<P: Params>(insert: &InsertStatement, f: &mut super::Formatter<'_, P>) {
    if insert.returning.is_empty() || f.serializer.is_sqlserver() {
        return;
    }

    fmt!(f, " RETURNING " Comma(insert.returning.iter().map(Ident)));
}

impl ToSql for &UpdateStatement {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        if self.assignments.is_empty() {
            f.fail(Error::sql_ast_syntax("update without assignments"));
            return;
        }

        fmt!(f, "UPDATE " Ident(&self.table) " SET " Comma(&self.assignments));

        if let Some(where_) = &self.where_ {
            fmt!(f, " WHERE " where_);
        }
    }
}

impl ToSql for &Assignment {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(f, Ident(&self.column) " = " self.value);
    }
}

impl ToSql for &DeleteStatement {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(f, "DELETE FROM " Ident(&self.table));

        if let Some(where_) = &self.where_ {
            fmt!(f, " WHERE " where_);
        }
    }
}
