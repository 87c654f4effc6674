use super::{Comma, Flavor, Ident, Params, ToSql};

use crate::ast::{ColumnDef, CreateTable};
use quarry_core::{stmt::Type, Error};

impl ToSql for &CreateTable {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(f, "CREATE TABLE ");

        if self.if_not_exists && !f.serializer.is_sqlserver() {
            fmt!(f, "IF NOT EXISTS ");
        }

        fmt!(f, Ident(&self.name) " (");

        // SQLite only auto-increments a sole `INTEGER PRIMARY KEY` column,
        // which must be declared inline.
        let inline_pk = f.serializer.is_sqlite()
            && self.primary_key.len() == 1
            && self
                .columns
                .iter()
                .any(|column| column.auto_increment && column.name == self.primary_key[0]);

        for (index, column) in self.columns.iter().enumerate() {
            fmt!(f, "\n    " column);
            if inline_pk && column.auto_increment {
                fmt!(f, " PRIMARY KEY AUTOINCREMENT");
            }
            if index < self.columns.len() - 1 {
                fmt!(f, ",");
            }
        }

        if !self.primary_key.is_empty() && !inline_pk {
            let pk = Comma(self.primary_key.iter().map(Ident));
            fmt!(f, ",\n    PRIMARY KEY (" pk ")");
        }

        fmt!(f, "\n)");
    }
}

impl ToSql for &ColumnDef {
    fn to_sql<P: Params>(self, f: &mut super::Formatter<'_, P>) {
        fmt!(f, Ident(&self.name) " ");

        let Some(ty) = column_type(&self.ty, f.flavor()) else {
            f.fail(Error::sql_ast_syntax(format!(
                "column `{}` has no SQL type for {:?}",
                self.name, self.ty
            )));
            return;
        };
        fmt!(f, ty);

        if !self.auto_increment {
            if self.not_null {
                fmt!(f, " NOT NULL");
            }
            return;
        }

        match f.flavor() {
            // Declared inline with the primary key
            Flavor::Sqlite => {}
            Flavor::Postgresql => fmt!(f, " GENERATED BY DEFAULT AS IDENTITY"),
            Flavor::Mysql => fmt!(f, " NOT NULL AUTO_INCREMENT"),
            Flavor::SqlServer => fmt!(f, " IDENTITY(1,1)"),
        }
    }
}

fn column_type(ty: &Type, flavor: Flavor) -> Option<&'static str> {
    use Flavor::*;

    Some(match (ty, flavor) {
        (Type::Bool, SqlServer) => "BIT",
        (Type::Bool, _) => "BOOLEAN",
        (Type::I32 | Type::I64, Sqlite) => "INTEGER",
        (Type::I32, Postgresql) => "INTEGER",
        (Type::I32, Mysql | SqlServer) => "INT",
        (Type::I64, _) => "BIGINT",
        (Type::F64, Sqlite) => "REAL",
        (Type::F64, Postgresql) => "DOUBLE PRECISION",
        (Type::F64, Mysql) => "DOUBLE",
        (Type::F64, SqlServer) => "FLOAT",
        (Type::String, Sqlite | Postgresql) => "TEXT",
        (Type::String, Mysql) => "VARCHAR(255)",
        (Type::String, SqlServer) => "NVARCHAR(255)",
        (Type::Uuid, Sqlite | Postgresql) => "TEXT",
        (Type::Uuid, Mysql | SqlServer) => "CHAR(36)",
        (Type::Bytes, Sqlite | Mysql) => "BLOB",
        (Type::Bytes, Postgresql) => "BYTEA",
        (Type::Bytes, SqlServer) => "VARBINARY(MAX)",
        _ => return None,
    })
}
