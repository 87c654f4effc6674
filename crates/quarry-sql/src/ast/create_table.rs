use quarry_core::{schema::db::Table, stmt::Type};

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    /// Name of the table
    pub name: String,

    /// Column definitions
    pub columns: Vec<ColumnDef>,

    /// Primary key columns
    pub primary_key: Vec<String>,

    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: Type,
    pub not_null: bool,
    pub auto_increment: bool,
}

impl CreateTable {
    pub fn from_table(table: &Table) -> CreateTable {
        CreateTable {
            name: table.name.clone(),
            columns: table
                .columns
                .iter()
                .map(|column| ColumnDef {
                    name: column.name.clone(),
                    ty: column.ty.clone(),
                    not_null: !column.nullable || column.primary_key,
                    auto_increment: column.auto_increment,
                })
                .collect(),
            primary_key: table
                .primary_key_columns()
                .map(|column| column.name.clone())
                .collect(),
            if_not_exists: false,
        }
    }
}
