use super::{Column, ColumnId};
use crate::stmt;

use std::fmt;

/// A database table
#[derive(Debug, Clone)]
pub struct Table {
    /// Uniquely identifies a table
    pub id: TableId,

    /// Name of the table
    pub name: String,

    /// The table's columns
    pub columns: Vec<Column>,

    pub primary_key: Vec<ColumnId>,
}

/// Uniquely identifies a table
#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct TableId(pub usize);

impl Table {
    pub(crate) fn new(id: TableId, name: String) -> Self {
        Self {
            id,
            name,
            columns: vec![],
            primary_key: vec![],
        }
    }

    pub fn column(&self, id: impl Into<ColumnId>) -> &Column {
        &self.columns[id.into().index]
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn primary_key_columns(&self) -> impl ExactSizeIterator<Item = &Column> + '_ {
        self.primary_key
            .iter()
            .map(|column_id| &self.columns[column_id.index])
    }

    /// Adds a column, or returns the existing one with the same name.
    ///
    /// Columns shared by several attributes (single-table subclasses mapping
    /// the same name) are created once.
    pub(crate) fn add_column(
        &mut self,
        name: &str,
        ty: stmt::Type,
        nullable: bool,
    ) -> ColumnId {
        if let Some(column) = self.column_by_name(name) {
            return column.id;
        }

        let id = ColumnId {
            table: self.id,
            index: self.columns.len(),
        };

        self.columns.push(Column {
            id,
            name: name.to_string(),
            ty,
            nullable,
            primary_key: false,
            auto_increment: false,
        });

        id
    }

    pub(crate) fn column_mut(&mut self, id: ColumnId) -> &mut Column {
        &mut self.columns[id.index]
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "TableId({})", self.0)
    }
}
