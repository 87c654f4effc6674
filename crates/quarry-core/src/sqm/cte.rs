use super::{NullPrecedence, SqmQuery};
use crate::{
    stmt::{Type, Value},
    Error, Result,
};

use std::fmt;

/// Identifies a CTE within a statement. A recursive CTE's body refers to
/// its own definition through this id.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CteId(pub usize);

/// `name (columns) as [materialized] (definition) [search …] [cycle …]`
#[derive(Debug, Clone, PartialEq)]
pub struct SqmCteStatement {
    pub id: CteId,
    pub name: String,

    /// Declared columns, named after the definition's selection aliases
    pub columns: Vec<CteColumn>,

    /// For recursive CTEs, a `union all` group of the base and recursive
    /// arms
    pub definition: SqmQuery,

    pub recursive: bool,
    pub search: Option<CteSearch>,
    pub cycle: Option<CteCycle>,
    pub materialization: Materialization,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CteColumn {
    pub name: String,
    pub ty: Type,
}

/// A column of a specific CTE, as handed out by the criteria API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteAttribute {
    pub cte: CteId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CteSearch {
    pub kind: SearchKind,

    /// Ordered columns the traversal sorts by; indexes into `columns`
    pub items: Vec<CteSearchItem>,

    /// Name of the synthetic ordering column
    pub set_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    BreadthFirst,
    DepthFirst,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CteSearchItem {
    pub column: usize,
    pub desc: bool,
    pub nulls: Option<NullPrecedence>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CteCycle {
    /// Name of the synthetic column set to `cycle_value` on the row that
    /// closes a cycle
    pub mark_column: String,

    /// Name of the synthetic column tracking visited rows
    pub path_column: Option<String>,

    pub cycle_value: Value,
    pub no_cycle_value: Value,

    /// Columns identifying a row for cycle detection; indexes into `columns`
    pub columns: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Materialization {
    #[default]
    Undefined,
    Materialized,
    NotMaterialized,
}

impl SqmCteStatement {
    /// Creates a CTE whose columns are named by the aliases of the
    /// definition's selections.
    pub fn new(id: CteId, name: impl Into<String>, definition: SqmQuery) -> Result<Self> {
        let name = name.into();
        let columns = Self::derive_columns(&name, &definition)?;
        Ok(SqmCteStatement {
            id,
            name,
            columns,
            definition,
            recursive: false,
            search: None,
            cycle: None,
            materialization: Materialization::Undefined,
        })
    }

    /// Column names and types produced by `query` when used as the body of
    /// CTE `name`.
    pub fn derive_columns(name: &str, query: &SqmQuery) -> Result<Vec<CteColumn>> {
        query
            .first_spec()
            .select
            .iter()
            .enumerate()
            .map(|(i, selection)| {
                let Some(alias) = &selection.alias else {
                    return Err(Error::semantic(format!(
                        "selection {} of CTE `{name}` requires an alias",
                        i + 1
                    )));
                };
                Ok(CteColumn {
                    name: alias.clone(),
                    ty: selection.expr.ty(),
                })
            })
            .collect()
    }

    /// Creates a CTE with an explicit column list, as in
    /// `with t(a, b) as (…)`. Selection aliases are not required.
    pub fn with_column_names(
        id: CteId,
        name: impl Into<String>,
        definition: SqmQuery,
        names: &[String],
    ) -> Result<Self> {
        let name = name.into();
        let tys = definition.selection_tys();
        if names.len() != tys.len() {
            return Err(Error::semantic(format!(
                "CTE `{name}` declares {} columns but its query selects {}",
                names.len(),
                tys.len()
            )));
        }
        let columns = names
            .iter()
            .zip(tys)
            .map(|(name, ty)| CteColumn {
                name: name.clone(),
                ty,
            })
            .collect();

        Ok(SqmCteStatement {
            id,
            name,
            columns,
            definition,
            recursive: false,
            search: None,
            cycle: None,
            materialization: Materialization::Undefined,
        })
    }

    /// A handle to the named column, failing when it is not part of the
    /// CTE.
    pub fn attribute(&self, name: &str) -> Result<CteAttribute> {
        if self.column_index(name).is_none() {
            return Err(Error::illegal_argument(format!(
                "`{name}` is not an attribute of CTE `{}`",
                self.name
            )));
        }
        Ok(CteAttribute {
            cte: self.id,
            name: name.to_string(),
        })
    }

    /// Attaches a search clause.
    pub fn search(
        &mut self,
        kind: SearchKind,
        set_column: impl Into<String>,
        items: Vec<(CteAttribute, bool, Option<NullPrecedence>)>,
    ) -> Result<()> {
        let set_column = set_column.into();
        self.check_synthetic_name(&set_column)?;

        let items = items
            .into_iter()
            .map(|(attribute, desc, nulls)| {
                Ok(CteSearchItem {
                    column: self.own_column(&attribute, "search")?,
                    desc,
                    nulls,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if items.is_empty() {
            return Err(Error::illegal_argument(format!(
                "search clause of CTE `{}` names no attributes",
                self.name
            )));
        }

        self.search = Some(CteSearch {
            kind,
            items,
            set_column,
        });
        Ok(())
    }

    /// Attaches a cycle clause. The two sentinel values must have the same
    /// type.
    pub fn cycle(
        &mut self,
        mark_column: impl Into<String>,
        path_column: Option<String>,
        cycle_value: Value,
        no_cycle_value: Value,
        attributes: Vec<CteAttribute>,
    ) -> Result<()> {
        let mark_column = mark_column.into();

        let cycle_ty = cycle_value.ty();
        let no_cycle_ty = no_cycle_value.ty();
        if cycle_ty != no_cycle_ty {
            return Err(Error::illegal_argument(format!(
                "cycle value type {cycle_ty:?} of CTE `{}` differs from no-cycle value type {no_cycle_ty:?}",
                self.name
            )));
        }

        self.check_synthetic_name(&mark_column)?;
        if let Some(path_column) = &path_column {
            self.check_synthetic_name(path_column)?;
            if *path_column == mark_column {
                return Err(Error::illegal_argument(format!(
                    "cycle mark and path columns of CTE `{}` are both named `{mark_column}`",
                    self.name
                )));
            }
        }

        let columns = attributes
            .iter()
            .map(|attribute| self.own_column(attribute, "cycle"))
            .collect::<Result<Vec<_>>>()?;

        if columns.is_empty() {
            return Err(Error::illegal_argument(format!(
                "cycle clause of CTE `{}` names no attributes",
                self.name
            )));
        }

        self.cycle = Some(CteCycle {
            mark_column,
            path_column,
            cycle_value,
            no_cycle_value,
            columns,
        });
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Declared columns followed by the synthetic search and cycle columns,
    /// in the order the CTE exposes them.
    pub fn all_columns(&self) -> Vec<CteColumn> {
        let mut columns = self.columns.clone();
        if let Some(search) = &self.search {
            columns.push(CteColumn {
                name: search.set_column.clone(),
                ty: Type::Unknown,
            });
        }
        if let Some(cycle) = &self.cycle {
            columns.push(CteColumn {
                name: cycle.mark_column.clone(),
                ty: cycle.cycle_value.ty(),
            });
            if let Some(path) = &cycle.path_column {
                columns.push(CteColumn {
                    name: path.clone(),
                    ty: Type::String,
                });
            }
        }
        columns
    }

    /// Index and type of a column, including synthetic ones.
    pub fn column(&self, name: &str) -> Option<(usize, Type)> {
        self.all_columns()
            .into_iter()
            .enumerate()
            .find(|(_, column)| column.name == name)
            .map(|(i, column)| (i, column.ty))
    }

    fn own_column(&self, attribute: &CteAttribute, clause: &str) -> Result<usize> {
        if attribute.cte != self.id {
            return Err(Error::illegal_argument(format!(
                "{clause} attribute `{}` does not belong to CTE `{}`",
                attribute.name, self.name
            )));
        }
        self.column_index(&attribute.name).ok_or_else(|| {
            Error::illegal_argument(format!(
                "{clause} attribute `{}` is not a column of CTE `{}`",
                attribute.name, self.name
            ))
        })
    }

    fn check_synthetic_name(&self, name: &str) -> Result<()> {
        if self.column(name).is_some() {
            return Err(Error::illegal_argument(format!(
                "synthetic column `{name}` collides with a column of CTE `{}`",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for CteId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "CteId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqm::{SqmExpr, SqmQuerySpec, SqmSelection};

    fn cte(id: usize) -> SqmCteStatement {
        let spec = SqmQuerySpec {
            select: vec![
                SqmSelection {
                    expr: SqmExpr::Literal(Value::I64(1)),
                    alias: Some("id".into()),
                },
                SqmSelection {
                    expr: SqmExpr::Literal(Value::I64(2)),
                    alias: Some("parent".into()),
                },
            ],
            ..Default::default()
        };
        SqmCteStatement::new(CteId(id), "tree", SqmQuery::spec(spec)).unwrap()
    }

    #[test]
    fn cycle_sentinel_types_must_match() {
        let mut cte = cte(0);
        let id = cte.attribute("id").unwrap();

        let err = cte
            .cycle("is_cycle", None, Value::Bool(true), Value::from("N"), vec![id])
            .unwrap_err();
        assert!(err.is_illegal_argument());
        assert!(cte.cycle.is_none());
    }

    #[test]
    fn search_attribute_from_another_cte_is_rejected() {
        let mut cte = cte(0);
        let foreign = CteAttribute {
            cte: CteId(1),
            name: "id".into(),
        };

        let err = cte
            .search(SearchKind::DepthFirst, "ord", vec![(foreign, false, None)])
            .unwrap_err();
        assert!(err.is_illegal_argument());
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        assert!(cte(0).attribute("depth").unwrap_err().is_illegal_argument());
    }

    #[test]
    fn synthetic_columns_follow_declared_ones() {
        let mut cte = cte(0);
        let id = cte.attribute("id").unwrap();
        cte.search(SearchKind::BreadthFirst, "ord", vec![(id.clone(), false, None)])
            .unwrap();
        cte.cycle(
            "is_cycle",
            Some("path".into()),
            Value::from("Y"),
            Value::from("N"),
            vec![id],
        )
        .unwrap();

        let names: Vec<_> = cte.all_columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["id", "parent", "ord", "is_cycle", "path"]);
        assert_eq!(cte.column("is_cycle"), Some((3, Type::String)));
    }

    #[test]
    fn synthetic_column_may_not_shadow_declared_column() {
        let mut cte = cte(0);
        let id = cte.attribute("id").unwrap();
        assert!(cte
            .search(SearchKind::DepthFirst, "parent", vec![(id, false, None)])
            .unwrap_err()
            .is_illegal_argument());
    }
}
