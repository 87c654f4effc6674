use super::{qualify, CteInfo, Group, Lower};

use quarry_core::{
    sqm::{
        function::FunctionRender, ArithmeticOp, FromSource, SearchKind, SqmCteStatement,
        SqmQueryPart,
    },
    stmt::{Type, Value},
    Error, Result,
};
use quarry_sql::ast::{
    Cte, CycleClause, Expr, FunctionCall, Predicate, QueryGroup, QueryPart, QuerySpec,
    SearchClause, SelectItem, SelectStatement, With,
};

impl Lower<'_> {
    /// Lowers the CTEs of one query level. Each CTE is registered before
    /// its definition is lowered so a recursive arm can read it.
    pub(super) fn lower_ctes(&mut self, ctes: &[SqmCteStatement]) -> Result<Option<With>> {
        if ctes.is_empty() {
            return Ok(None);
        }

        let mut recursive = false;
        let mut lowered = vec![];
        for cte in ctes {
            if cte.recursive && !self.capability.recursive_cte {
                return Err(Error::not_yet_implemented(format!(
                    "recursive CTE `{}` on {:?}",
                    cte.name, self.capability.dialect
                )));
            }
            recursive |= cte.recursive;

            self.ctes.insert(
                cte.id,
                CteInfo {
                    name: cte.name.clone(),
                    columns: cte
                        .all_columns()
                        .into_iter()
                        .map(|column| (column.name, column.ty))
                        .collect(),
                },
            );
            lowered.push(self.lower_cte(cte)?);
        }

        Ok(Some(With {
            recursive,
            ctes: lowered,
        }))
    }

    fn lower_cte(&mut self, cte: &SqmCteStatement) -> Result<Cte> {
        let clauses = cte.search.is_some() || cte.cycle.is_some();
        if clauses && !self.capability.cte_search_cycle && self.capability.cte_search_cycle_emulation {
            return self.emulate_search_cycle(cte);
        }

        // Without native support the clauses stay on the tree and the
        // serializer rejects them.
        let query = self.lower_subquery(&cte.definition)?;

        let search = cte.search.as_ref().map(|search| SearchClause {
            kind: search.kind,
            columns: search
                .items
                .iter()
                .map(|item| (cte.columns[item.column].name.clone(), item.desc, item.nulls))
                .collect(),
            set_column: search.set_column.clone(),
        });

        let cycle = cte.cycle.as_ref().map(|cycle| CycleClause {
            columns: cycle
                .columns
                .iter()
                .map(|column| cte.columns[*column].name.clone())
                .collect(),
            mark_column: cycle.mark_column.clone(),
            cycle_value: cycle.cycle_value.clone(),
            no_cycle_value: cycle.no_cycle_value.clone(),
            path_column: path_column(cte),
        });

        Ok(Cte {
            name: cte.name.clone(),
            columns: cte.columns.iter().map(|column| column.name.clone()).collect(),
            query: Box::new(query),
            materialization: cte.materialization,
            search,
            cycle,
        })
    }

    /// Computes `search` and `cycle` columns in the recursion itself:
    /// a depth counter or padded key path for ordering, and a visited path
    /// with a mark that stops recursion at the row closing a cycle.
    fn emulate_search_cycle(&mut self, cte: &SqmCteStatement) -> Result<Cte> {
        let unsupported = || {
            Error::not_yet_implemented(format!(
                "search or cycle clause of CTE `{}` without an anchor and a recursive arm",
                cte.name
            ))
        };

        let SqmQueryPart::Group(group) = &cte.definition.body else {
            return Err(unsupported());
        };
        let [SqmQueryPart::Spec(anchor), SqmQueryPart::Spec(step)] = &group.parts[..] else {
            return Err(unsupported());
        };
        let Some(this) = step
            .from
            .froms()
            .find(|from| matches!(from.source, FromSource::Cte(id) if id == cte.id))
        else {
            return Err(unsupported());
        };

        let with = self.lower_ctes(&cte.definition.ctes)?;
        let mut anchor = self.lower_spec(anchor, None)?;
        let mut step_spec = self.lower_spec(step, None)?;
        let Group::Cte { alias, .. } = self.group(this.id)?.clone() else {
            return Err(Error::sql_ast_syntax("recursive arm does not read the CTE"));
        };

        if anchor.select.len() != cte.columns.len() || step_spec.select.len() != cte.columns.len() {
            return Err(Error::not_yet_implemented(format!(
                "multi-column selection in CTE `{}` with search or cycle clause",
                cte.name
            )));
        }

        let mut columns: Vec<String> = cte.columns.iter().map(|column| column.name.clone()).collect();
        let item = |spec: &QuerySpec, column: usize| spec.select[column].expr.clone();

        if let Some(search) = &cte.search {
            let (base, next) = match search.kind {
                SearchKind::BreadthFirst => (
                    Expr::literal(Value::I64(0)),
                    Expr::arithmetic(
                        qualify(&alias, &search.set_column),
                        ArithmeticOp::Add,
                        Expr::literal(Value::I64(1)),
                    ),
                ),
                SearchKind::DepthFirst => {
                    if search.items.iter().any(|item| item.desc) {
                        return Err(Error::not_yet_implemented(format!(
                            "descending depth-first search item in CTE `{}`",
                            cte.name
                        )));
                    }
                    let key = |spec: &QuerySpec| {
                        let mut parts = vec![];
                        for (i, search_item) in search.items.iter().enumerate() {
                            if i > 0 {
                                parts.push(Expr::literal(Value::from(",")));
                            }
                            let ty = &cte.columns[search_item.column].ty;
                            parts.push(padded(item(spec, search_item.column), ty));
                        }
                        Expr::concat(parts)
                    };
                    let base = key(&anchor);
                    let next = Expr::concat(vec![
                        qualify(&alias, &search.set_column),
                        Expr::literal(Value::from(".")),
                        key(&step_spec),
                    ]);
                    (base, next)
                }
            };
            anchor.select.push(SelectItem::new(base));
            step_spec.select.push(SelectItem::new(next));
            columns.push(search.set_column.clone());
        }

        if let Some(cycle) = &cte.cycle {
            let path = path_column(cte);
            let key = |spec: &QuerySpec| {
                let mut parts = vec![];
                for (i, column) in cycle.columns.iter().enumerate() {
                    if i > 0 {
                        parts.push(Expr::literal(Value::from(",")));
                    }
                    parts.push(text(item(spec, *column)));
                }
                parts
            };

            let mut anchor_path = vec![Expr::literal(Value::from("/"))];
            anchor_path.extend(key(&anchor));
            anchor_path.push(Expr::literal(Value::from("/")));

            let step_key = key(&step_spec);
            let mut step_path = vec![qualify(&alias, &path)];
            step_path.extend(step_key.iter().cloned());
            step_path.push(Expr::literal(Value::from("/")));

            let mut seen = vec![Expr::literal(Value::from("%/"))];
            seen.extend(step_key);
            seen.push(Expr::literal(Value::from("/%")));
            let mark = Expr::Case {
                whens: vec![(
                    Predicate::Like {
                        expr: qualify(&alias, &path),
                        pattern: Expr::concat(seen),
                        escape: None,
                        negated: false,
                    },
                    Expr::literal(cycle.cycle_value.clone()),
                )],
                otherwise: Some(Box::new(Expr::literal(cycle.no_cycle_value.clone()))),
            };

            anchor.select.push(SelectItem::new(Expr::literal(cycle.no_cycle_value.clone())));
            anchor.select.push(SelectItem::new(Expr::concat(anchor_path)));
            step_spec.select.push(SelectItem::new(mark));
            step_spec.select.push(SelectItem::new(Expr::concat(step_path)));

            let continues = Predicate::eq(
                qualify(&alias, &cycle.mark_column),
                Expr::literal(cycle.no_cycle_value.clone()),
            );
            step_spec.where_ = Some(Predicate::conjoin(step_spec.where_.take(), continues));

            columns.push(cycle.mark_column.clone());
            columns.push(path);
        }

        let body = QueryPart::Group(Box::new(QueryGroup {
            op: group.op,
            parts: vec![
                QueryPart::Spec(Box::new(anchor)),
                QueryPart::Spec(Box::new(step_spec)),
            ],
            order_by: vec![],
            offset: None,
            fetch: None,
        }));

        Ok(Cte {
            name: cte.name.clone(),
            columns,
            query: Box::new(SelectStatement {
                with,
                body,
                lock: None,
            }),
            materialization: cte.materialization,
            search: None,
            cycle: None,
        })
    }
}

fn path_column(cte: &SqmCteStatement) -> String {
    match &cte.cycle {
        Some(cycle) => cycle
            .path_column
            .clone()
            .unwrap_or_else(|| format!("{}_path", cycle.mark_column)),
        None => String::new(),
    }
}

fn pattern(pattern: &str, arg: Expr) -> Expr {
    Expr::Function(FunctionCall {
        render: FunctionRender::Pattern(pattern.to_string()),
        args: vec![arg],
        distinct: false,
    })
}

fn text(expr: Expr) -> Expr {
    pattern("cast(?1 as text)", expr)
}

/// Integers are zero padded so that paths sort in key order.
fn padded(expr: Expr, ty: &Type) -> Expr {
    match ty {
        Type::I32 | Type::I64 => pattern("printf('%020d', ?1)", expr),
        _ => text(expr),
    }
}
