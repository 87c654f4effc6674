use super::*;

use std::collections::HashMap;

/// Deep copy of SQM nodes with from-element and CTE ids remapped.
///
/// Containers are registered in the [`SqmCopyContext`] before their
/// children are copied, so a child that refers back to its container (a
/// recursive CTE naming itself, an `on` predicate naming its own join)
/// finds the new id. Ids the context has never seen, such as correlated
/// references to an enclosing query, are kept as is.
pub trait SqmCopy {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self;
}

#[derive(Debug, Default)]
pub struct SqmCopyContext {
    froms: HashMap<FromId, FromId>,
    ctes: HashMap<CteId, CteId>,
    next_from: usize,
    next_cte: usize,
}

impl SqmCopyContext {
    /// New ids are allocated starting at `next_from` / `next_cte`.
    pub fn new(next_from: usize, next_cte: usize) -> SqmCopyContext {
        SqmCopyContext {
            next_from,
            next_cte,
            ..Default::default()
        }
    }

    pub fn register_from(&mut self, id: FromId) -> FromId {
        if let Some(copy) = self.froms.get(&id) {
            return *copy;
        }
        let copy = FromId(self.next_from);
        self.next_from += 1;
        self.froms.insert(id, copy);
        copy
    }

    pub fn register_cte(&mut self, id: CteId) -> CteId {
        if let Some(copy) = self.ctes.get(&id) {
            return *copy;
        }
        let copy = CteId(self.next_cte);
        self.next_cte += 1;
        self.ctes.insert(id, copy);
        copy
    }

    pub fn from(&self, id: FromId) -> FromId {
        self.froms.get(&id).copied().unwrap_or(id)
    }

    pub fn cte(&self, id: CteId) -> CteId {
        self.ctes.get(&id).copied().unwrap_or(id)
    }

    /// Next unallocated ids, for continuing allocation elsewhere.
    pub fn next_ids(&self) -> (usize, usize) {
        (self.next_from, self.next_cte)
    }
}

impl<T: SqmCopy> SqmCopy for Vec<T> {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        self.iter().map(|item| item.copy(cx)).collect()
    }
}

impl<T: SqmCopy> SqmCopy for Option<T> {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        self.as_ref().map(|item| item.copy(cx))
    }
}

impl<T: SqmCopy> SqmCopy for Box<T> {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        Box::new((**self).copy(cx))
    }
}

impl SqmCopy for SqmStatement {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        match self {
            SqmStatement::Select(stmt) => SqmStatement::Select(stmt.copy(cx)),
            SqmStatement::Update(stmt) => {
                let target = stmt.target.copy(cx);
                SqmStatement::Update(SqmUpdateStatement {
                    target,
                    assignments: stmt
                        .assignments
                        .iter()
                        .map(|assignment| SqmAssignment {
                            path: assignment.path.copy(cx),
                            value: assignment.value.copy(cx),
                        })
                        .collect(),
                    where_: stmt.where_.copy(cx),
                    params: stmt.params.clone(),
                })
            }
            SqmStatement::Delete(stmt) => {
                let target = stmt.target.copy(cx);
                SqmStatement::Delete(SqmDeleteStatement {
                    target,
                    where_: stmt.where_.copy(cx),
                    params: stmt.params.clone(),
                })
            }
            SqmStatement::Insert(stmt) => {
                let target = stmt.target.copy(cx);
                SqmStatement::Insert(SqmInsertStatement {
                    target,
                    paths: stmt.paths.copy(cx),
                    source: match &stmt.source {
                        SqmInsertSource::Values(rows) => SqmInsertSource::Values(
                            rows.iter().map(|row| row.copy(cx)).collect(),
                        ),
                        SqmInsertSource::Select(query) => SqmInsertSource::Select(query.copy(cx)),
                    },
                    params: stmt.params.clone(),
                })
            }
        }
    }
}

impl SqmCopy for SqmSelectStatement {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        SqmSelectStatement {
            query: self.query.copy(cx),
            params: self.params.clone(),
        }
    }
}

impl SqmCopy for SqmQuery {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        for cte in &self.ctes {
            cx.register_cte(cte.id);
        }
        SqmQuery {
            ctes: self.ctes.copy(cx),
            body: self.body.copy(cx),
        }
    }
}

impl SqmCopy for SqmCteStatement {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        SqmCteStatement {
            id: cx.register_cte(self.id),
            name: self.name.clone(),
            columns: self.columns.clone(),
            definition: self.definition.copy(cx),
            recursive: self.recursive,
            search: self.search.clone(),
            cycle: self.cycle.clone(),
            materialization: self.materialization,
        }
    }
}

impl SqmCopy for SqmQueryPart {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        match self {
            SqmQueryPart::Spec(spec) => SqmQueryPart::Spec(spec.copy(cx)),
            SqmQueryPart::Group(group) => SqmQueryPart::Group(Box::new(SqmQueryGroup {
                op: group.op,
                parts: group.parts.copy(cx),
                order_by: group.order_by.copy(cx),
                offset: group.offset.copy(cx),
                fetch: group.fetch.copy(cx),
            })),
        }
    }
}

impl SqmCopy for SqmQuerySpec {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        // Every from element of the clause is visible to every predicate and
        // selection of the query spec.
        for from in self.from.froms() {
            cx.register_from(from.id);
        }

        SqmQuerySpec {
            distinct: self.distinct,
            from: self.from.copy(cx),
            select: self.select.copy(cx),
            where_: self.where_.copy(cx),
            group_by: self.group_by.copy(cx),
            having: self.having.copy(cx),
            order_by: self.order_by.copy(cx),
            offset: self.offset.copy(cx),
            fetch: self.fetch.copy(cx),
        }
    }
}

impl SqmCopy for SqmFromClause {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        SqmFromClause {
            roots: self
                .roots
                .iter()
                .map(|root| SqmRoot {
                    from: root.from.copy(cx),
                    joins: root
                        .joins
                        .iter()
                        .map(|join| SqmJoin {
                            from: join.from.copy(cx),
                            kind: join.kind,
                            fetch: join.fetch,
                            on: join.on.copy(cx),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl SqmCopy for SqmFrom {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        let id = cx.register_from(self.id);
        let source = match &self.source {
            FromSource::Entity(entity) => FromSource::Entity(*entity),
            FromSource::Cte(cte) => FromSource::Cte(cx.cte(*cte)),
            FromSource::Attribute { lhs, attribute } => FromSource::Attribute {
                lhs: cx.from(*lhs),
                attribute: *attribute,
            },
            FromSource::CteColumn { lhs, cte, column } => FromSource::CteColumn {
                lhs: cx.from(*lhs),
                cte: cx.cte(*cte),
                column: *column,
            },
        };
        let ty = match &self.ty {
            FromTy::Cte(cte) => FromTy::Cte(cx.cte(*cte)),
            ty => ty.clone(),
        };
        SqmFrom {
            id,
            alias: self.alias.clone(),
            source,
            ty,
        }
    }
}

impl SqmCopy for SqmPath {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        SqmPath {
            from: cx.from(self.from),
            segments: self
                .segments
                .iter()
                .map(|segment| match segment {
                    PathSegment::CteColumn(cte, index) => PathSegment::CteColumn(cx.cte(*cte), *index),
                    segment => *segment,
                })
                .collect(),
            ty: self.ty.clone(),
        }
    }
}

impl SqmCopy for SqmSelection {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        SqmSelection {
            expr: self.expr.copy(cx),
            alias: self.alias.clone(),
        }
    }
}

impl SqmCopy for SqmSortSpec {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        SqmSortSpec {
            expr: self.expr.copy(cx),
            desc: self.desc,
            nulls: self.nulls,
        }
    }
}

impl SqmCopy for SqmExpr {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        match self {
            SqmExpr::Literal(value) => SqmExpr::Literal(value.clone()),
            SqmExpr::Path(path) => SqmExpr::Path(path.copy(cx)),
            SqmExpr::Param(param) => SqmExpr::Param(*param),
            SqmExpr::Function(function) => SqmExpr::Function(SqmFunction {
                name: function.name.clone(),
                args: function.args.copy(cx),
                distinct: function.distinct,
                ty: function.ty.clone(),
            }),
            SqmExpr::CountStar => SqmExpr::CountStar,
            SqmExpr::Arithmetic(arithmetic) => SqmExpr::Arithmetic(SqmArithmetic {
                lhs: arithmetic.lhs.copy(cx),
                op: arithmetic.op,
                rhs: arithmetic.rhs.copy(cx),
                ty: arithmetic.ty.clone(),
            }),
            SqmExpr::Negate(expr) => SqmExpr::Negate(expr.copy(cx)),
            SqmExpr::Case(case) => SqmExpr::Case(SqmCase {
                whens: case
                    .whens
                    .iter()
                    .map(|(when, then)| (when.copy(cx), then.copy(cx)))
                    .collect(),
                otherwise: case.otherwise.copy(cx),
                ty: case.ty.clone(),
            }),
            SqmExpr::Tuple(items) => SqmExpr::Tuple(items.copy(cx)),
            SqmExpr::Subquery { query, ty } => SqmExpr::Subquery {
                query: query.copy(cx),
                ty: ty.clone(),
            },
        }
    }
}

impl SqmCopy for SqmPredicate {
    fn copy(&self, cx: &mut SqmCopyContext) -> Self {
        match self {
            SqmPredicate::Comparison { lhs, op, rhs } => SqmPredicate::Comparison {
                lhs: lhs.copy(cx),
                op: *op,
                rhs: rhs.copy(cx),
            },
            SqmPredicate::Between {
                expr,
                low,
                high,
                negated,
            } => SqmPredicate::Between {
                expr: expr.copy(cx),
                low: low.copy(cx),
                high: high.copy(cx),
                negated: *negated,
            },
            SqmPredicate::InList {
                expr,
                list,
                negated,
            } => SqmPredicate::InList {
                expr: expr.copy(cx),
                list: list.copy(cx),
                negated: *negated,
            },
            SqmPredicate::InSubquery {
                expr,
                query,
                negated,
            } => SqmPredicate::InSubquery {
                expr: expr.copy(cx),
                query: query.copy(cx),
                negated: *negated,
            },
            SqmPredicate::Like {
                expr,
                pattern,
                escape,
                negated,
            } => SqmPredicate::Like {
                expr: expr.copy(cx),
                pattern: pattern.copy(cx),
                escape: *escape,
                negated: *negated,
            },
            SqmPredicate::IsNull { expr, negated } => SqmPredicate::IsNull {
                expr: expr.copy(cx),
                negated: *negated,
            },
            SqmPredicate::IsEmpty { path, negated } => SqmPredicate::IsEmpty {
                path: path.copy(cx),
                negated: *negated,
            },
            SqmPredicate::Junction { kind, predicates } => SqmPredicate::Junction {
                kind: *kind,
                predicates: predicates.copy(cx),
            },
            SqmPredicate::Not(predicate) => SqmPredicate::Not(predicate.copy(cx)),
            SqmPredicate::Exists { query, negated } => SqmPredicate::Exists {
                query: query.copy(cx),
                negated: *negated,
            },
            SqmPredicate::Boolean(expr) => SqmPredicate::Boolean(expr.copy(cx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::app::EntityId;
    use crate::stmt::{Type, Value};

    fn recursive_cte() -> SqmQuery {
        // with tree as (select e from E e union all select t from tree t)
        let entity = SqmFrom {
            id: FromId(0),
            alias: Some("e".into()),
            source: FromSource::Entity(EntityId(0)),
            ty: FromTy::Entity(EntityId(0)),
        };
        let self_ref = SqmFrom {
            id: FromId(1),
            alias: Some("t".into()),
            source: FromSource::Cte(CteId(0)),
            ty: FromTy::Cte(CteId(0)),
        };
        let spec = |from: SqmFrom| SqmQuerySpec {
            select: vec![SqmSelection {
                expr: SqmExpr::Path(SqmPath::root(&from)),
                alias: Some("x".into()),
            }],
            from: SqmFromClause {
                roots: vec![SqmRoot {
                    from,
                    joins: vec![],
                }],
            },
            ..Default::default()
        };

        let definition = SqmQuery {
            ctes: vec![],
            body: SqmQueryPart::Group(Box::new(SqmQueryGroup {
                op: SetOperator::UnionAll,
                parts: vec![
                    SqmQueryPart::Spec(Box::new(spec(entity))),
                    SqmQueryPart::Spec(Box::new(spec(self_ref.clone()))),
                ],
                order_by: vec![],
                offset: None,
                fetch: None,
            })),
        };

        let mut cte = SqmCteStatement::new(CteId(0), "tree", definition).unwrap();
        cte.recursive = true;

        let mut outer = spec(SqmFrom {
            id: FromId(2),
            ..self_ref
        });
        outer.where_ = Some(SqmPredicate::Comparison {
            lhs: SqmExpr::Literal(Value::I64(1)),
            op: ComparisonOp::Eq,
            rhs: SqmExpr::Literal(Value::I64(1)),
        });

        SqmQuery {
            ctes: vec![cte],
            body: SqmQueryPart::Spec(Box::new(outer)),
        }
    }

    #[test]
    fn self_reference_follows_the_copied_cte() {
        let query = recursive_cte();
        let mut cx = SqmCopyContext::new(10, 5);
        let copy = query.copy(&mut cx);

        let cte = &copy.ctes[0];
        assert_eq!(cte.id, CteId(5));

        let SqmQueryPart::Group(group) = &cte.definition.body else {
            panic!("expected group");
        };
        let recursive_arm = group.parts[1].first_spec();
        assert_eq!(
            recursive_arm.from.roots[0].from.ty,
            FromTy::Cte(CteId(5))
        );

        let outer = copy.first_spec();
        assert_eq!(outer.from.roots[0].from.ty, FromTy::Cte(CteId(5)));
        assert_eq!(
            outer.select[0].expr.as_path().unwrap().from,
            outer.from.roots[0].from.id
        );
        assert_eq!(cx.next_ids(), (13, 6));
    }

    #[test]
    fn unmapped_ids_are_kept() {
        let mut cx = SqmCopyContext::new(0, 0);
        let path = SqmPath {
            from: FromId(42),
            segments: vec![],
            ty: Type::Unknown,
        };
        assert_eq!(path.copy(&mut cx).from, FromId(42));
    }
}
