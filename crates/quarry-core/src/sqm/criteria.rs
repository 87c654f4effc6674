//! Programmatic query construction.
//!
//! Handles ([`FromRef`], [`PathRef`], [`CteRef`]) share the builder's
//! context, which allocates ids, owns the parameter table, and knows the
//! shape of every CTE declared so far. The trees produced here have exactly
//! the shape the query-language front end produces for the same query.
//!
//! ```ignore
//! let cb = CriteriaBuilder::new(schema, functions);
//! let q = cb.create_query();
//! let p = q.from("Person")?;
//! q.where_(cb.equal(p.get("name")?, cb.parameter(Type::String, Some("name")))?);
//! let stmt = q.build()?;
//! ```

use super::*;
use crate::{
    stmt::{Type, Value},
    Error, Result, Schema,
};

use indexmap::IndexMap;
use std::{cell::RefCell, rc::Rc, sync::Arc};

#[derive(Debug, Clone)]
pub struct CriteriaBuilder {
    cx: Rc<Context>,
}

#[derive(Debug)]
struct Context {
    schema: Arc<Schema>,
    functions: Arc<FunctionRegistry>,
    copy_tree: bool,
    state: RefCell<State>,
}

#[derive(Debug, Default)]
struct State {
    next_from: usize,
    next_cte: usize,
    params: SqmParameters,
    ctes: IndexMap<CteId, SqmCteStatement>,
}

/// A query (or subquery, or CTE arm) under construction.
#[derive(Debug, Clone)]
pub struct CriteriaQuery {
    cx: Rc<Context>,
    spec: Rc<RefCell<SpecState>>,
}

#[derive(Debug, Default)]
struct SpecState {
    spec: SqmQuerySpec,
    ctes: Vec<CteId>,
    group: Option<(SetOperator, Vec<CriteriaQuery>)>,
}

/// A root or join of a [`CriteriaQuery`].
#[derive(Debug, Clone)]
pub struct FromRef {
    cx: Rc<Context>,
    spec: Rc<RefCell<SpecState>>,
    from: SqmFrom,
}

/// A path navigated from a [`FromRef`].
#[derive(Debug, Clone)]
pub struct PathRef {
    cx: Rc<Context>,
    from_ty: FromTy,
    path: SqmPath,
}

/// A CTE declared on a query.
#[derive(Debug, Clone)]
pub struct CteRef {
    cx: Rc<Context>,
    id: CteId,
}

impl CriteriaBuilder {
    pub fn new(schema: Arc<Schema>, functions: Arc<FunctionRegistry>) -> CriteriaBuilder {
        CriteriaBuilder {
            cx: Rc::new(Context {
                schema,
                functions,
                copy_tree: false,
                state: RefCell::new(State::default()),
            }),
        }
    }

    /// When set, `build` returns a deep copy so later changes to the
    /// criteria do not leak into queries already created from it.
    pub fn with_copy_tree(schema: Arc<Schema>, functions: Arc<FunctionRegistry>) -> Self {
        CriteriaBuilder {
            cx: Rc::new(Context {
                schema,
                functions,
                copy_tree: true,
                state: RefCell::new(State::default()),
            }),
        }
    }

    pub fn create_query(&self) -> CriteriaQuery {
        CriteriaQuery {
            cx: self.cx.clone(),
            spec: Rc::new(RefCell::new(SpecState::default())),
        }
    }

    pub fn literal(&self, value: impl Into<Value>) -> SqmExpr {
        SqmExpr::Literal(value.into())
    }

    /// A parameter bound later by name (or by its position among the
    /// unnamed criteria parameters).
    pub fn parameter(&self, ty: Type, name: Option<&str>) -> SqmExpr {
        let id = self.cx.state.borrow_mut().params.criteria(name, ty);
        SqmExpr::Param(SqmParamRef { id })
    }

    /// A literal rendered as a bound parameter.
    pub fn value(&self, value: impl Into<Value>) -> SqmExpr {
        let value = value.into();
        let ty = value.ty();
        let id = self.cx.state.borrow_mut().params.value(value, ty);
        SqmExpr::Param(SqmParamRef { id })
    }

    pub fn equal(&self, lhs: impl Into<SqmExpr>, rhs: impl Into<SqmExpr>) -> Result<SqmPredicate> {
        self.compare(lhs, ComparisonOp::Eq, rhs)
    }

    pub fn not_equal(
        &self,
        lhs: impl Into<SqmExpr>,
        rhs: impl Into<SqmExpr>,
    ) -> Result<SqmPredicate> {
        self.compare(lhs, ComparisonOp::Ne, rhs)
    }

    pub fn lt(&self, lhs: impl Into<SqmExpr>, rhs: impl Into<SqmExpr>) -> Result<SqmPredicate> {
        self.compare(lhs, ComparisonOp::Lt, rhs)
    }

    pub fn le(&self, lhs: impl Into<SqmExpr>, rhs: impl Into<SqmExpr>) -> Result<SqmPredicate> {
        self.compare(lhs, ComparisonOp::Le, rhs)
    }

    pub fn gt(&self, lhs: impl Into<SqmExpr>, rhs: impl Into<SqmExpr>) -> Result<SqmPredicate> {
        self.compare(lhs, ComparisonOp::Gt, rhs)
    }

    pub fn ge(&self, lhs: impl Into<SqmExpr>, rhs: impl Into<SqmExpr>) -> Result<SqmPredicate> {
        self.compare(lhs, ComparisonOp::Ge, rhs)
    }

    pub fn compare(
        &self,
        lhs: impl Into<SqmExpr>,
        op: ComparisonOp,
        rhs: impl Into<SqmExpr>,
    ) -> Result<SqmPredicate> {
        let mut state = self.cx.state.borrow_mut();
        SqmPredicate::comparison(lhs.into(), op, rhs.into(), &mut state.params)
    }

    pub fn between(
        &self,
        expr: impl Into<SqmExpr>,
        low: impl Into<SqmExpr>,
        high: impl Into<SqmExpr>,
    ) -> Result<SqmPredicate> {
        let mut state = self.cx.state.borrow_mut();
        SqmPredicate::between(expr.into(), low.into(), high.into(), false, &mut state.params)
    }

    pub fn in_list(&self, expr: impl Into<SqmExpr>, list: Vec<SqmExpr>) -> Result<SqmPredicate> {
        let mut state = self.cx.state.borrow_mut();
        SqmPredicate::in_list(expr.into(), list, false, &mut state.params)
    }

    pub fn in_subquery(&self, expr: impl Into<SqmExpr>, query: &CriteriaQuery) -> Result<SqmPredicate> {
        Ok(SqmPredicate::InSubquery {
            expr: expr.into(),
            query: Box::new(query.build_query()?),
            negated: false,
        })
    }

    pub fn like(&self, expr: impl Into<SqmExpr>, pattern: impl Into<SqmExpr>) -> Result<SqmPredicate> {
        let mut state = self.cx.state.borrow_mut();
        SqmPredicate::like(expr.into(), pattern.into(), None, false, &mut state.params)
    }

    pub fn is_null(&self, expr: impl Into<SqmExpr>) -> SqmPredicate {
        SqmPredicate::IsNull {
            expr: expr.into(),
            negated: false,
        }
    }

    pub fn is_not_null(&self, expr: impl Into<SqmExpr>) -> SqmPredicate {
        SqmPredicate::IsNull {
            expr: expr.into(),
            negated: true,
        }
    }

    pub fn is_empty(&self, path: &PathRef) -> Result<SqmPredicate> {
        if !path.path.is_plural() {
            return Err(Error::semantic("`is empty` requires a collection-valued path"));
        }
        Ok(SqmPredicate::IsEmpty {
            path: path.path.clone(),
            negated: false,
        })
    }

    pub fn exists(&self, query: &CriteriaQuery) -> Result<SqmPredicate> {
        Ok(SqmPredicate::Exists {
            query: Box::new(query.build_query()?),
            negated: false,
        })
    }

    pub fn and(&self, predicates: Vec<SqmPredicate>) -> SqmPredicate {
        SqmPredicate::and(predicates)
    }

    pub fn or(&self, predicates: Vec<SqmPredicate>) -> SqmPredicate {
        SqmPredicate::or(predicates)
    }

    pub fn not(&self, predicate: SqmPredicate) -> SqmPredicate {
        SqmPredicate::Not(Box::new(predicate))
    }

    /// Calls a registered function.
    pub fn function(&self, name: &str, args: Vec<SqmExpr>) -> Result<SqmExpr> {
        Ok(SqmExpr::Function(self.cx.functions.resolve(name, args, false)?))
    }

    pub fn count(&self, expr: impl Into<SqmExpr>) -> Result<SqmExpr> {
        self.function("count", vec![expr.into()])
    }

    pub fn count_distinct(&self, expr: impl Into<SqmExpr>) -> Result<SqmExpr> {
        Ok(SqmExpr::Function(
            self.cx.functions.resolve("count", vec![expr.into()], true)?,
        ))
    }

    pub fn count_star(&self) -> SqmExpr {
        SqmExpr::CountStar
    }

    pub fn size(&self, path: &PathRef) -> Result<SqmExpr> {
        self.function("size", vec![path.into()])
    }

    pub fn arithmetic(
        &self,
        lhs: impl Into<SqmExpr>,
        op: ArithmeticOp,
        rhs: impl Into<SqmExpr>,
    ) -> SqmExpr {
        SqmExpr::Arithmetic(SqmArithmetic::new(lhs.into(), op, rhs.into()))
    }

    pub fn asc(&self, expr: impl Into<SqmExpr>) -> SqmSortSpec {
        SqmSortSpec {
            expr: expr.into(),
            desc: false,
            nulls: None,
        }
    }

    pub fn desc(&self, expr: impl Into<SqmExpr>) -> SqmSortSpec {
        SqmSortSpec {
            expr: expr.into(),
            desc: true,
            nulls: None,
        }
    }
}

impl CriteriaQuery {
    /// Adds an entity root.
    pub fn from(&self, entity: &str) -> Result<FromRef> {
        let Some(entity) = self.cx.schema.entity_by_name(entity) else {
            return Err(Error::semantic(format!("could not resolve entity `{entity}`")));
        };
        Ok(self.add_root(FromSource::Entity(entity.id), FromTy::Entity(entity.id)))
    }

    /// Adds a root over a CTE.
    pub fn from_cte(&self, cte: &CteRef) -> FromRef {
        self.add_root(FromSource::Cte(cte.id), FromTy::Cte(cte.id))
    }

    /// Adds a root over a collection of an outer query's from element, for
    /// correlated subqueries.
    pub fn correlate(&self, outer: &FromRef, attribute: &str) -> Result<FromRef> {
        let (source, ty) = outer.join_target(attribute)?;
        Ok(self.add_root(source, ty))
    }

    pub fn distinct(&self, distinct: bool) -> &Self {
        self.spec.borrow_mut().spec.distinct = distinct;
        self
    }

    /// Appends a selection.
    pub fn select(&self, expr: impl Into<SqmExpr>) -> &Self {
        self.push_selection(expr.into(), None)
    }

    /// Appends a selection with an alias; CTE columns take their names from
    /// these aliases.
    pub fn select_as(&self, expr: impl Into<SqmExpr>, alias: &str) -> &Self {
        self.push_selection(expr.into(), Some(alias.to_string()))
    }

    pub fn where_(&self, predicate: SqmPredicate) -> &Self {
        let mut spec = self.spec.borrow_mut();
        let current = spec.spec.where_.take();
        spec.spec.where_ = Some(SqmPredicate::conjoin(current, predicate));
        self
    }

    pub fn group_by(&self, exprs: Vec<SqmExpr>) -> &Self {
        self.spec.borrow_mut().spec.group_by = exprs;
        self
    }

    pub fn having(&self, predicate: SqmPredicate) -> &Self {
        self.spec.borrow_mut().spec.having = Some(predicate);
        self
    }

    pub fn order_by(&self, items: Vec<SqmSortSpec>) -> &Self {
        self.spec.borrow_mut().spec.order_by = items;
        self
    }

    pub fn offset(&self, offset: i64) -> &Self {
        self.spec.borrow_mut().spec.offset = Some(SqmExpr::Literal(Value::I64(offset)));
        self
    }

    pub fn fetch(&self, fetch: i64) -> &Self {
        self.spec.borrow_mut().spec.fetch = Some(SqmExpr::Literal(Value::I64(fetch)));
        self
    }

    /// A subquery sharing this query's context, so it may reference this
    /// query's from elements.
    pub fn subquery(&self) -> CriteriaQuery {
        CriteriaQuery {
            cx: self.cx.clone(),
            spec: Rc::new(RefCell::new(SpecState::default())),
        }
    }

    /// Combines this query with others through a set operator. The result
    /// is a new query whose arms are `self` followed by `others`.
    pub fn set_operation(&self, op: SetOperator, others: Vec<CriteriaQuery>) -> CriteriaQuery {
        let mut parts = vec![self.clone()];
        parts.extend(others);
        CriteriaQuery {
            cx: self.cx.clone(),
            spec: Rc::new(RefCell::new(SpecState {
                group: Some((op, parts)),
                ..Default::default()
            })),
        }
    }

    /// Declares a non-recursive CTE on this query.
    pub fn with(&self, name: &str, definition: &CriteriaQuery) -> Result<CteRef> {
        let definition = definition.build_query()?;
        let id = self.cx.next_cte();
        let cte = SqmCteStatement::new(id, name, definition)?;
        Ok(self.register_cte(cte))
    }

    /// Declares a recursive CTE: `base union all recursive`. The closure
    /// receives the CTE, already registered with the base arm's columns, so
    /// the recursive arm can select from it.
    pub fn with_recursive_union_all(
        &self,
        name: &str,
        base: &CriteriaQuery,
        recursive: impl FnOnce(&CteRef) -> Result<CriteriaQuery>,
    ) -> Result<CteRef> {
        let base = base.build_query()?;
        let id = self.cx.next_cte();

        // Register the shape before building the recursive arm.
        let mut cte = SqmCteStatement::new(id, name, base.clone())?;
        cte.recursive = true;
        let handle = self.register_cte(cte);

        let recursive = recursive(&handle)?.build_query()?;
        let definition = SqmQuery {
            ctes: vec![],
            body: SqmQueryPart::Group(Box::new(SqmQueryGroup {
                op: SetOperator::UnionAll,
                parts: vec![base.body, recursive.body],
                order_by: vec![],
                offset: None,
                fetch: None,
            })),
        };

        if let Some(cte) = self.cx.state.borrow_mut().ctes.get_mut(&id) {
            cte.definition = definition;
        }
        Ok(handle)
    }

    /// The finished statement.
    pub fn build(&self) -> Result<SqmSelectStatement> {
        let query = self.build_query()?;
        let params = self.cx.state.borrow().params.clone();
        let stmt = SqmSelectStatement { query, params };

        if self.cx.copy_tree {
            let (next_from, next_cte) = {
                let state = self.cx.state.borrow();
                (state.next_from, state.next_cte)
            };
            let mut copy = SqmCopyContext::new(next_from, next_cte);
            return Ok(stmt.copy(&mut copy));
        }
        Ok(stmt)
    }

    /// The query expression, without the parameter table.
    pub fn build_query(&self) -> Result<SqmQuery> {
        let spec = self.spec.borrow();
        let ctes = {
            let state = self.cx.state.borrow();
            spec.ctes
                .iter()
                .filter_map(|id| state.ctes.get(id).cloned())
                .collect()
        };

        let body = match &spec.group {
            Some((op, parts)) => {
                let parts = parts
                    .iter()
                    .map(|part| Ok(part.build_query()?.body))
                    .collect::<Result<Vec<_>>>()?;
                SqmQueryPart::Group(Box::new(SqmQueryGroup {
                    op: *op,
                    parts,
                    order_by: spec.spec.order_by.clone(),
                    offset: spec.spec.offset.clone(),
                    fetch: spec.spec.fetch.clone(),
                }))
            }
            None => {
                let mut query_spec = spec.spec.clone();
                if query_spec.select.is_empty() {
                    let [root] = &query_spec.from.roots[..] else {
                        return Err(Error::semantic(
                            "a query without a select clause must have exactly one root",
                        ));
                    };
                    let expr = SqmExpr::Path(SqmPath::root(&root.from));
                    query_spec.select.push(SqmSelection { expr, alias: None });
                }
                SqmQueryPart::Spec(Box::new(query_spec))
            }
        };

        Ok(SqmQuery { ctes, body })
    }

    fn add_root(&self, source: FromSource, ty: FromTy) -> FromRef {
        let from = SqmFrom {
            id: self.cx.next_from(),
            alias: None,
            source,
            ty,
        };
        self.spec.borrow_mut().spec.from.roots.push(SqmRoot {
            from: from.clone(),
            joins: vec![],
        });
        FromRef {
            cx: self.cx.clone(),
            spec: self.spec.clone(),
            from,
        }
    }

    fn push_selection(&self, expr: SqmExpr, alias: Option<String>) -> &Self {
        self.spec
            .borrow_mut()
            .spec
            .select
            .push(SqmSelection { expr, alias });
        self
    }

    fn register_cte(&self, cte: SqmCteStatement) -> CteRef {
        let id = cte.id;
        self.cx.state.borrow_mut().ctes.insert(id, cte);
        self.spec.borrow_mut().ctes.push(id);
        CteRef {
            cx: self.cx.clone(),
            id,
        }
    }
}

impl FromRef {
    pub fn id(&self) -> FromId {
        self.from.id
    }

    /// Names the identification variable.
    pub fn alias(mut self, alias: &str) -> Self {
        self.from.alias = Some(alias.to_string());
        let mut spec = self.spec.borrow_mut();
        for root in &mut spec.spec.from.roots {
            if root.from.id == self.from.id {
                root.from.alias = self.from.alias.clone();
            }
        }
        if let Some(join) = spec.spec.from.find_join_mut(self.from.id) {
            join.from.alias = self.from.alias.clone();
        }
        drop(spec);
        self
    }

    pub fn path(&self) -> PathRef {
        PathRef {
            cx: self.cx.clone(),
            from_ty: self.from.ty.clone(),
            path: SqmPath::root(&self.from),
        }
    }

    pub fn get(&self, name: &str) -> Result<PathRef> {
        self.path().get(name)
    }

    /// Joins an association, element collection, or entity-valued CTE
    /// column.
    pub fn join(&self, attribute: &str, kind: JoinKind) -> Result<FromRef> {
        let (source, ty) = self.join_target(attribute)?;
        Ok(self.add_join(source, ty, kind, false))
    }

    /// Joins and initializes an association.
    pub fn fetch(&self, attribute: &str, kind: JoinKind) -> Result<FromRef> {
        let (source, ty) = self.join_target(attribute)?;
        if !matches!(source, FromSource::Attribute { .. }) {
            return Err(Error::semantic(format!(
                "`{attribute}` is not an association and cannot be fetched"
            )));
        }
        Ok(self.add_join(source, ty, kind, true))
    }

    /// An ad-hoc join to an unrelated entity, restricted with [`FromRef::on`].
    pub fn join_entity(&self, entity: &str, kind: JoinKind) -> Result<FromRef> {
        let Some(entity) = self.cx.schema.entity_by_name(entity) else {
            return Err(Error::semantic(format!("could not resolve entity `{entity}`")));
        };
        Ok(self.add_join(
            FromSource::Entity(entity.id),
            FromTy::Entity(entity.id),
            kind,
            false,
        ))
    }

    pub fn join_cte(&self, cte: &CteRef, kind: JoinKind) -> FromRef {
        self.add_join(FromSource::Cte(cte.id), FromTy::Cte(cte.id), kind, false)
    }

    /// Sets (or conjoins onto) the join's `on` restriction.
    pub fn on(&self, predicate: SqmPredicate) -> Result<&Self> {
        let mut spec = self.spec.borrow_mut();
        let Some(join) = spec.spec.from.find_join_mut(self.from.id) else {
            return Err(Error::illegal_argument("`on` applies to joins only"));
        };
        join.on = Some(SqmPredicate::conjoin(join.on.take(), predicate));
        Ok(self)
    }

    fn join_target(&self, name: &str) -> Result<(FromSource, FromTy)> {
        let path = self.get(name)?;
        FromSource::join_target(&self.cx.schema, &path.path)
    }

    fn add_join(&self, source: FromSource, ty: FromTy, kind: JoinKind, fetch: bool) -> FromRef {
        let from = SqmFrom {
            id: self.cx.next_from(),
            alias: None,
            source,
            ty,
        };

        let mut spec = self.spec.borrow_mut();
        let root = spec.spec.from.roots.iter_mut().find(|root| {
            root.from.id == self.from.id || root.joins.iter().any(|j| j.from.id == self.from.id)
        });
        if let Some(root) = root {
            root.joins.push(SqmJoin {
                from: from.clone(),
                kind,
                fetch,
                on: None,
            });
        }
        drop(spec);

        FromRef {
            cx: self.cx.clone(),
            spec: self.spec.clone(),
            from,
        }
    }
}

impl PathRef {
    pub fn get(&self, name: &str) -> Result<PathRef> {
        let path = {
            let state = self.cx.state.borrow();
            self.path
                .resolve(&self.cx.schema, &*state, &self.from_ty, name)?
        };
        Ok(PathRef {
            cx: self.cx.clone(),
            from_ty: self.from_ty.clone(),
            path,
        })
    }

    pub fn ty(&self) -> &Type {
        &self.path.ty
    }
}

impl CteRef {
    pub fn id(&self) -> CteId {
        self.id
    }

    /// A column of this CTE, for search and cycle clauses.
    pub fn get(&self, name: &str) -> Result<CteAttribute> {
        self.with_cte(|cte| cte.attribute(name))
    }

    pub fn search(
        &self,
        kind: SearchKind,
        set_column: &str,
        items: Vec<(CteAttribute, bool, Option<NullPrecedence>)>,
    ) -> Result<()> {
        self.with_cte(|cte| cte.search(kind, set_column, items))
    }

    pub fn cycle(
        &self,
        mark_column: &str,
        cycle_value: impl Into<Value>,
        no_cycle_value: impl Into<Value>,
        attributes: Vec<CteAttribute>,
    ) -> Result<()> {
        let (cycle_value, no_cycle_value) = (cycle_value.into(), no_cycle_value.into());
        self.with_cte(|cte| cte.cycle(mark_column, None, cycle_value, no_cycle_value, attributes))
    }

    /// A cycle clause that also exposes the visited-row path column.
    pub fn cycle_using(
        &self,
        mark_column: &str,
        path_column: &str,
        cycle_value: impl Into<Value>,
        no_cycle_value: impl Into<Value>,
        attributes: Vec<CteAttribute>,
    ) -> Result<()> {
        let (cycle_value, no_cycle_value) = (cycle_value.into(), no_cycle_value.into());
        self.with_cte(|cte| {
            cte.cycle(
                mark_column,
                Some(path_column.to_string()),
                cycle_value,
                no_cycle_value,
                attributes,
            )
        })
    }

    pub fn materialization(&self, materialization: Materialization) -> Result<()> {
        self.with_cte(|cte| {
            cte.materialization = materialization;
            Ok(())
        })
    }

    fn with_cte<R>(&self, f: impl FnOnce(&mut SqmCteStatement) -> Result<R>) -> Result<R> {
        let mut state = self.cx.state.borrow_mut();
        let Some(cte) = state.ctes.get_mut(&self.id) else {
            return Err(Error::illegal_argument(format!(
                "{:?} is not declared by this builder",
                self.id
            )));
        };
        f(cte)
    }
}

impl Context {
    fn next_from(&self) -> FromId {
        let mut state = self.state.borrow_mut();
        let id = FromId(state.next_from);
        state.next_from += 1;
        id
    }

    fn next_cte(&self) -> CteId {
        let mut state = self.state.borrow_mut();
        let id = CteId(state.next_cte);
        state.next_cte += 1;
        id
    }
}

impl CteColumns for State {
    fn cte_column(&self, cte: CteId, name: &str) -> Option<(usize, Type)> {
        self.ctes.get(&cte)?.column(name)
    }

    fn cte_name(&self, cte: CteId) -> String {
        self.ctes
            .get(&cte)
            .map(|cte| cte.name.clone())
            .unwrap_or_default()
    }
}

impl From<PathRef> for SqmExpr {
    fn from(value: PathRef) -> Self {
        SqmExpr::Path(value.path)
    }
}

impl From<&PathRef> for SqmExpr {
    fn from(value: &PathRef) -> Self {
        SqmExpr::Path(value.path.clone())
    }
}

impl From<FromRef> for SqmExpr {
    fn from(value: FromRef) -> Self {
        SqmExpr::Path(SqmPath::root(&value.from))
    }
}

impl From<&FromRef> for SqmExpr {
    fn from(value: &FromRef) -> Self {
        SqmExpr::Path(SqmPath::root(&value.from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Dialect;
    use crate::schema::{AttributeDef, EntityDef};

    fn builder() -> CriteriaBuilder {
        let mut schema = Schema::builder();
        schema.entity(
            EntityDef::new("Contact")
                .id("id", Type::I64)
                .basic("name", Type::String)
                .attribute(AttributeDef::many_to_one("alternativeContact", "Contact")),
        );
        CriteriaBuilder::new(
            Arc::new(schema.build().unwrap()),
            Arc::new(FunctionRegistry::new(Dialect::Sqlite)),
        )
    }

    #[test]
    fn implicit_selection_of_single_root() {
        let cb = builder();
        let q = cb.create_query();
        let c = q.from("Contact").unwrap();
        q.where_(cb.equal(c.get("name").unwrap(), cb.literal("John")).unwrap());

        let stmt = q.build().unwrap();
        let spec = stmt.query.first_spec();
        assert_eq!(spec.select.len(), 1);
        assert_eq!(spec.select[0].expr.as_path().unwrap().from, c.id());
    }

    #[test]
    fn recursive_cte_references_itself() {
        let cb = builder();
        let q = cb.create_query();

        let base = q.subquery();
        let c = base.from("Contact").unwrap();
        base.select_as(c.get("id").unwrap(), "id")
            .select_as(c.get("alternativeContact").unwrap(), "alt");

        let cte = q
            .with_recursive_union_all("alternativeContacts", &base, |this| {
                let rec = q.subquery();
                let prev = rec.from_cte(this);
                let next = prev.join("alt", JoinKind::Inner)?;
                rec.select_as(next.get("id")?, "id")
                    .select_as(next.get("alternativeContact")?, "alt");
                Ok(rec)
            })
            .unwrap();

        let id = cte.get("id").unwrap();
        cte.cycle("is_cycle", true, false, vec![id]).unwrap();

        let outer = q.from_cte(&cte);
        q.select(outer.get("id").unwrap());

        let stmt = q.build().unwrap();
        let declared = &stmt.query.ctes[0];
        assert!(declared.recursive);
        assert!(declared.cycle.is_some());

        let SqmQueryPart::Group(group) = &declared.definition.body else {
            panic!("expected union all");
        };
        assert_eq!(group.op, SetOperator::UnionAll);
        assert_eq!(
            group.parts[1].first_spec().from.roots[0].from.ty,
            FromTy::Cte(cte.id())
        );
    }

    #[test]
    fn cycle_with_mixed_sentinels_is_illegal() {
        let cb = builder();
        let q = cb.create_query();
        let base = q.subquery();
        let c = base.from("Contact").unwrap();
        base.select_as(c.get("id").unwrap(), "id");
        let cte = q.with("ids", &base).unwrap();

        let id = cte.get("id").unwrap();
        let err = cte.cycle("mark", "Y", 0i32, vec![id]).unwrap_err();
        assert!(err.is_illegal_argument());
        assert!(cte.get("name").unwrap_err().is_illegal_argument());
    }

    #[test]
    fn copy_tree_allocates_fresh_ids() {
        let mut schema = Schema::builder();
        schema.entity(EntityDef::new("Contact").id("id", Type::I64));
        let cb = CriteriaBuilder::with_copy_tree(
            Arc::new(schema.build().unwrap()),
            Arc::new(FunctionRegistry::new(Dialect::Sqlite)),
        );

        let q = cb.create_query();
        let c = q.from("Contact").unwrap();
        let stmt = q.build().unwrap();
        assert_ne!(stmt.query.first_spec().from.roots[0].from.id, c.id());
    }
}
