//! Binds a parsed statement to the metamodel, producing the SQM tree.

use super::ast;
use crate::{
    schema::app::{EntityId, Filter},
    sqm::*,
    stmt::{Type, Value},
    Error, Result, Schema,
};

use indexmap::IndexMap;

/// Functions that may be written without parentheses.
const NILADIC: &[&str] = &["current_date", "current_time", "current_timestamp"];

pub(crate) struct SemanticBuilder<'a> {
    schema: &'a Schema,

    /// `None` while validating mapping-time conditions; calls are then left
    /// unresolved and untyped.
    functions: Option<&'a FunctionRegistry>,

    filter: Option<FilterParams<'a>>,
    params: SqmParameters,
    next_from: usize,
    next_cte: usize,

    /// Every CTE declared so far, by id
    ctes: IndexMap<CteId, SqmCteStatement>,

    /// CTE names visible at each query nesting level
    cte_names: Vec<Vec<(String, CteId)>>,

    scopes: Vec<Scope>,
}

/// Named parameters of a filter condition take the filter's declared
/// types. When `values` is set they are bound to those values.
pub(crate) struct FilterParams<'a> {
    pub def: &'a Filter,
    pub values: Option<&'a IndexMap<String, Value>>,
}

#[derive(Default)]
struct Scope {
    froms: Vec<SqmFrom>,
    selections: Vec<SqmSelection>,
}

impl<'a> SemanticBuilder<'a> {
    pub(crate) fn new(schema: &'a Schema, functions: Option<&'a FunctionRegistry>) -> Self {
        SemanticBuilder {
            schema,
            functions,
            filter: None,
            params: SqmParameters::new(),
            next_from: 0,
            next_cte: 0,
            ctes: IndexMap::new(),
            cte_names: vec![],
            scopes: vec![],
        }
    }

    pub(crate) fn with_params(mut self, params: SqmParameters) -> Self {
        self.params = params;
        self
    }

    pub(crate) fn with_next_from(mut self, next_from: usize) -> Self {
        self.next_from = next_from;
        self
    }

    pub(crate) fn with_filter(mut self, filter: FilterParams<'a>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub(crate) fn next_from(&self) -> usize {
        self.next_from
    }

    pub(crate) fn into_params(self) -> SqmParameters {
        self.params
    }

    pub(crate) fn statement(mut self, stmt: &ast::Statement) -> Result<SqmStatement> {
        match stmt {
            ast::Statement::Select(query) => {
                let query = self.query(query)?;
                Ok(SqmStatement::Select(SqmSelectStatement {
                    query,
                    params: self.params,
                }))
            }
            ast::Statement::Update(update) => self.update(update),
            ast::Statement::Delete(delete) => self.delete(delete),
            ast::Statement::Insert(insert) => self.insert(insert),
        }
    }

    /// Binds a standalone condition whose unqualified names resolve against
    /// `from`.
    pub(crate) fn condition(
        &mut self,
        from: &SqmFrom,
        predicate: &ast::Predicate,
    ) -> Result<SqmPredicate> {
        self.scoped(|b| {
            b.scope().froms.push(from.clone());
            b.predicate(predicate)
        })
    }

    fn query(&mut self, query: &ast::Query) -> Result<SqmQuery> {
        self.cte_names.push(vec![]);
        let result = self.query_with_ctes(query);
        self.cte_names.pop();
        result
    }

    fn query_with_ctes(&mut self, query: &ast::Query) -> Result<SqmQuery> {
        let mut ids = vec![];
        for cte in &query.ctes {
            ids.push(self.cte(cte)?);
        }

        let body = self.query_body(
            &query.body,
            &query.order_by,
            query.offset.as_ref(),
            query.fetch.as_ref(),
        )?;

        let ctes = ids
            .iter()
            .filter_map(|id| self.ctes.get(id).cloned())
            .collect();
        Ok(SqmQuery { ctes, body })
    }

    fn query_body(
        &mut self,
        body: &ast::QueryBody,
        order_by: &[ast::SortItem],
        offset: Option<&ast::Expr>,
        fetch: Option<&ast::Expr>,
    ) -> Result<SqmQueryPart> {
        match body {
            ast::QueryBody::Spec(spec) => Ok(SqmQueryPart::Spec(Box::new(
                self.spec(spec, order_by, offset, fetch)?,
            ))),
            ast::QueryBody::Nested(query) => {
                if !query.ctes.is_empty() {
                    return Err(Error::not_yet_implemented(
                        "`with` inside a parenthesized query",
                    ));
                }
                let inner_modifiers =
                    !query.order_by.is_empty() || query.offset.is_some() || query.fetch.is_some();
                let outer_modifiers = !order_by.is_empty() || offset.is_some() || fetch.is_some();
                match (inner_modifiers, outer_modifiers) {
                    (true, true) => Err(Error::not_yet_implemented(
                        "ordering or limiting both a parenthesized query and its enclosing query",
                    )),
                    (true, false) => self.query_body(
                        &query.body,
                        &query.order_by,
                        query.offset.as_ref(),
                        query.fetch.as_ref(),
                    ),
                    _ => self.query_body(&query.body, order_by, offset, fetch),
                }
            }
            ast::QueryBody::Set { op, lhs, rhs } => {
                let mut parts = vec![];
                self.set_parts(*op, lhs, &mut parts)?;
                self.set_parts(*op, rhs, &mut parts)?;

                let selections = parts[0].first_spec().select.clone();
                for part in &parts[1..] {
                    let len = part.first_spec().select.len();
                    if len != selections.len() {
                        return Err(Error::semantic(format!(
                            "`{}` operands select {} and {len} items",
                            op.as_str(),
                            selections.len()
                        )));
                    }
                }

                let order_by = order_by
                    .iter()
                    .map(|item| {
                        Ok(SqmSortSpec {
                            expr: group_sort_expr(&selections, &item.expr)?,
                            desc: item.desc,
                            nulls: item.nulls,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(SqmQueryPart::Group(Box::new(SqmQueryGroup {
                    op: *op,
                    parts,
                    order_by,
                    offset: offset.map(|expr| self.limit(expr)).transpose()?,
                    fetch: fetch.map(|expr| self.limit(expr)).transpose()?,
                })))
            }
        }
    }

    /// Flattens `a union b union c` into one group.
    fn set_parts(
        &mut self,
        op: SetOperator,
        body: &ast::QueryBody,
        parts: &mut Vec<SqmQueryPart>,
    ) -> Result<()> {
        match body {
            ast::QueryBody::Set { op: inner, lhs, rhs } if *inner == op => {
                self.set_parts(op, lhs, parts)?;
                self.set_parts(op, rhs, parts)
            }
            body => {
                parts.push(self.query_body(body, &[], None, None)?);
                Ok(())
            }
        }
    }

    fn spec(
        &mut self,
        spec: &ast::QuerySpec,
        order_by: &[ast::SortItem],
        offset: Option<&ast::Expr>,
        fetch: Option<&ast::Expr>,
    ) -> Result<SqmQuerySpec> {
        self.scoped(|b| {
            let mut out = SqmQuerySpec {
                distinct: spec.distinct,
                ..Default::default()
            };

            for root in &spec.from {
                let root = b.from_root(root)?;
                out.from.roots.push(root);
            }

            for item in &spec.select {
                let expr = b.expr(&item.expr)?;
                out.select.push(SqmSelection {
                    expr,
                    alias: item.alias.clone(),
                });
            }

            if out.select.is_empty() {
                let [root] = &out.from.roots[..] else {
                    return Err(Error::semantic(
                        "a query without a select clause must have exactly one root",
                    ));
                };
                out.select.push(SqmSelection {
                    expr: SqmExpr::Path(SqmPath::root(&root.from)),
                    alias: None,
                });
            }

            check_fetch_owners(&out)?;
            b.scope().selections = out.select.clone();

            out.where_ = spec.where_.as_ref().map(|p| b.predicate(p)).transpose()?;
            out.group_by = spec
                .group_by
                .iter()
                .map(|expr| b.expr(expr))
                .collect::<Result<_>>()?;
            out.having = spec.having.as_ref().map(|p| b.predicate(p)).transpose()?;

            out.order_by = order_by
                .iter()
                .map(|item| b.sort_item(item))
                .collect::<Result<_>>()?;
            out.offset = offset.map(|expr| b.limit(expr)).transpose()?;
            out.fetch = fetch.map(|expr| b.limit(expr)).transpose()?;

            Ok(out)
        })
    }

    fn sort_item(&mut self, item: &ast::SortItem) -> Result<SqmSortSpec> {
        // A bare name matching a selection alias sorts by that selection.
        let selected = match &item.expr {
            ast::Expr::Path(names) if names.len() == 1 && self.lookup_alias(&names[0]).is_none() => {
                self.scopes.last().and_then(|scope| {
                    scope
                        .selections
                        .iter()
                        .find(|s| {
                            s.alias
                                .as_deref()
                                .is_some_and(|alias| alias.eq_ignore_ascii_case(&names[0]))
                        })
                        .map(|s| s.expr.clone())
                })
            }
            _ => None,
        };

        let expr = match selected {
            Some(expr) => expr,
            None => self.expr(&item.expr)?,
        };

        Ok(SqmSortSpec {
            expr,
            desc: item.desc,
            nulls: item.nulls,
        })
    }

    fn limit(&mut self, expr: &ast::Expr) -> Result<SqmExpr> {
        let expr = self.expr(expr)?;
        if let Some(id) = expr.as_param() {
            self.params.infer(id, &Type::I64);
            return Ok(expr);
        }
        let ty = expr.ty();
        if !ty.is_unknown() && !ty.is_integer() {
            return Err(Error::semantic(format!(
                "offset and fetch require an integer, found {ty:?}"
            )));
        }
        Ok(expr)
    }

    fn cte(&mut self, cte: &ast::Cte) -> Result<CteId> {
        let declared = self
            .cte_names
            .last()
            .is_some_and(|names| names.iter().any(|(name, _)| *name == cte.name));
        if declared {
            return Err(Error::semantic(format!(
                "CTE `{}` is declared more than once",
                cte.name
            )));
        }

        let id = CteId(self.next_cte);
        self.next_cte += 1;

        if cte.query.references(&cte.name) {
            self.recursive_cte(id, cte)?;
        } else {
            let definition = self.query(&cte.query)?;
            let statement = match &cte.columns {
                Some(names) => {
                    SqmCteStatement::with_column_names(id, &cte.name, definition, names)?
                }
                None => SqmCteStatement::new(id, &cte.name, definition)?,
            };
            self.register_cte(statement);
        }

        let Some(statement) = self.ctes.get_mut(&id) else {
            crate::bail!("CTE `{}` was not registered", cte.name);
        };
        statement.materialization = cte.materialization;

        if (cte.search.is_some() || cte.cycle.is_some()) && !statement.recursive {
            return Err(Error::semantic(format!(
                "search and cycle clauses require a recursive CTE, but `{}` is not",
                cte.name
            )));
        }

        if let Some(search) = &cte.search {
            let items = search
                .items
                .iter()
                .map(|(column, desc, nulls)| Ok((statement.attribute(column)?, *desc, *nulls)))
                .collect::<Result<Vec<_>>>()?;
            statement.search(search.kind, &search.set_column, items)?;
        }

        if let Some(cycle) = &cte.cycle {
            let attributes = cycle
                .columns
                .iter()
                .map(|column| statement.attribute(column))
                .collect::<Result<Vec<_>>>()?;
            let (cycle_value, no_cycle_value) = match &cycle.values {
                Some((cycle_value, no_cycle_value)) => {
                    (literal_value(cycle_value), literal_value(no_cycle_value))
                }
                None => (Value::Bool(true), Value::Bool(false)),
            };
            statement.cycle(
                &cycle.mark_column,
                cycle.path_column.clone(),
                cycle_value,
                no_cycle_value,
                attributes,
            )?;
        }

        Ok(id)
    }

    /// `base union [all] recursive`. The CTE is registered with the base
    /// arm's columns before the recursive arm is bound, so the recursive
    /// arm can select from it.
    fn recursive_cte(&mut self, id: CteId, cte: &ast::Cte) -> Result<()> {
        if !cte.query.ctes.is_empty() {
            return Err(Error::not_yet_implemented("`with` inside a recursive CTE"));
        }
        if !cte.query.order_by.is_empty() || cte.query.offset.is_some() || cte.query.fetch.is_some() {
            return Err(Error::not_yet_implemented(
                "ordering or limiting the definition of a recursive CTE",
            ));
        }

        let ast::QueryBody::Set { op, lhs, rhs } = &cte.query.body else {
            return Err(Error::semantic(format!(
                "recursive CTE `{}` must combine a base query and a recursive query with `union`",
                cte.name
            )));
        };
        if !matches!(op, SetOperator::Union | SetOperator::UnionAll) {
            return Err(Error::semantic(format!(
                "recursive CTE `{}` must use `union` or `union all`, not `{}`",
                cte.name,
                op.as_str()
            )));
        }
        if lhs.references(&cte.name) {
            return Err(Error::semantic(format!(
                "the base query of recursive CTE `{}` must not reference it",
                cte.name
            )));
        }

        let base = SqmQuery {
            ctes: vec![],
            body: self.query_body(lhs, &[], None, None)?,
        };
        let mut statement = match &cte.columns {
            Some(names) => SqmCteStatement::with_column_names(id, &cte.name, base.clone(), names)?,
            None => SqmCteStatement::new(id, &cte.name, base.clone())?,
        };
        statement.recursive = true;
        self.register_cte(statement);

        let recursive = self.query_body(rhs, &[], None, None)?;
        let (base_len, recursive_len) = (
            base.first_spec().select.len(),
            recursive.first_spec().select.len(),
        );
        if base_len != recursive_len {
            return Err(Error::semantic(format!(
                "recursive CTE `{}` selects {base_len} items in its base query and {recursive_len} in its recursive query",
                cte.name
            )));
        }

        if let Some(statement) = self.ctes.get_mut(&id) {
            statement.definition = SqmQuery {
                ctes: vec![],
                body: SqmQueryPart::Group(Box::new(SqmQueryGroup {
                    op: *op,
                    parts: vec![base.body, recursive],
                    order_by: vec![],
                    offset: None,
                    fetch: None,
                })),
            };
        }
        Ok(())
    }

    fn register_cte(&mut self, statement: SqmCteStatement) {
        if let Some(names) = self.cte_names.last_mut() {
            names.push((statement.name.clone(), statement.id));
        }
        self.ctes.insert(statement.id, statement);
    }

    fn from_root(&mut self, root: &ast::FromRoot) -> Result<SqmRoot> {
        let (source, ty) = match &root.path[..] {
            [name] => self.named_source(name)?,
            // `from p.phones ph` in a correlated subquery
            names => {
                let path = self.path(names)?;
                FromSource::join_target(self.schema, &path)?
            }
        };
        let from = self.add_from(source, ty, root.alias.clone())?;

        let mut joins = vec![];
        for join in &root.joins {
            joins.push(self.join(join)?);
        }
        Ok(SqmRoot { from, joins })
    }

    fn join(&mut self, join: &ast::Join) -> Result<SqmJoin> {
        let (source, ty) = match &join.path[..] {
            [name] if self.lookup_alias(name).is_none() => self.named_source(name)?,
            names => {
                let path = self.path(names)?;
                FromSource::join_target(self.schema, &path)?
            }
        };

        if join.fetch && !source.is_attribute() {
            return Err(Error::semantic(format!(
                "`join fetch` requires an association, but `{}` is not one",
                join.path.join(".")
            )));
        }
        if join.fetch && join.on.is_some() {
            return Err(Error::semantic(
                "a fetched association cannot be restricted with `on`",
            ));
        }
        if join.kind == JoinKind::Cross && join.on.is_some() {
            return Err(Error::semantic("a cross join cannot have an `on` restriction"));
        }

        let from = self.add_from(source, ty, join.alias.clone())?;
        let on = join.on.as_ref().map(|p| self.predicate(p)).transpose()?;

        Ok(SqmJoin {
            from,
            kind: join.kind,
            fetch: join.fetch,
            on,
        })
    }

    /// A CTE in scope, or else an entity.
    fn named_source(&self, name: &str) -> Result<(FromSource, FromTy)> {
        if let Some(cte) = self.lookup_cte(name) {
            return Ok((FromSource::Cte(cte), FromTy::Cte(cte)));
        }
        let entity = self.entity(name)?;
        Ok((FromSource::Entity(entity), FromTy::Entity(entity)))
    }

    fn entity(&self, name: &str) -> Result<EntityId> {
        match self.schema.entity_by_name(name) {
            Some(entity) => Ok(entity.id),
            None => Err(Error::semantic(format!("could not resolve entity `{name}`"))),
        }
    }

    fn add_from(&mut self, source: FromSource, ty: FromTy, alias: Option<String>) -> Result<SqmFrom> {
        if let Some(alias) = &alias {
            let taken = self.scopes.last().is_some_and(|scope| {
                scope.froms.iter().any(|from| {
                    from.alias
                        .as_deref()
                        .is_some_and(|a| a.eq_ignore_ascii_case(alias))
                })
            });
            if taken {
                return Err(Error::semantic(format!(
                    "alias `{alias}` is declared more than once"
                )));
            }
        }

        let from = SqmFrom {
            id: FromId(self.next_from),
            alias,
            source,
            ty,
        };
        self.next_from += 1;
        self.scope().froms.push(from.clone());
        Ok(from)
    }

    /// Resolves `alias.a.b`, or an unqualified `a.b` against the from
    /// elements in scope, innermost first.
    fn path(&self, names: &[String]) -> Result<SqmPath> {
        let Some((first, rest)) = names.split_first() else {
            return Err(Error::semantic("empty path"));
        };

        if let Some(from) = self.lookup_alias(first) {
            return SqmPath::root(from).resolve_all(
                self.schema,
                &self.ctes,
                &from.ty,
                rest.iter().map(String::as_str),
            );
        }

        let mut first_error = None;
        for from in self.scopes.iter().rev().flat_map(|scope| &scope.froms) {
            match SqmPath::root(from).resolve_all(
                self.schema,
                &self.ctes,
                &from.ty,
                names.iter().map(String::as_str),
            ) {
                Ok(path) => return Ok(path),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| {
            Error::semantic(format!("could not resolve `{}`", names.join(".")))
        }))
    }

    fn expr(&mut self, expr: &ast::Expr) -> Result<SqmExpr> {
        match expr {
            ast::Expr::Path(names) => match self.path(names) {
                Ok(path) => Ok(SqmExpr::Path(path)),
                Err(err) => match &names[..] {
                    [name] if NILADIC.iter().any(|f| name.eq_ignore_ascii_case(f)) => {
                        self.function(name, vec![], false)
                    }
                    _ => Err(err),
                },
            },
            ast::Expr::Literal(literal) => Ok(SqmExpr::Literal(literal_value(literal))),
            ast::Expr::NamedParam(name) => self.named_param(name),
            ast::Expr::PositionalParam(position) => {
                if self.filter.is_some() {
                    return Err(Error::semantic(format!(
                        "filter conditions take named parameters only, found `?{position}`"
                    )));
                }
                let id = self.params.positional(*position)?;
                Ok(SqmExpr::Param(SqmParamRef { id }))
            }
            ast::Expr::Function {
                name,
                args,
                distinct,
            } => {
                let args = args
                    .iter()
                    .map(|arg| self.expr(arg))
                    .collect::<Result<Vec<_>>>()?;
                self.function(name, args, *distinct)
            }
            ast::Expr::CountStar => Ok(SqmExpr::CountStar),
            ast::Expr::Arithmetic { lhs, op, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                for operand in [&lhs, &rhs] {
                    let ty = operand.ty();
                    if !ty.is_unknown() && !ty.is_numeric() {
                        return Err(Error::semantic(format!(
                            "`{}` requires numeric operands, found {ty:?}",
                            op.as_str()
                        )));
                    }
                }
                if let Some(id) = lhs.as_param() {
                    self.params.infer(id, &rhs.ty());
                }
                if let Some(id) = rhs.as_param() {
                    self.params.infer(id, &lhs.ty());
                }
                Ok(SqmExpr::Arithmetic(SqmArithmetic::new(lhs, *op, rhs)))
            }
            ast::Expr::Concat(lhs, rhs) => {
                let args = vec![self.expr(lhs)?, self.expr(rhs)?];
                for arg in &args {
                    if let Some(id) = arg.as_param() {
                        self.params.infer(id, &Type::String);
                    }
                }
                self.function("concat", args, false)
            }
            ast::Expr::Negate(expr) => Ok(SqmExpr::Negate(Box::new(self.expr(expr)?))),
            ast::Expr::Case { whens, otherwise } => {
                let mut ty = Type::Unknown;
                let mut out = vec![];
                for (when, then) in whens {
                    let when = self.predicate(when)?;
                    let then = self.expr(then)?;
                    ty = ty.unify(&then.ty());
                    out.push((when, then));
                }
                let otherwise = match otherwise {
                    Some(expr) => {
                        let expr = self.expr(expr)?;
                        ty = ty.unify(&expr.ty());
                        Some(Box::new(expr))
                    }
                    None => None,
                };
                Ok(SqmExpr::Case(SqmCase {
                    whens: out,
                    otherwise,
                    ty,
                }))
            }
            ast::Expr::Tuple(items) => Ok(SqmExpr::Tuple(
                items
                    .iter()
                    .map(|item| self.expr(item))
                    .collect::<Result<_>>()?,
            )),
            ast::Expr::Subquery(query) => {
                let query = self.query(query)?;
                let mut tys = query.selection_tys();
                let ty = if tys.len() == 1 {
                    tys.remove(0)
                } else {
                    Type::Record(tys)
                };
                Ok(SqmExpr::Subquery {
                    query: Box::new(query),
                    ty,
                })
            }
        }
    }

    fn function(&self, name: &str, args: Vec<SqmExpr>, distinct: bool) -> Result<SqmExpr> {
        match self.functions {
            Some(functions) => Ok(SqmExpr::Function(functions.resolve(name, args, distinct)?)),
            None => Ok(SqmExpr::Function(SqmFunction {
                name: name.to_ascii_lowercase(),
                args,
                distinct,
                ty: Type::Unknown,
            })),
        }
    }

    fn named_param(&mut self, name: &str) -> Result<SqmExpr> {
        let Some(filter) = &self.filter else {
            let id = self.params.named(name)?;
            return Ok(SqmExpr::Param(SqmParamRef { id }));
        };

        let Some(ty) = filter.def.param_ty(name) else {
            return Err(Error::semantic(format!(
                "filter `{}` declares no parameter `{name}`",
                filter.def.name
            )));
        };

        let id = match filter.values {
            Some(values) => {
                let Some(value) = values.get(name) else {
                    return Err(Error::illegal_argument(format!(
                        "parameter `{name}` of filter `{}` is not set",
                        filter.def.name
                    )));
                };
                let value = match value {
                    Value::List(_) => value.clone(),
                    value => ty.cast(value.clone())?,
                };
                self.params.value(value, ty.clone())
            }
            None => {
                let ty = ty.clone();
                let id = self.params.named(name)?;
                self.params.infer(id, &ty);
                id
            }
        };
        Ok(SqmExpr::Param(SqmParamRef { id }))
    }

    fn predicate(&mut self, predicate: &ast::Predicate) -> Result<SqmPredicate> {
        match predicate {
            ast::Predicate::Comparison { lhs, op, rhs } => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                SqmPredicate::comparison(lhs, *op, rhs, &mut self.params)
            }
            ast::Predicate::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let expr = self.expr(expr)?;
                let low = self.expr(low)?;
                let high = self.expr(high)?;
                SqmPredicate::between(expr, low, high, *negated, &mut self.params)
            }
            ast::Predicate::InList {
                expr,
                list,
                negated,
            } => {
                let expr = self.expr(expr)?;
                let list = list
                    .iter()
                    .map(|item| self.expr(item))
                    .collect::<Result<Vec<_>>>()?;
                SqmPredicate::in_list(expr, list, *negated, &mut self.params)
            }
            ast::Predicate::InSubquery {
                expr,
                query,
                negated,
            } => {
                let expr = self.expr(expr)?;
                let query = self.query(query)?;
                let [ty] = &query.selection_tys()[..] else {
                    return Err(Error::semantic(
                        "a subquery on the right of `in` must select exactly one item",
                    ));
                };
                match expr.as_param() {
                    Some(id) => self.params.infer(id, ty),
                    None if !expr.ty().is_comparable_with(ty) => {
                        return Err(Error::semantic(format!(
                            "cannot compare {:?} with {ty:?}",
                            expr.ty()
                        )))
                    }
                    None => {}
                }
                Ok(SqmPredicate::InSubquery {
                    expr,
                    query: Box::new(query),
                    negated: *negated,
                })
            }
            ast::Predicate::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                let expr = self.expr(expr)?;
                let pattern = self.expr(pattern)?;
                SqmPredicate::like(expr, pattern, *escape, *negated, &mut self.params)
            }
            ast::Predicate::IsNull { expr, negated } => Ok(SqmPredicate::IsNull {
                expr: self.expr(expr)?,
                negated: *negated,
            }),
            ast::Predicate::IsEmpty { path, negated } => {
                let path = self.path(path)?;
                if !path.is_plural() {
                    return Err(Error::semantic(
                        "`is empty` requires a collection-valued path",
                    ));
                }
                Ok(SqmPredicate::IsEmpty {
                    path,
                    negated: *negated,
                })
            }
            ast::Predicate::And(predicates) => Ok(SqmPredicate::and(
                predicates
                    .iter()
                    .map(|p| self.predicate(p))
                    .collect::<Result<_>>()?,
            )),
            ast::Predicate::Or(predicates) => Ok(SqmPredicate::or(
                predicates
                    .iter()
                    .map(|p| self.predicate(p))
                    .collect::<Result<_>>()?,
            )),
            ast::Predicate::Not(predicate) => {
                Ok(SqmPredicate::Not(Box::new(self.predicate(predicate)?)))
            }
            ast::Predicate::Exists(query) => Ok(SqmPredicate::Exists {
                query: Box::new(self.query(query)?),
                negated: false,
            }),
            ast::Predicate::Expr(expr) => {
                let expr = self.expr(expr)?;
                if let Some(id) = expr.as_param() {
                    self.params.infer(id, &Type::Bool);
                }
                match expr.ty() {
                    Type::Bool => {}
                    ty if ty.is_unknown() => {}
                    ty => {
                        return Err(Error::semantic(format!(
                            "expected a boolean expression, found {ty:?}"
                        )))
                    }
                }
                Ok(SqmPredicate::Boolean(expr))
            }
        }
    }

    fn update(mut self, update: &ast::Update) -> Result<SqmStatement> {
        let entity = self.entity(&update.entity)?;
        let (target, assignments, where_) = self.scoped(|b| {
            let target = b.add_from(
                FromSource::Entity(entity),
                FromTy::Entity(entity),
                update.alias.clone(),
            )?;

            let mut assignments = vec![];
            for (path, value) in &update.assignments {
                let path = b.path(path)?;
                let value = b.expr(value)?;
                b.check_assignment(&path, &value)?;
                assignments.push(SqmAssignment { path, value });
            }

            let where_ = update.where_.as_ref().map(|p| b.predicate(p)).transpose()?;
            Ok((target, assignments, where_))
        })?;

        Ok(SqmStatement::Update(SqmUpdateStatement {
            target,
            assignments,
            where_,
            params: self.params,
        }))
    }

    fn delete(mut self, delete: &ast::Delete) -> Result<SqmStatement> {
        let entity = self.entity(&delete.entity)?;
        let (target, where_) = self.scoped(|b| {
            let target = b.add_from(
                FromSource::Entity(entity),
                FromTy::Entity(entity),
                delete.alias.clone(),
            )?;
            let where_ = delete.where_.as_ref().map(|p| b.predicate(p)).transpose()?;
            Ok((target, where_))
        })?;

        Ok(SqmStatement::Delete(SqmDeleteStatement {
            target,
            where_,
            params: self.params,
        }))
    }

    fn insert(mut self, insert: &ast::Insert) -> Result<SqmStatement> {
        let entity = self.entity(&insert.entity)?;
        let (target, paths) = self.scoped(|b| {
            let target = b.add_from(FromSource::Entity(entity), FromTy::Entity(entity), None)?;
            let paths = insert
                .paths
                .iter()
                .map(|path| b.path(path))
                .collect::<Result<Vec<_>>>()?;
            Ok((target, paths))
        })?;

        let source = match &insert.source {
            ast::InsertSource::Values(rows) => {
                let mut out = vec![];
                for row in rows {
                    if row.len() != paths.len() {
                        return Err(Error::semantic(format!(
                            "insert names {} attributes but a row supplies {} values",
                            paths.len(),
                            row.len()
                        )));
                    }
                    let mut values = vec![];
                    for (path, value) in paths.iter().zip(row) {
                        let value = self.expr(value)?;
                        self.check_assignment(path, &value)?;
                        values.push(value);
                    }
                    out.push(values);
                }
                SqmInsertSource::Values(out)
            }
            ast::InsertSource::Query(query) => {
                let query = self.query(query)?;
                let tys = query.selection_tys();
                if tys.len() != paths.len() {
                    return Err(Error::semantic(format!(
                        "insert names {} attributes but its query selects {}",
                        paths.len(),
                        tys.len()
                    )));
                }
                SqmInsertSource::Select(query)
            }
        };

        Ok(SqmStatement::Insert(SqmInsertStatement {
            target,
            paths,
            source,
            params: self.params,
        }))
    }

    fn check_assignment(&mut self, path: &SqmPath, value: &SqmExpr) -> Result<()> {
        if path.is_plural() {
            return Err(Error::semantic(
                "collection-valued attributes cannot be assigned",
            ));
        }
        if let Some(id) = value.as_param() {
            self.params.infer(id, &path.ty);
            return Ok(());
        }
        let ty = value.ty();
        if !path.ty.is_comparable_with(&ty) {
            return Err(Error::semantic(format!(
                "cannot assign {ty:?} to an attribute of type {:?}",
                path.ty
            )));
        }
        Ok(())
    }

    fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.scopes.push(Scope::default());
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn scope(&mut self) -> &mut Scope {
        if self.scopes.is_empty() {
            self.scopes.push(Scope::default());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn lookup_alias(&self, name: &str) -> Option<&SqmFrom> {
        self.scopes.iter().rev().flat_map(|scope| &scope.froms).find(|from| {
            from.alias
                .as_deref()
                .is_some_and(|alias| alias.eq_ignore_ascii_case(name))
        })
    }

    fn lookup_cte(&self, name: &str) -> Option<CteId> {
        self.cte_names
            .iter()
            .rev()
            .flatten()
            .find(|(cte, _)| cte.eq_ignore_ascii_case(name))
            .map(|(_, id)| *id)
    }
}

impl CteColumns for IndexMap<CteId, SqmCteStatement> {
    fn cte_column(&self, cte: CteId, name: &str) -> Option<(usize, Type)> {
        self.get(&cte)?.column(name)
    }

    fn cte_name(&self, cte: CteId) -> String {
        self.get(&cte).map(|cte| cte.name.clone()).unwrap_or_default()
    }
}

fn literal_value(literal: &ast::Literal) -> Value {
    match literal {
        ast::Literal::Integer(v) => Value::I64(*v),
        ast::Literal::Decimal(v) => Value::F64(*v),
        ast::Literal::String(v) => Value::String(v.clone()),
        ast::Literal::Bool(v) => Value::Bool(*v),
        ast::Literal::Null => Value::Null,
    }
}

/// Sort keys of a set operation name a selection of the first operand, by
/// alias or by 1-based position.
fn group_sort_expr(selections: &[SqmSelection], expr: &ast::Expr) -> Result<SqmExpr> {
    let found = match expr {
        ast::Expr::Path(names) if names.len() == 1 => selections.iter().find(|s| {
            s.alias
                .as_deref()
                .is_some_and(|alias| alias.eq_ignore_ascii_case(&names[0]))
        }),
        ast::Expr::Literal(ast::Literal::Integer(position)) if *position >= 1 => {
            usize::try_from(*position - 1)
                .ok()
                .and_then(|index| selections.get(index))
        }
        _ => None,
    };

    match found {
        Some(selection) => Ok(selection.expr.clone()),
        None => Err(Error::semantic(
            "`order by` of a set operation must name a selection alias or position",
        )),
    }
}

/// The owner of every fetched association must itself be selected or
/// fetched.
fn check_fetch_owners(spec: &SqmQuerySpec) -> Result<()> {
    let selected = |id: FromId| {
        spec.select.iter().any(|selection| {
            selection
                .expr
                .as_path()
                .is_some_and(|path| path.is_root() && path.from == id)
        })
    };

    for root in &spec.from.roots {
        for join in root.joins.iter().filter(|join| join.fetch) {
            let mut owner = match &join.from.source {
                FromSource::Attribute { lhs, .. } => *lhs,
                _ => continue,
            };
            loop {
                if selected(owner) {
                    break;
                }
                let parent = root
                    .joins
                    .iter()
                    .find(|j| j.from.id == owner && j.fetch)
                    .and_then(|j| match &j.from.source {
                        FromSource::Attribute { lhs, .. } => Some(*lhs),
                        _ => None,
                    });
                match parent {
                    Some(lhs) => owner = lhs,
                    None => {
                        return Err(Error::semantic(format!(
                            "query specified join fetching, but the owner of the fetched association `{}` is not selected",
                            join.from.alias.as_deref().unwrap_or("<unnamed>")
                        )))
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::{interpret, parser::Parser};
    use super::*;
    use crate::driver::Dialect;
    use crate::schema::{AttributeDef, EntityDef, FilterDef};
    use pretty_assertions::assert_eq;

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder
            .filter(FilterDef::new("byName").param("name", Type::String))
            .entity(
                EntityDef::new("Person")
                    .id("id", Type::I64)
                    .basic("name", Type::String)
                    .basic("age", Type::I32)
                    .attribute(AttributeDef::many_to_one("employer", "Company"))
                    .attribute(AttributeDef::one_to_many("phones", "Phone").mapped_by("person"))
                    .filter("byName", Some("name = :name")),
            )
            .entity(
                EntityDef::new("Phone")
                    .id("id", Type::I64)
                    .basic("number", Type::String)
                    .attribute(AttributeDef::many_to_one("person", "Person")),
            )
            .entity(
                EntityDef::new("Company")
                    .id("id", Type::I64)
                    .basic("name", Type::String),
            )
            .entity(
                EntityDef::new("Category")
                    .id("id", Type::I64)
                    .basic("name", Type::String)
                    .attribute(AttributeDef::many_to_one("parent", "Category")),
            );
        builder.build().unwrap()
    }

    fn select(schema: &Schema, src: &str) -> Result<SqmSelectStatement> {
        let functions = FunctionRegistry::new(Dialect::Sqlite);
        let stmt = interpret(schema, &functions, src)?;
        Ok(stmt.into_select().expect("select statement"))
    }

    #[test]
    fn named_parameter_takes_type_from_comparison() {
        let schema = schema();
        let stmt = select(&schema, "select p from Person p where p.name = :name").unwrap();

        let name = stmt.params.lookup(&"name".into()).unwrap();
        assert_eq!(name.ty, Type::String);
        assert!(stmt.query.first_spec().select[0]
            .expr
            .as_path()
            .unwrap()
            .is_root());
    }

    #[test]
    fn unqualified_names_resolve_against_root() {
        let schema = schema();
        let stmt = select(&schema, "from Person where age > 18 and name like 'A%'").unwrap();
        assert!(stmt.query.first_spec().where_.is_some());
    }

    #[test]
    fn unknown_attribute() {
        let schema = schema();
        let err = select(&schema, "select p.nme from Person p").unwrap_err();
        assert!(err.is_semantic());
        assert_eq!(
            err.to_string(),
            "semantic error: could not resolve attribute `nme` of `Person`"
        );
    }

    #[test]
    fn fetch_join_owner_must_be_selected() {
        let schema = schema();
        let err = select(&schema, "select ph from Person p join fetch p.phones ph").unwrap_err();
        assert!(err.is_semantic());

        select(&schema, "select p from Person p join fetch p.phones ph").unwrap();
    }

    #[test]
    fn order_by_selection_alias() {
        let schema = schema();
        let stmt =
            select(&schema, "select p.name as n from Person p order by n desc").unwrap();
        let spec = stmt.query.first_spec();
        assert_eq!(spec.order_by[0].expr, spec.select[0].expr);
        assert!(spec.order_by[0].desc);
    }

    #[test]
    fn niladic_function_without_parentheses() {
        let schema = schema();
        let stmt = select(&schema, "select current_date from Person p").unwrap();
        assert!(matches!(
            &stmt.query.first_spec().select[0].expr,
            SqmExpr::Function(f) if f.name == "current_date"
        ));
    }

    #[test]
    fn unknown_function() {
        let schema = schema();
        let err = select(&schema, "select frobnicate(p.name) from Person p").unwrap_err();
        assert!(err.is_semantic());
    }

    #[test]
    fn mixing_parameter_styles_is_rejected() {
        let schema = schema();
        let err = select(&schema, "from Person p where p.name = :n and p.age = ?1").unwrap_err();
        assert!(err.is_semantic());
    }

    #[test]
    fn set_operands_must_select_the_same_number_of_items() {
        let schema = schema();
        let err = select(
            &schema,
            "select p.id from Person p union select c.id, c.name from Company c",
        )
        .unwrap_err();
        assert!(err.is_semantic());
    }

    #[test]
    fn recursive_cte_with_search_and_cycle() {
        let schema = schema();
        let stmt = select(
            &schema,
            "with tree as (
                select c.id as id, c.parent as parent from Category c where c.parent is null
                union all
                select c.id as id, c.parent as parent from Category c join tree t on c.parent.id = t.id
             ) search depth first by id set ord
               cycle id set looped
             select t.id, t.looped from tree t order by t.ord",
        )
        .unwrap();

        let cte = &stmt.query.ctes[0];
        assert!(cte.recursive);
        assert_eq!(
            cte.all_columns()
                .into_iter()
                .map(|c| c.name)
                .collect::<Vec<_>>(),
            ["id", "parent", "ord", "looped"]
        );
        assert!(matches!(
            cte.definition.body,
            SqmQueryPart::Group(ref group) if group.op == SetOperator::UnionAll
        ));
        assert_eq!(stmt.query.selection_tys(), [Type::I64, Type::Bool]);
    }

    #[test]
    fn search_on_unknown_cte_column_is_illegal() {
        let schema = schema();
        let err = select(
            &schema,
            "with tree as (
                select c.id as id from Category c where c.parent is null
                union all
                select c.id as id from Category c join tree t on c.parent.id = t.id
             ) search breadth first by nope set ord
             select t.id from tree t",
        )
        .unwrap_err();
        assert!(err.is_illegal_argument());
    }

    #[test]
    fn update_infers_assignment_parameter() {
        let schema = schema();
        let functions = FunctionRegistry::new(Dialect::Sqlite);
        let stmt = interpret(
            &schema,
            &functions,
            "update Person p set p.age = :age where p.id = :id",
        )
        .unwrap();
        assert_eq!(stmt.params().lookup(&"age".into()).unwrap().ty, Type::I32);
    }

    #[test]
    fn filter_condition_binds_values() {
        let schema = schema();
        let functions = FunctionRegistry::new(Dialect::Sqlite);
        let person = schema.entity_by_name("Person").unwrap();
        let from = SqmFrom {
            id: FromId(0),
            alias: Some("p".into()),
            source: FromSource::Entity(person.id),
            ty: FromTy::Entity(person.id),
        };

        let mut values = IndexMap::new();
        values.insert("name".to_string(), Value::from("Ann"));

        let condition = Parser::new(&person.filters[0].condition)
            .unwrap()
            .parse_condition()
            .unwrap();
        let mut builder = SemanticBuilder::new(&schema, Some(&functions))
            .with_next_from(1)
            .with_filter(FilterParams {
                def: schema.app.filter("byName").unwrap(),
                values: Some(&values),
            });
        builder.condition(&from, &condition).unwrap();

        let params = builder.into_params();
        let param = params.iter().next().unwrap();
        assert_eq!(param.kind, ParamKind::Value(Value::from("Ann")));
        assert_eq!(param.ty, Type::String);
    }
}
