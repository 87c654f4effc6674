#![allow(unused_variables)]

use super::*;
use quarry_core::sqm::ParamId;

pub trait VisitMut {
    fn visit_statement_mut(&mut self, i: &mut Statement) {
        visit_statement_mut(self, i);
    }

    fn visit_select_mut(&mut self, i: &mut SelectStatement) {
        visit_select_mut(self, i);
    }

    fn visit_query_part_mut(&mut self, i: &mut QueryPart) {
        visit_query_part_mut(self, i);
    }

    fn visit_query_spec_mut(&mut self, i: &mut QuerySpec) {
        visit_query_spec_mut(self, i);
    }

    fn visit_table_group_mut(&mut self, i: &mut TableGroup) {
        visit_table_group_mut(self, i);
    }

    fn visit_table_reference_mut(&mut self, i: &mut TableReference) {
        visit_table_reference_mut(self, i);
    }

    fn visit_expr_mut(&mut self, i: &mut Expr) {
        visit_expr_mut(self, i);
    }

    fn visit_predicate_mut(&mut self, i: &mut Predicate) {
        visit_predicate_mut(self, i);
    }

    fn visit_param_mut(&mut self, i: &mut JdbcParameter) {}
}

pub fn visit_statement_mut<V>(v: &mut V, node: &mut Statement)
where
    V: VisitMut + ?Sized,
{
    match node {
        Statement::Select(stmt) => v.visit_select_mut(stmt),
        Statement::Insert(stmt) => {
            match &mut stmt.source {
                InsertSource::Values(rows) => {
                    for expr in rows.iter_mut().flatten() {
                        v.visit_expr_mut(expr);
                    }
                }
                InsertSource::Select(query) => v.visit_select_mut(query),
            }
        }
        Statement::Update(stmt) => {
            for assignment in &mut stmt.assignments {
                v.visit_expr_mut(&mut assignment.value);
            }
            if let Some(where_) = &mut stmt.where_ {
                v.visit_predicate_mut(where_);
            }
        }
        Statement::Delete(stmt) => {
            if let Some(where_) = &mut stmt.where_ {
                v.visit_predicate_mut(where_);
            }
        }
        Statement::CreateTable(_) => {}
    }
}

pub fn visit_select_mut<V>(v: &mut V, node: &mut SelectStatement)
where
    V: VisitMut + ?Sized,
{
    if let Some(with) = &mut node.with {
        for cte in &mut with.ctes {
            v.visit_select_mut(&mut cte.query);
        }
    }
    v.visit_query_part_mut(&mut node.body);
}

pub fn visit_query_part_mut<V>(v: &mut V, node: &mut QueryPart)
where
    V: VisitMut + ?Sized,
{
    match node {
        QueryPart::Spec(spec) => v.visit_query_spec_mut(spec),
        QueryPart::Group(group) => {
            for part in &mut group.parts {
                v.visit_query_part_mut(part);
            }
            for sort in &mut group.order_by {
                v.visit_expr_mut(&mut sort.expr);
            }
            if let Some(offset) = &mut group.offset {
                v.visit_expr_mut(offset);
            }
            if let Some(fetch) = &mut group.fetch {
                v.visit_expr_mut(fetch);
            }
        }
    }
}

/// Clauses are visited in the order they are rendered.
pub fn visit_query_spec_mut<V>(v: &mut V, node: &mut QuerySpec)
where
    V: VisitMut + ?Sized,
{
    for item in &mut node.select {
        v.visit_expr_mut(&mut item.expr);
    }
    for group in &mut node.from {
        v.visit_table_group_mut(group);
    }
    if let Some(where_) = &mut node.where_ {
        v.visit_predicate_mut(where_);
    }
    for expr in &mut node.group_by {
        v.visit_expr_mut(expr);
    }
    if let Some(having) = &mut node.having {
        v.visit_predicate_mut(having);
    }
    for sort in &mut node.order_by {
        v.visit_expr_mut(&mut sort.expr);
    }
    if let Some(offset) = &mut node.offset {
        v.visit_expr_mut(offset);
    }
    if let Some(fetch) = &mut node.fetch {
        v.visit_expr_mut(fetch);
    }
}

pub fn visit_table_group_mut<V>(v: &mut V, node: &mut TableGroup)
where
    V: VisitMut + ?Sized,
{
    v.visit_table_reference_mut(&mut node.primary);
    for join in &mut node.table_joins {
        v.visit_table_reference_mut(&mut join.table);
        v.visit_predicate_mut(&mut join.on);
    }
    for join in &mut node.group_joins {
        v.visit_table_group_mut(&mut join.group);
        if let Some(on) = &mut join.on {
            v.visit_predicate_mut(on);
        }
    }
}

pub fn visit_table_reference_mut<V>(v: &mut V, node: &mut TableReference)
where
    V: VisitMut + ?Sized,
{
    match node {
        TableReference::Table { .. } => {}
        TableReference::Derived { query, .. } => v.visit_select_mut(query),
    }
}

pub fn visit_expr_mut<V>(v: &mut V, node: &mut Expr)
where
    V: VisitMut + ?Sized,
{
    match node {
        Expr::Column(_) | Expr::Literal(_) | Expr::CountStar | Expr::Fragment(_) => {}
        Expr::Param(param) => v.visit_param_mut(param),
        Expr::Function(function) => {
            for arg in &mut function.args {
                v.visit_expr_mut(arg);
            }
        }
        Expr::Arithmetic { lhs, rhs, .. } => {
            v.visit_expr_mut(lhs);
            v.visit_expr_mut(rhs);
        }
        Expr::Negate(expr) => v.visit_expr_mut(expr),
        Expr::Case { whens, otherwise } => {
            for (when, then) in whens {
                v.visit_predicate_mut(when);
                v.visit_expr_mut(then);
            }
            if let Some(otherwise) = otherwise {
                v.visit_expr_mut(otherwise);
            }
        }
        Expr::Tuple(items) => {
            for item in items {
                v.visit_expr_mut(item);
            }
        }
        Expr::Subquery(query) => v.visit_select_mut(query),
    }
}

pub fn visit_predicate_mut<V>(v: &mut V, node: &mut Predicate)
where
    V: VisitMut + ?Sized,
{
    match node {
        Predicate::Comparison { lhs, rhs, .. } => {
            v.visit_expr_mut(lhs);
            v.visit_expr_mut(rhs);
        }
        Predicate::Between {
            expr, low, high, ..
        } => {
            v.visit_expr_mut(expr);
            v.visit_expr_mut(low);
            v.visit_expr_mut(high);
        }
        Predicate::InList { expr, list, .. } => {
            v.visit_expr_mut(expr);
            for item in list {
                v.visit_expr_mut(item);
            }
        }
        Predicate::InSubquery { expr, query, .. } => {
            v.visit_expr_mut(expr);
            v.visit_select_mut(query);
        }
        Predicate::Like { expr, pattern, .. } => {
            v.visit_expr_mut(expr);
            v.visit_expr_mut(pattern);
        }
        Predicate::IsNull { expr, .. } => v.visit_expr_mut(expr),
        Predicate::Junction { predicates, .. } => {
            for predicate in predicates {
                v.visit_predicate_mut(predicate);
            }
        }
        Predicate::Not(predicate) => v.visit_predicate_mut(predicate),
        Predicate::Exists { query, .. } => v.visit_select_mut(query),
        Predicate::Boolean(expr) => v.visit_expr_mut(expr),
    }
}

/// Calls `f` on every parameter of the statement.
pub fn for_each_param_mut<F>(node: &mut Statement, f: F)
where
    F: FnMut(&mut JdbcParameter),
{
    struct ForEach<F> {
        f: F,
    }

    impl<F> VisitMut for ForEach<F>
    where
        F: FnMut(&mut JdbcParameter),
    {
        fn visit_param_mut(&mut self, node: &mut JdbcParameter) {
            (self.f)(node);
        }
    }

    ForEach { f }.visit_statement_mut(node);
}

/// Expands multi-valued query parameters in `in` lists into one slot per
/// bound element. `len_of` reports the number of elements bound to a
/// parameter, or `None` when it is single-valued.
pub fn expand_list_params<F>(node: &mut Statement, len_of: F)
where
    F: FnMut(ParamId) -> Option<usize>,
{
    struct Expand<F> {
        len_of: F,
    }

    impl<F> VisitMut for Expand<F>
    where
        F: FnMut(ParamId) -> Option<usize>,
    {
        fn visit_predicate_mut(&mut self, node: &mut Predicate) {
            if let Predicate::InList { list, .. } = node {
                if let [Expr::Param(JdbcParameter::Query {
                    id,
                    ty,
                    element: None,
                })] = &list[..]
                {
                    if let Some(len) = (self.len_of)(*id) {
                        let (id, ty) = (*id, ty.clone());
                        *list = (0..len)
                            .map(|i| {
                                Expr::Param(JdbcParameter::Query {
                                    id,
                                    ty: ty.clone(),
                                    element: Some(i),
                                })
                            })
                            .collect();
                    }
                }
            }
            visit_predicate_mut(self, node);
        }
    }

    Expand { len_of }.visit_statement_mut(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::stmt::{Type, Value};

    fn select_where(where_: Predicate) -> Statement {
        let mut spec = QuerySpec::default();
        spec.select.push(SelectItem::new(Expr::column("p1", "id")));
        spec.from
            .push(TableGroup::new(TableReference::table("person", "p1")));
        spec.where_ = Some(where_);
        Statement::Select(SelectStatement::spec(spec))
    }

    #[test]
    fn expands_multi_valued_parameter() {
        let mut stmt = select_where(Predicate::in_list(
            Expr::column("p1", "id"),
            vec![Expr::Param(JdbcParameter::query(ParamId(0), Type::I64))],
        ));

        expand_list_params(&mut stmt, |id| (id == ParamId(0)).then_some(3));

        let mut elements = vec![];
        for_each_param_mut(&mut stmt, |param| {
            if let JdbcParameter::Query { element, .. } = param {
                elements.push(*element);
            }
        });
        assert_eq!(elements, [Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn single_valued_parameter_is_left_alone() {
        let mut stmt = select_where(Predicate::eq(
            Expr::column("p1", "id"),
            JdbcParameter::Value(Value::I64(1)),
        ));
        let before = stmt.clone();
        expand_list_params(&mut stmt, |_| Some(2));
        assert_eq!(stmt, before);
    }
}
