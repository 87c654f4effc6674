//! Diagnostic dump of a SQL tree.
//!
//! Every leaf is rendered on its own against a throwaway parameter sink, so
//! printing never changes the parameters bound for execution. A subtree that
//! fails to render is logged and replaced by a marker; the rest of the dump
//! is still produced.

use crate::{
    ast::{
        Expr, InsertSource, JdbcParameter, Predicate, QueryPart, QuerySpec, SelectStatement,
        Statement, TableGroup, TableReference,
    },
    serializer::{Params, Placeholder, Serializer},
};

use quarry_core::Result;
use std::fmt::Write;
use tracing::{debug, warn};

pub struct SqlTreePrinter<'a> {
    serializer: &'a Serializer,
    buf: String,
    depth: usize,
}

/// Counts parameters without keeping them.
#[derive(Default)]
struct Discard(usize);

impl Params for Discard {
    fn push(&mut self, _param: &JdbcParameter) -> Placeholder {
        self.0 += 1;
        Placeholder(self.0)
    }
}

impl<'a> SqlTreePrinter<'a> {
    /// Logs the tree of `stmt` at debug level.
    pub fn log(serializer: &Serializer, stmt: &Statement) {
        if !tracing::enabled!(target: "quarry::sql_ast", tracing::Level::DEBUG) {
            return;
        }
        let dump = SqlTreePrinter::print(serializer, stmt);
        debug!(target: "quarry::sql_ast", "SQL AST tree:\n{dump}");
    }

    pub fn print(serializer: &Serializer, stmt: &Statement) -> String {
        let mut printer = SqlTreePrinter {
            serializer,
            buf: String::new(),
            depth: 0,
        };
        printer.statement(stmt);
        printer.buf
    }

    fn statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Select(select) => self.select(select),
            Statement::Insert(insert) => {
                self.node(&format!("InsertStatement ({})", insert.table), |p| {
                    p.line(&format!("columns: {}", insert.columns.join(", ")));
                    match &insert.source {
                        InsertSource::Values(rows) => {
                            for row in rows {
                                p.node("values", |p| {
                                    for expr in row {
                                        p.expr(expr);
                                    }
                                });
                            }
                        }
                        InsertSource::Select(query) => p.select(query),
                    }
                    if !insert.returning.is_empty() {
                        p.line(&format!("returning: {}", insert.returning.join(", ")));
                    }
                });
            }
            Statement::Update(update) => {
                self.node(&format!("UpdateStatement ({})", update.table), |p| {
                    for assignment in &update.assignments {
                        p.labeled(&format!("set {}", assignment.column), |s, d| {
                            s.serialize_expr(&assignment.value, d)
                        });
                    }
                    if let Some(where_) = &update.where_ {
                        p.predicate("where", where_);
                    }
                });
            }
            Statement::Delete(delete) => {
                self.node(&format!("DeleteStatement ({})", delete.table), |p| {
                    if let Some(where_) = &delete.where_ {
                        p.predicate("where", where_);
                    }
                });
            }
            Statement::CreateTable(create) => {
                self.line(&format!("CreateTable ({})", create.name));
            }
        }
    }

    fn select(&mut self, select: &SelectStatement) {
        self.node("SelectStatement", |p| {
            if let Some(with) = &select.with {
                for cte in &with.ctes {
                    p.node(&format!("cte {}({})", cte.name, cte.columns.join(", ")), |p| {
                        p.select(&cte.query)
                    });
                }
            }
            p.query_part(&select.body);
            if let Some(lock) = select.lock {
                p.line(&format!("lock: {lock:?}"));
            }
        });
    }

    fn query_part(&mut self, part: &QueryPart) {
        match part {
            QueryPart::Spec(spec) => self.query_spec(spec),
            QueryPart::Group(group) => {
                self.node(&format!("QueryGroup ({:?})", group.op), |p| {
                    for part in &group.parts {
                        p.query_part(part);
                    }
                    for sort in &group.order_by {
                        p.expr_labeled("order by", &sort.expr);
                    }
                });
            }
        }
    }

    fn query_spec(&mut self, spec: &QuerySpec) {
        self.node("QuerySpec", |p| {
            p.node("select", |p| {
                for item in &spec.select {
                    p.expr(&item.expr);
                }
            });
            if !spec.from.is_empty() {
                p.node("from", |p| {
                    for group in &spec.from {
                        p.table_group(group);
                    }
                });
            }
            if let Some(where_) = &spec.where_ {
                p.predicate("where", where_);
            }
            for expr in &spec.group_by {
                p.expr_labeled("group by", expr);
            }
            if let Some(having) = &spec.having {
                p.predicate("having", having);
            }
            for sort in &spec.order_by {
                p.expr_labeled("order by", &sort.expr);
            }
            if let Some(offset) = &spec.offset {
                p.expr_labeled("offset", offset);
            }
            if let Some(fetch) = &spec.fetch {
                p.expr_labeled("fetch", fetch);
            }
        });
    }

    fn table_group(&mut self, group: &TableGroup) {
        self.node("TableGroup", |p| {
            p.table_reference(&group.primary);
            for join in &group.table_joins {
                p.node(&format!("table join ({:?})", join.kind), |p| {
                    p.table_reference(&join.table);
                    p.predicate("on", &join.on);
                });
            }
            for join in &group.group_joins {
                p.node(&format!("group join ({:?})", join.kind), |p| {
                    p.table_group(&join.group);
                    if let Some(on) = &join.on {
                        p.predicate("on", on);
                    }
                });
            }
        });
    }

    fn table_reference(&mut self, table: &TableReference) {
        match table {
            TableReference::Table { name, alias } => self.line(&format!("{name} {alias}")),
            TableReference::Derived { query, alias } => {
                self.node(&format!("derived {alias}"), |p| p.select(query))
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        self.labeled("", |s, d| s.serialize_expr(expr, d));
    }

    fn expr_labeled(&mut self, label: &str, expr: &Expr) {
        self.labeled(label, |s, d| s.serialize_expr(expr, d));
    }

    fn predicate(&mut self, label: &str, predicate: &Predicate) {
        self.labeled(label, |s, d| s.serialize_predicate(predicate, d));
    }

    /// Renders one leaf, swallowing a failure.
    fn labeled(
        &mut self,
        label: &str,
        render: impl FnOnce(&Serializer, &mut Discard) -> Result<String>,
    ) {
        let text = match render(self.serializer, &mut Discard::default()) {
            Ok(text) => text,
            Err(err) => {
                warn!(target: "quarry::sql_ast", error = %err, label, "could not render SQL AST subtree");
                format!("<unrenderable: {err}>")
            }
        };

        if label.is_empty() {
            self.line(&text);
        } else {
            self.line(&format!("{label}: {text}"));
        }
    }

    fn node(&mut self, label: &str, children: impl FnOnce(&mut Self)) {
        self.line(label);
        self.depth += 1;
        children(self);
        self.depth -= 1;
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.buf, "{:indent$}{text}", "", indent = self.depth * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{SelectItem, TableGroup};
    use quarry_core::sqm::function::FunctionRender;

    fn spec_with_where(where_: Predicate) -> Statement {
        let mut spec = QuerySpec::default();
        spec.select.push(SelectItem::new(Expr::column("p1_0", "id")));
        spec.from
            .push(TableGroup::new(TableReference::table("person", "p1_0")));
        spec.where_ = Some(where_);
        Statement::Select(SelectStatement::spec(spec))
    }

    #[test]
    fn unrenderable_subtree_is_swallowed() {
        let broken = Expr::Function(crate::ast::FunctionCall {
            render: FunctionRender::Pattern("substr(?1, ?3)".into()),
            args: vec![Expr::column("p1_0", "name")],
            distinct: false,
        });
        let stmt = spec_with_where(Predicate::eq(broken, Expr::literal("x")));

        let dump = SqlTreePrinter::print(&Serializer::sqlite(), &stmt);

        assert!(dump.contains("where: <unrenderable:"), "{dump}");
        assert!(dump.contains("person p1_0"), "{dump}");
        assert!(dump.contains("p1_0.id"), "{dump}");
    }

    #[test]
    fn printing_does_not_touch_bound_parameters() {
        let stmt = spec_with_where(Predicate::eq(
            Expr::column("p1_0", "id"),
            Expr::value_param(7i64),
        ));
        let serializer = Serializer::sqlite();

        let _ = SqlTreePrinter::print(&serializer, &stmt);
        let mut params: Vec<JdbcParameter> = vec![];
        let sql = serializer.serialize(&stmt, &mut params).unwrap();

        assert_eq!(sql, "SELECT p1_0.id FROM person p1_0 WHERE p1_0.id = ?1;");
        assert_eq!(params.len(), 1);
    }
}
