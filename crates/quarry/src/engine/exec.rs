use crate::engine::Engine;

use quarry_core::{
    driver::{operation::QuerySql, Rows},
    sqm::{ParamId, ParamKind, SqmParameters},
    stmt::{Type, Value, ValueStream},
    err, Connection, Error, Result,
};
use quarry_sql::{
    ast::{visit_mut::expand_list_params, JdbcParameter, LockMode},
    SqlTreePrinter, Statement,
};

use std::{cell::Cell, collections::HashMap, rc::Rc, time::Duration};
use tracing::{debug, info};

/// Values bound to the parameters of one query execution, and the
/// execution's own statement timeout and row lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct Bindings {
    values: HashMap<ParamId, Value>,
    timeout: Option<Duration>,
    lock: Option<LockMode>,
}

/// A statement rendered for the driver.
#[derive(Debug, Clone)]
pub(crate) struct Rendered {
    pub(crate) sql: String,

    /// One value per placeholder, in placeholder order
    pub(crate) params: Vec<Value>,

    /// Overrides the factory's statement timeout
    pub(crate) timeout: Option<Duration>,
}

impl Bindings {
    pub(crate) fn bind(&mut self, id: ParamId, value: Value) {
        self.values.insert(id, value);
    }

    pub(crate) fn get(&self, id: ParamId) -> Option<&Value> {
        self.values.get(&id)
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub(crate) fn set_lock(&mut self, lock: LockMode) {
        self.lock = Some(lock);
    }

    pub(crate) fn lock(&self) -> Option<LockMode> {
        self.lock
    }

    /// The same values, for a follow-up load that takes no lock.
    pub(crate) fn unlocked(&self) -> Bindings {
        Bindings {
            lock: None,
            ..self.clone()
        }
    }
}

impl Engine {
    /// Renders `stmt` and resolves every placeholder to its value.
    ///
    /// Multi-valued parameters bound to a list get one placeholder per
    /// element. A query parameter with nothing bound fails.
    pub(crate) fn render(
        &self,
        stmt: &Statement,
        params: &SqmParameters,
        bindings: &Bindings,
    ) -> Result<Rendered> {
        let mut stmt = stmt.clone();
        expand_list_params(&mut stmt, |id| match bindings.get(id) {
            Some(Value::List(items)) => Some(items.len()),
            _ => None,
        });

        SqlTreePrinter::log(&self.serializer, &stmt);

        let mut slots: Vec<JdbcParameter> = vec![];
        let sql = self.serializer.serialize(&stmt, &mut slots)?;

        let params = slots
            .into_iter()
            .map(|slot| resolve(slot, params, bindings))
            .collect::<Result<_>>()?;

        Ok(Rendered {
            sql,
            params,
            timeout: bindings.timeout,
        })
    }

    /// Sends one statement to the database. `ret` is `Some` for statements
    /// returning rows.
    pub(crate) async fn execute(
        &self,
        connection: &mut dyn Connection,
        rendered: Rendered,
        ret: Option<Vec<Type>>,
    ) -> Result<Rows> {
        self.send(connection, rendered, ret, false).await
    }

    /// Runs a query whose rows are read as the returned stream is polled.
    pub(crate) async fn open_cursor(
        &self,
        connection: &mut dyn Connection,
        rendered: Rendered,
        ret: Vec<Type>,
    ) -> Result<ValueStream> {
        self.send(connection, rendered, Some(ret), true)
            .await?
            .into_values()
    }

    async fn send(
        &self,
        connection: &mut dyn Connection,
        rendered: Rendered,
        ret: Option<Vec<Type>>,
        cursor: bool,
    ) -> Result<Rows> {
        let Rendered {
            mut sql,
            params,
            timeout,
        } = rendered;

        if let Some(inspector) = &self.inspector {
            if let Some(rewritten) = inspector.inspect(&sql) {
                sql = rewritten;
            }
        }

        debug!(target: "quarry::sql", %sql, ?params);
        if self.settings.show_sql {
            info!(target: "quarry::sql", "{sql}");
        }
        self.stats.statement_prepared();

        let op = QuerySql {
            sql,
            params,
            ret,
            timeout: timeout.or(self.settings.statement_timeout),
            cursor,
        };
        let response = connection.exec(op.into()).await?;
        Ok(response.rows)
    }

    /// Runs a statement that returns rows and collects them.
    pub(crate) async fn query_rows(
        &self,
        connection: &mut dyn Connection,
        rendered: Rendered,
        ret: Vec<Type>,
    ) -> Result<Vec<Vec<Value>>> {
        let rows = self
            .execute(connection, rendered, Some(ret))
            .await?
            .into_values()?
            .collect()
            .await?;

        rows.into_iter().map(into_row).collect()
    }

    /// Runs a statement that reports an update count.
    pub(crate) async fn execute_update(
        &self,
        connection: &mut dyn Connection,
        rendered: Rendered,
    ) -> Result<u64> {
        self.execute(connection, rendered, None).await?.into_count()
    }
}

/// The column values of one driver row.
pub(crate) fn into_row(row: Value) -> Result<Vec<Value>> {
    match row {
        Value::Record(record) => Ok(record.to_vec()),
        other => Err(err!("expected a row record, got {other:?}")),
    }
}

fn resolve(slot: JdbcParameter, params: &SqmParameters, bindings: &Bindings) -> Result<Value> {
    let (id, ty, element) = match slot {
        JdbcParameter::Value(value) => return Ok(value),
        JdbcParameter::Query { id, ty, element } => (id, ty, element),
    };

    let Some(bound) = bindings.get(id) else {
        return Err(Error::illegal_argument(format!(
            "no value bound for parameter {}",
            describe(params, id)
        )));
    };

    let value = match (element, bound) {
        (Some(index), Value::List(items)) => items.get(index).cloned().unwrap_or(Value::Null),
        (_, value) => value.clone(),
    };

    if ty.is_unknown() {
        return Ok(value);
    }
    ty.cast(value)
}

fn describe(params: &SqmParameters, id: ParamId) -> String {
    match &params.get(id).kind {
        ParamKind::Named(name) | ParamKind::Criteria(Some(name)) => format!("`:{name}`"),
        ParamKind::Positional(position) => format!("`?{position}`"),
        _ => format!("#{}", id.0),
    }
}

/// Counts the open results of a session: streams and scrollable results
/// that have not been dropped yet.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResourceRegistry {
    open: Rc<Cell<usize>>,
}

/// Registered for as long as it lives.
#[derive(Debug)]
pub(crate) struct ResourceGuard {
    open: Rc<Cell<usize>>,
}

impl ResourceRegistry {
    pub(crate) fn register(&self) -> ResourceGuard {
        self.open.set(self.open.get() + 1);
        ResourceGuard {
            open: self.open.clone(),
        }
    }

    pub(crate) fn has_registered_resources(&self) -> bool {
        self.open.get() > 0
    }

    pub(crate) fn len(&self) -> usize {
        self.open.get()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.open.set(self.open.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_deregister_on_drop() {
        let registry = ResourceRegistry::default();
        assert!(!registry.has_registered_resources());

        let a = registry.register();
        let b = registry.register();
        assert_eq!(registry.len(), 2);

        drop(a);
        assert!(registry.has_registered_resources());
        drop(b);
        assert!(!registry.has_registered_resources());
    }

    #[test]
    fn unbound_query_parameter_is_rejected() {
        let mut params = SqmParameters::new();
        let id = params.named("name").unwrap();

        let err = resolve(JdbcParameter::query(id, Type::String), &params, &Bindings::default())
            .unwrap_err();
        assert!(err.is_illegal_argument());
        assert!(err.to_string().contains(":name"));
    }

    #[test]
    fn list_elements_resolve_by_position() {
        let mut params = SqmParameters::new();
        let id = params.named("ids").unwrap();
        let mut bindings = Bindings::default();
        bindings.bind(id, Value::List(vec![Value::I32(1), Value::I32(2)]));

        let slot = JdbcParameter::Query {
            id,
            ty: Type::I64,
            element: Some(1),
        };
        assert_eq!(resolve(slot, &params, &bindings).unwrap(), Value::I64(2));
    }
}
