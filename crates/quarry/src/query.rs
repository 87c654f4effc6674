//! Executable queries created by a session.

use crate::{
    engine::{exec::into_row, Bindings, ResourceGuard},
    entity::EntityRef,
    graph::{EntityGraph, GraphNode, GraphSemantic},
    Session,
};

use quarry_core::{
    sqm::{ParamName, SqmExpr, SqmParamRef, SqmParameters, SqmQueryPart, SqmSelectStatement, SqmStatement},
    stmt::{Type, Value},
    Error, Result,
};

use quarry_sql::ast;

use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// One selected item of a result row.
#[derive(Debug, Clone)]
pub enum RowValue {
    Entity(EntityRef),
    Value(Value),
}

/// Row lock a query takes on the rows it reads. Dialects without row
/// locking ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock, `FOR SHARE`
    PessimisticRead,

    /// Exclusive lock, `FOR UPDATE`
    PessimisticWrite,
}

/// One row of a query result, with a value per selection.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<RowValue>,
}

/// A select query bound to the session that created it.
///
/// Parameters, pagination and hints are set by chaining; one of
/// [`list`](Query::list), [`single_result`](Query::single_result) or
/// [`stream`](Query::stream) executes it.
pub struct Query<'s> {
    session: &'s mut Session,
    stmt: SqmSelectStatement,
    bindings: Bindings,
    first_result: Option<usize>,
    max_results: Option<usize>,
    graph: Option<(EntityGraph, GraphSemantic)>,
}

/// An `update`, `delete` or `insert` statement bound to its session.
pub struct MutationQuery<'s> {
    session: &'s mut Session,
    stmt: SqmStatement,
    bindings: Bindings,
}

/// Rows of an executed query handed out one at a time.
///
/// Rows are read from the database and assembled as they are asked for.
/// The results borrow their session and stay registered with it until
/// dropped or closed; a session cannot commit or close while results are
/// registered.
pub struct ScrollableResults<'s> {
    rows: Pin<Box<dyn Stream<Item = Result<Row>> + 's>>,
    guard: Option<ResourceGuard>,
}

impl Row {
    pub(crate) fn new(values: Vec<RowValue>) -> Row {
        Row { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RowValue> {
        self.values.get(index)
    }

    /// The scalar at `index`.
    pub fn value(&self, index: usize) -> Result<Value> {
        match self.values.get(index) {
            Some(RowValue::Value(value)) => Ok(value.clone()),
            Some(RowValue::Entity(_)) => Err(Error::illegal_argument(format!(
                "selection {index} is an entity"
            ))),
            None => Err(Error::illegal_argument(format!(
                "row has no selection {index}"
            ))),
        }
    }

    /// The entity at `index`; `None` for a null left-joined entity.
    pub fn entity(&self, index: usize) -> Result<Option<EntityRef>> {
        match self.values.get(index) {
            Some(RowValue::Entity(entity)) => Ok(Some(entity.clone())),
            Some(RowValue::Value(Value::Null)) => Ok(None),
            Some(RowValue::Value(_)) => Err(Error::illegal_argument(format!(
                "selection {index} is not an entity"
            ))),
            None => Err(Error::illegal_argument(format!(
                "row has no selection {index}"
            ))),
        }
    }

    pub fn into_values(self) -> Vec<RowValue> {
        self.values
    }
}

impl<'s> Query<'s> {
    pub(crate) fn new(session: &'s mut Session, stmt: SqmSelectStatement) -> Query<'s> {
        Query {
            session,
            stmt,
            bindings: Bindings::default(),
            first_result: None,
            max_results: None,
            graph: None,
        }
    }

    /// Binds a named (`"name"`) or positional (`1`) parameter. A list value
    /// binds a multi-valued parameter.
    pub fn set_parameter<'n>(
        mut self,
        name: impl Into<ParamName<'n>>,
        value: impl Into<Value>,
    ) -> Result<Self> {
        bind(&self.stmt.params, &mut self.bindings, name.into(), value.into())?;
        Ok(self)
    }

    pub fn set_parameter_list<'n, I>(self, name: impl Into<ParamName<'n>>, values: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.set_parameter(name, Value::List(values))
    }

    /// Binds an entity-typed parameter to the identifier of `entity`.
    pub fn set_entity_parameter<'n>(
        self,
        name: impl Into<ParamName<'n>>,
        entity: &EntityRef,
    ) -> Result<Self> {
        self.set_parameter(name, entity.id())
    }

    pub fn set_first_result(mut self, first: usize) -> Self {
        self.first_result = Some(first);
        self
    }

    pub fn set_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Applies `graph` as a load or fetch graph to the selected entities.
    pub fn set_graph(mut self, graph: EntityGraph, semantic: GraphSemantic) -> Self {
        self.graph = Some((graph, semantic));
        self
    }

    /// Statement timeout for this query, in place of the factory's.
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.bindings.set_timeout(timeout);
        self
    }

    /// Locks the rows the query selects. Loads that follow from the query,
    /// like subselect collection fetches, take no lock.
    pub fn set_lock_mode(mut self, mode: LockMode) -> Self {
        self.bindings.set_lock(match mode {
            LockMode::PessimisticRead => ast::LockMode::Share,
            LockMode::PessimisticWrite => ast::LockMode::Update,
        });
        self
    }

    pub async fn list(self) -> Result<Vec<Row>> {
        let Query {
            session,
            stmt,
            bindings,
            first_result,
            max_results,
            graph,
        } = self;

        session.auto_flush().await?;
        run(session, stmt, &bindings, first_result, max_results, graph.as_ref()).await
    }

    /// The first selection of every row, which must be an entity.
    pub async fn entity_list(self) -> Result<Vec<EntityRef>> {
        self.list()
            .await?
            .iter()
            .filter_map(|row| row.entity(0).transpose())
            .collect()
    }

    /// The only row of the result, `None` when there is none.
    pub async fn single_result(self) -> Result<Option<Row>> {
        let mut rows = self.list().await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(Error::non_unique_result(n)),
        }
    }

    /// Executes the query and hands its rows out one at a time, reading
    /// and assembling each as it is asked for.
    ///
    /// A collection fetch merges several rows into one result, so such a
    /// query is read completely up front.
    pub async fn stream(self) -> Result<ScrollableResults<'s>> {
        let Query {
            session,
            stmt,
            bindings,
            first_result,
            max_results,
            graph,
        } = self;

        session.auto_flush().await?;

        if session.fetches_collection(&stmt)? {
            debug!("collection fetch; streaming a fully read result");
            let rows = run(session, stmt, &bindings, first_result, max_results, graph.as_ref()).await?;
            let guard = session.resources.register();
            return Ok(ScrollableResults::new(
                async_stream::stream! {
                    for row in rows {
                        yield Ok(row);
                    }
                },
                guard,
            ));
        }

        session.engine().stats.query_executed();
        let graph = validate_graph(session, graph)?;
        let stmt = paginate(stmt, first_result, max_results);
        let (mut cursor, plan) = session.open_cursor(&stmt, &bindings).await?;
        let guard = session.resources.register();

        let rows = async_stream::try_stream! {
            let graph = graph.as_ref().map(|(graph, semantic)| GraphNode {
                graph,
                semantic: *semantic,
            });
            while let Some(row) = cursor.next().await {
                let row = into_row(row?)?;
                let values = session
                    .assemble_streamed(&plan, &row, &mut cursor, graph)
                    .await?;
                yield Row::new(values);
            }
        };
        Ok(ScrollableResults::new(rows, guard))
    }
}

/// Runs a select to completion.
async fn run(
    session: &mut Session,
    stmt: SqmSelectStatement,
    bindings: &Bindings,
    first_result: Option<usize>,
    max_results: Option<usize>,
    graph: Option<&(EntityGraph, GraphSemantic)>,
) -> Result<Vec<Row>> {
    session.engine().stats.query_executed();

    let in_memory =
        session.fetches_collection(&stmt)? && (first_result.is_some() || max_results.is_some());
    let stmt = if in_memory {
        tracing::warn!("first/max results specified with a collection fetch; applying in memory");
        stmt
    } else {
        paginate(stmt, first_result, max_results)
    };

    if let Some((graph, _)) = graph {
        graph.validate(&session.engine().schema)?;
    }
    let graph = graph.map(|(graph, semantic)| GraphNode {
        graph,
        semantic: *semantic,
    });
    let rows = session.select(&stmt, bindings, graph).await?;
    let mut rows: Vec<Row> = rows.into_iter().map(Row::new).collect();

    if in_memory {
        let first = first_result.unwrap_or(0);
        let max = max_results.unwrap_or(usize::MAX);
        rows = rows.into_iter().skip(first).take(max).collect();
    }
    Ok(rows)
}

fn validate_graph(
    session: &Session,
    graph: Option<(EntityGraph, GraphSemantic)>,
) -> Result<Option<(EntityGraph, GraphSemantic)>> {
    if let Some((graph, _)) = &graph {
        graph.validate(&session.engine().schema)?;
    }
    Ok(graph)
}

impl<'s> MutationQuery<'s> {
    pub(crate) fn new(session: &'s mut Session, stmt: SqmStatement) -> MutationQuery<'s> {
        MutationQuery {
            session,
            stmt,
            bindings: Bindings::default(),
        }
    }

    pub fn set_parameter<'n>(
        mut self,
        name: impl Into<ParamName<'n>>,
        value: impl Into<Value>,
    ) -> Result<Self> {
        bind(self.stmt.params(), &mut self.bindings, name.into(), value.into())?;
        Ok(self)
    }

    pub fn set_parameter_list<'n, I>(self, name: impl Into<ParamName<'n>>, values: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.set_parameter(name, Value::List(values))
    }

    /// Statement timeout for this statement, in place of the factory's.
    pub fn set_timeout(mut self, timeout: Duration) -> Self {
        self.bindings.set_timeout(timeout);
        self
    }

    /// Runs the statement and returns the number of rows it affected.
    pub async fn execute_update(self) -> Result<u64> {
        let MutationQuery {
            session,
            stmt,
            bindings,
        } = self;

        session.auto_flush().await?;
        session.engine().stats.query_executed();
        session.execute_mutation(&stmt, &bindings).await
    }
}

impl<'s> ScrollableResults<'s> {
    fn new(rows: impl Stream<Item = Result<Row>> + 's, guard: ResourceGuard) -> ScrollableResults<'s> {
        ScrollableResults {
            rows: Box::pin(rows),
            guard: Some(guard),
        }
    }

    pub async fn next(&mut self) -> Option<Result<Row>> {
        StreamExt::next(self).await
    }

    /// Releases the results and their cursor; the remaining rows are
    /// discarded.
    pub fn close(&mut self) {
        self.guard = None;
        self.rows = Box::pin(tokio_stream::empty());
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_none()
    }

    pub async fn collect(mut self) -> Result<Vec<Row>> {
        let mut ret = vec![];
        while let Some(row) = self.next().await {
            ret.push(row?);
        }
        Ok(ret)
    }
}

impl Stream for ScrollableResults<'_> {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rows.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ScrollableResults<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrollableResults")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn bind(
    params: &SqmParameters,
    bindings: &mut Bindings,
    name: ParamName<'_>,
    value: Value,
) -> Result<()> {
    let Some(param) = params.lookup(&name) else {
        return Err(Error::illegal_argument(format!(
            "could not locate parameter {name}"
        )));
    };

    if value.is_list() && !param.multi_valued {
        return Err(Error::illegal_argument(format!(
            "parameter {name} is not multi-valued"
        )));
    }

    bindings.bind(param.id, value);
    Ok(())
}

/// Applies first/max results as parameters of the outermost query part.
fn paginate(
    mut stmt: SqmSelectStatement,
    first: Option<usize>,
    max: Option<usize>,
) -> SqmSelectStatement {
    let params = &mut stmt.params;
    let mut limit = |n: usize| {
        let id = params.value(Value::I64(n as i64), Type::I64);
        SqmExpr::Param(SqmParamRef { id })
    };
    let offset = first.filter(|first| *first > 0).map(&mut limit);
    let fetch = max.map(&mut limit);

    let (slot_offset, slot_fetch) = match &mut stmt.query.body {
        SqmQueryPart::Spec(spec) => (&mut spec.offset, &mut spec.fetch),
        SqmQueryPart::Group(group) => (&mut group.offset, &mut group.fetch),
    };
    if offset.is_some() {
        *slot_offset = offset;
    }
    if fetch.is_some() {
        *slot_fetch = fetch;
    }
    stmt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_parameter_names_are_rejected() {
        let mut params = SqmParameters::new();
        params.named("name").unwrap();
        let mut bindings = Bindings::default();

        let err = bind(&params, &mut bindings, "other".into(), Value::from("x")).unwrap_err();
        assert!(err.is_illegal_argument());

        bind(&params, &mut bindings, "name".into(), Value::from("x")).unwrap();
    }

    #[test]
    fn lists_need_a_multi_valued_parameter() {
        let mut params = SqmParameters::new();
        let id = params.named("ids").unwrap();
        let mut bindings = Bindings::default();
        let list = Value::List(vec![Value::I64(1), Value::I64(2)]);

        assert!(bind(&params, &mut bindings, "ids".into(), list.clone()).is_err());

        params.set_multi_valued(id);
        bind(&params, &mut bindings, "ids".into(), list.clone()).unwrap();
        assert_eq!(bindings.get(id), Some(&list));
    }

    #[test]
    fn rows_tell_entities_from_scalars() {
        let row = Row::new(vec![RowValue::Value(Value::I64(3)), RowValue::Value(Value::Null)]);
        assert_eq!(row.value(0).unwrap(), Value::I64(3));
        assert!(row.entity(1).unwrap().is_none());
        assert!(row.entity(0).is_err());
        assert!(row.value(2).is_err());
    }
}
