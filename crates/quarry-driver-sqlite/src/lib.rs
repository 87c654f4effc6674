mod value;
pub(crate) use value::Value;

use quarry_core::{
    async_trait,
    driver::{
        operation::{Operation, QuerySql, Transaction},
        Capability, Driver, Response,
    },
    schema::db::Schema,
    stmt, Error, Result,
};
use quarry_sql::{
    ast::{CreateTable, JdbcParameter},
    Serializer, Statement,
};
use rusqlite::Connection as RusqliteConnection;
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};
use url::Url;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum Sqlite {
    File {
        path: PathBuf,
        busy_timeout: Duration,
    },

    /// Every connection opened by the driver shares one in-memory database,
    /// which lives as long as the driver.
    InMemory(Arc<Mutex<RusqliteConnection>>),
}

impl Sqlite {
    /// Create a new SQLite driver from a connection URL: `sqlite::memory:` or
    /// `sqlite:/path/to/db?busy_timeout=5000`.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url_str = url.into();
        let url = Url::parse(&url_str).map_err(Error::driver)?;

        if url.scheme() != "sqlite" {
            return Err(Error::illegal_argument(format!(
                "connection URL does not have a `sqlite` scheme; url={url_str}"
            )));
        }

        if url.path() == ":memory:" {
            return Self::in_memory();
        }

        let mut busy_timeout = DEFAULT_BUSY_TIMEOUT;
        for (key, value) in url.query_pairs() {
            match &*key {
                "busy_timeout" => busy_timeout = Duration::from_millis(value.parse()?),
                _ => {
                    return Err(Error::illegal_argument(format!(
                        "unknown SQLite connection parameter `{key}`"
                    )))
                }
            }
        }

        Ok(Self::File {
            path: PathBuf::from(url.path()),
            busy_timeout,
        })
    }

    /// Create an in-memory SQLite database
    pub fn in_memory() -> Result<Self> {
        let connection = RusqliteConnection::open_in_memory().map_err(Error::driver)?;
        Ok(Self::InMemory(Arc::new(Mutex::new(connection))))
    }

    /// Open a SQLite database at the specified file path
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self::File {
            path: path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

#[async_trait]
impl Driver for Sqlite {
    fn url(&self) -> Cow<'_, str> {
        match self {
            Sqlite::InMemory(_) => Cow::Borrowed("sqlite::memory:"),
            Sqlite::File { path, .. } => Cow::Owned(format!("sqlite:{}", path.display())),
        }
    }

    fn capability(&self) -> &'static Capability {
        &Capability::SQLITE
    }

    async fn connect(&self) -> Result<Box<dyn quarry_core::Connection>> {
        let connection = match self {
            Sqlite::File { path, busy_timeout } => Connection::open(path, *busy_timeout)?,
            Sqlite::InMemory(shared) => Connection {
                connection: shared.clone(),
            },
        };
        Ok(Box::new(connection))
    }
}

#[derive(Debug)]
pub struct Connection {
    connection: Arc<Mutex<RusqliteConnection>>,
}

impl Connection {
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let connection = RusqliteConnection::open(path).map_err(Error::driver)?;
        connection
            .busy_timeout(busy_timeout)
            .map_err(Error::driver)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        debug!(target: "quarry::sql", sql);
        self.connection
            .lock()
            .await
            .execute_batch(sql)
            .map_err(Error::driver)
    }

    async fn query_sql(&self, op: QuerySql) -> Result<Response> {
        let QuerySql {
            sql,
            params,
            ret,
            timeout,
            cursor,
        } = op;

        if let (true, Some(ret)) = (cursor, &ret) {
            return self.open_cursor(sql, params, ret.clone(), timeout).await;
        }

        let connection = self.connection.lock().await;
        set_deadline(&connection, timeout);
        let result = run(&connection, &sql, &params, ret.as_deref());
        clear_deadline(&connection, timeout);

        result.map_err(|cause| Error::jdbc_execution(sql, params, cause))
    }

    /// Runs a query whose rows are read on a dedicated thread as the
    /// returned stream asks for them. The thread holds the connection until
    /// the rows are exhausted or the stream is dropped.
    async fn open_cursor(
        &self,
        sql: String,
        params: Vec<stmt::Value>,
        ret: Vec<stmt::Type>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let connection = self.connection.clone().lock_owned().await;
        let (ready_tx, ready_rx) = oneshot::channel();
        let (row_tx, row_rx) = mpsc::channel(1);

        thread::spawn(move || {
            set_deadline(&connection, timeout);
            read_rows(&connection, &sql, &params, &ret, ready_tx, &row_tx);
            clear_deadline(&connection, timeout);
            trace!(target: "quarry::sql", "cursor closed");
        });

        match ready_rx.await {
            Ok(result) => result?,
            Err(_) => return Err(Error::transaction("SQLite cursor thread exited early")),
        }

        let rows = stmt::ValueStream::from_cursor(ReceiverStream::new(row_rx));
        Ok(Response::value_stream(rows))
    }
}

fn set_deadline(connection: &RusqliteConnection, timeout: Option<Duration>) {
    if let Some(timeout) = timeout {
        let deadline = Instant::now() + timeout;
        connection.progress_handler(1_000, Some(move || Instant::now() > deadline));
    }
}

fn clear_deadline(connection: &RusqliteConnection, timeout: Option<Duration>) {
    if timeout.is_some() {
        connection.progress_handler(0, None::<fn() -> bool>);
    }
}

fn run(
    connection: &RusqliteConnection,
    sql: &str,
    params: &[stmt::Value],
    ret: Option<&[stmt::Type]>,
) -> Result<Response> {
    let mut stmt = connection.prepare_cached(sql).map_err(Error::driver)?;

    let params = params
        .iter()
        .map(|value| Value::from(value.clone()))
        .collect::<Vec<_>>();

    let Some(ret_tys) = ret else {
        let count = stmt
            .execute(rusqlite::params_from_iter(params.iter()))
            .map_err(Error::driver)?;
        return Ok(Response::count(count as u64));
    };

    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(Error::driver)?;

    let mut ret = vec![];
    while let Some(row) = rows.next().map_err(Error::driver)? {
        ret.push(load(row, ret_tys)?);
    }

    Ok(Response::value_stream(stmt::ValueStream::from_vec(ret)))
}

/// Body of a cursor thread. Reports whether the statement started through
/// `ready`, then sends rows one at a time until the receiver goes away.
fn read_rows(
    connection: &RusqliteConnection,
    sql: &str,
    params: &[stmt::Value],
    ret: &[stmt::Type],
    ready: oneshot::Sender<Result<()>>,
    rows_tx: &mpsc::Sender<Result<stmt::Value>>,
) {
    let failed = |cause: Error| Error::jdbc_execution(sql, params.to_vec(), cause);
    let values = params
        .iter()
        .map(|value| Value::from(value.clone()))
        .collect::<Vec<_>>();

    let mut stmt = match connection.prepare_cached(sql) {
        Ok(stmt) => stmt,
        Err(cause) => {
            let _ = ready.send(Err(failed(Error::driver(cause))));
            return;
        }
    };
    let mut rows = match stmt.query(rusqlite::params_from_iter(values.iter())) {
        Ok(rows) => rows,
        Err(cause) => {
            let _ = ready.send(Err(failed(Error::driver(cause))));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    loop {
        let row = match rows.next() {
            Ok(Some(row)) => load(row, ret).map_err(failed),
            Ok(None) => return,
            Err(cause) => Err(failed(Error::driver(cause))),
        };
        let stop = row.is_err();
        if rows_tx.blocking_send(row).is_err() || stop {
            return;
        }
    }
}

fn load(row: &rusqlite::Row<'_>, ret: &[stmt::Type]) -> Result<stmt::Value> {
    let mut items = Vec::with_capacity(ret.len());
    for (index, ty) in ret.iter().enumerate() {
        items.push(Value::from_sql(row, index, ty)?.into_inner());
    }
    Ok(stmt::ValueRecord::from_vec(items).into())
}

#[async_trait]
impl quarry_core::driver::Connection for Connection {
    async fn exec(&mut self, op: Operation) -> Result<Response> {
        match op {
            Operation::QuerySql(op) => self.query_sql(op).await,
            Operation::Transaction(op) => {
                let sql = Serializer::sqlite().serialize_transaction(&op);
                self.execute_batch(&sql).await?;
                if op == Transaction::Start {
                    debug!(target: "quarry::sql", "transaction started");
                }
                Ok(Response::count(0))
            }
        }
    }

    async fn push_schema(&mut self, schema: &Schema) -> Result<()> {
        let serializer = Serializer::sqlite();

        for table in &schema.tables {
            let mut create = CreateTable::from_table(table);
            create.if_not_exists = true;

            let mut params = Vec::<JdbcParameter>::new();
            let sql = serializer.serialize(&Statement::CreateTable(create), &mut params)?;
            debug_assert!(params.is_empty());

            self.execute_batch(&sql).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::driver::Connection as _;

    fn query(sql: &str, params: Vec<stmt::Value>, ret: Option<Vec<stmt::Type>>) -> Operation {
        QuerySql {
            sql: sql.to_string(),
            params,
            ret,
            timeout: None,
            cursor: false,
        }
        .into()
    }

    #[tokio::test]
    async fn in_memory_connections_share_one_database() {
        let driver = Sqlite::new("sqlite::memory:").unwrap();

        let mut a = driver.connect().await.unwrap();
        a.exec(query("CREATE TABLE t (id INTEGER, name TEXT)", vec![], None))
            .await
            .unwrap();
        a.exec(query(
            "INSERT INTO t (id, name) VALUES (?1, ?2)",
            vec![stmt::Value::I64(1), stmt::Value::from("one")],
            None,
        ))
        .await
        .unwrap();

        let mut b = driver.connect().await.unwrap();
        let rows = b
            .exec(query(
                "SELECT id, name FROM t",
                vec![],
                Some(vec![stmt::Type::I64, stmt::Type::String]),
            ))
            .await
            .unwrap()
            .rows
            .into_values()
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn failed_statement_keeps_sql_and_params() {
        let driver = Sqlite::in_memory().unwrap();
        let mut conn = driver.connect().await.unwrap();

        let err = conn
            .exec(query(
                "SELECT x FROM missing WHERE id = ?1",
                vec![stmt::Value::I64(3)],
                Some(vec![stmt::Type::I64]),
            ))
            .await
            .unwrap_err();

        assert!(err.is_jdbc_execution());
        assert_eq!(err.sql(), Some("SELECT x FROM missing WHERE id = ?1"));
    }

    #[tokio::test]
    async fn cursor_rows_are_read_on_demand() {
        let driver = Sqlite::in_memory().unwrap();
        let mut conn = driver.connect().await.unwrap();
        conn.exec(query("CREATE TABLE t (id INTEGER)", vec![], None))
            .await
            .unwrap();
        for id in 1..=3 {
            conn.exec(query("INSERT INTO t (id) VALUES (?1)", vec![stmt::Value::I64(id)], None))
                .await
                .unwrap();
        }

        let op = QuerySql {
            sql: "SELECT id FROM t ORDER BY id".to_string(),
            params: vec![],
            ret: Some(vec![stmt::Type::I64]),
            timeout: None,
            cursor: true,
        };
        let mut rows = conn.exec(op.into()).await.unwrap().rows.into_values().unwrap();
        assert!(rows.is_live());
        let first = rows.next().await.unwrap().unwrap();
        assert_eq!(first, stmt::ValueRecord::from_vec(vec![stmt::Value::I64(1)]).into());

        // Dropping the cursor hands the connection back.
        drop(rows);
        let count = conn
            .exec(query("DELETE FROM t", vec![], None))
            .await
            .unwrap()
            .rows
            .into_count()
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn cursor_reports_a_bad_statement_up_front() {
        let driver = Sqlite::in_memory().unwrap();
        let mut conn = driver.connect().await.unwrap();
        let op = QuerySql {
            sql: "SELECT id FROM missing".to_string(),
            params: vec![],
            ret: Some(vec![stmt::Type::I64]),
            timeout: None,
            cursor: true,
        };
        let err = conn.exec(op.into()).await.unwrap_err();
        assert!(err.is_jdbc_execution());
    }

    #[test]
    fn rejects_foreign_scheme() {
        let err = Sqlite::new("postgres://localhost/db").unwrap_err();
        assert!(err.is_illegal_argument());
    }
}
