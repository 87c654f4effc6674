#[macro_use]
mod fmt;
use fmt::ToSql;

mod delim;
use delim::{Comma, Delimited};

mod flavor;
use flavor::Flavor;

mod ident;
use ident::Ident;

mod params;
pub use params::{Params, Placeholder};

// Fragment serializers
mod create_table;
mod cte;
mod dml;
mod expr;
mod from;
mod predicate;
mod query;
mod value;

use crate::ast::{Expr, LockMode, Predicate, Statement};

use quarry_core::{
    driver::{operation::Transaction, Capability, Dialect},
    Error, Result,
};

/// Serialize a statement to a SQL string
#[derive(Debug)]
pub struct Serializer {
    /// The database flavor handles the differences between SQL dialects and
    /// supported features.
    flavor: Flavor,

    capability: &'static Capability,
}

struct Formatter<'a, T> {
    /// Handle to the serializer
    serializer: &'a Serializer,

    /// Where to write the serialized SQL
    dst: &'a mut String,

    /// Where to store parameters
    params: &'a mut T,

    /// First failure hit while walking the tree. Rendering continues so the
    /// walk stays simple, but the output is discarded.
    error: Option<Error>,

    /// SQL Server row lock, applied as a hint on each table of the current
    /// query level.
    table_hint: Option<LockMode>,
}

impl Serializer {
    pub fn for_dialect(dialect: Dialect) -> Serializer {
        Serializer {
            flavor: Flavor::from(dialect),
            capability: Capability::for_dialect(dialect),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.capability.dialect
    }

    pub fn capability(&self) -> &'static Capability {
        self.capability
    }

    /// Renders `stmt`, pushing its parameters into `params` in placeholder
    /// order.
    pub fn serialize(&self, stmt: &Statement, params: &mut impl Params) -> Result<String> {
        let mut ret = self.render(params, |f| stmt.to_sql(f))?;
        ret.push(';');
        Ok(ret)
    }

    pub fn serialize_expr(&self, expr: &Expr, params: &mut impl Params) -> Result<String> {
        self.render(params, |f| expr.to_sql(f))
    }

    pub fn serialize_predicate(
        &self,
        predicate: &Predicate,
        params: &mut impl Params,
    ) -> Result<String> {
        self.render(params, |f| predicate.to_sql(f))
    }

    /// Serialize a transaction control operation to a SQL string.
    pub fn serialize_transaction(&self, op: &Transaction) -> String {
        match op {
            Transaction::Start => match self.flavor {
                Flavor::Mysql => "START TRANSACTION",
                Flavor::SqlServer => "BEGIN TRANSACTION",
                Flavor::Sqlite | Flavor::Postgresql => "BEGIN",
            },
            Transaction::Commit => "COMMIT",
            Transaction::Rollback => "ROLLBACK",
        }
        .to_string()
    }

    fn render<P: Params>(
        &self,
        params: &mut P,
        f: impl FnOnce(&mut Formatter<'_, P>),
    ) -> Result<String> {
        let mut ret = String::new();

        let mut fmt = Formatter {
            serializer: self,
            dst: &mut ret,
            params,
            error: None,
            table_hint: None,
        };

        f(&mut fmt);

        match fmt.error {
            Some(err) => Err(err),
            None => Ok(ret),
        }
    }

    fn is_sqlite(&self) -> bool {
        matches!(self.flavor, Flavor::Sqlite)
    }

    fn is_sqlserver(&self) -> bool {
        matches!(self.flavor, Flavor::SqlServer)
    }
}

impl<T> Formatter<'_, T> {
    /// Records a failure. Only the first one is reported.
    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn flavor(&self) -> Flavor {
        self.serializer.flavor
    }
}

impl ToSql for &Statement {
    fn to_sql<P: Params>(self, f: &mut Formatter<'_, P>) {
        match self {
            Statement::Select(stmt) => stmt.to_sql(f),
            Statement::Insert(stmt) => stmt.to_sql(f),
            Statement::Update(stmt) => stmt.to_sql(f),
            Statement::Delete(stmt) => stmt.to_sql(f),
            Statement::CreateTable(stmt) => stmt.to_sql(f),
        }
    }
}
