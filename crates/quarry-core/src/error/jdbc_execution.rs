use super::Error;
use crate::stmt::Value;

/// Error when the database rejects a rendered statement.
///
/// Keeps the SQL text and the bound values next to the vendor error.
#[derive(Debug)]
pub(super) struct JdbcExecutionError {
    sql: Box<str>,
    params: Vec<Value>,
    cause: Error,
}

impl std::error::Error for JdbcExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl core::fmt::Display for JdbcExecutionError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "could not execute statement [{}] [{}] [",
            self.cause, self.sql
        )?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str("]")
    }
}

impl Error {
    /// Wraps a driver failure with the statement that caused it.
    pub fn jdbc_execution(sql: impl Into<String>, params: Vec<Value>, cause: Error) -> Error {
        Error::from(super::ErrorKind::JdbcExecution(JdbcExecutionError {
            sql: sql.into().into(),
            params,
            cause,
        }))
    }

    /// Returns `true` if this error wraps a failed statement execution.
    pub fn is_jdbc_execution(&self) -> bool {
        self.any_kind(|kind| matches!(kind, super::ErrorKind::JdbcExecution(_)))
    }

    /// Returns the SQL text of a failed statement, if this error carries one.
    pub fn sql(&self) -> Option<&str> {
        self.chain().find_map(|err| match err.kind() {
            super::ErrorKind::JdbcExecution(err) => Some(&*err.sql),
            _ => None,
        })
    }
}
