use crate::{stmt::ValueStream, Error, Result};

#[derive(Debug)]
pub struct Response {
    pub rows: Rows,
}

#[derive(Debug)]
pub enum Rows {
    /// Number of rows impacted by the operation
    Count(u64),

    /// Operation result, as a stream of rows
    Values(ValueStream),
}

impl Response {
    pub fn count(count: u64) -> Self {
        Self {
            rows: Rows::Count(count),
        }
    }

    pub fn value_stream(values: impl Into<ValueStream>) -> Self {
        Self {
            rows: Rows::value_stream(values),
        }
    }
}

impl Rows {
    pub fn value_stream(values: impl Into<ValueStream>) -> Self {
        Self::Values(values.into())
    }

    pub fn into_count(self) -> Result<u64> {
        match self {
            Rows::Count(count) => Ok(count),
            Rows::Values(_) => Err(Error::sql_ast_syntax(
                "expected an update count, the statement returned rows",
            )),
        }
    }

    pub fn into_values(self) -> Result<ValueStream> {
        match self {
            Self::Values(values) => Ok(values),
            Self::Count(_) => Err(Error::sql_ast_syntax(
                "expected rows, the statement returned an update count",
            )),
        }
    }
}
