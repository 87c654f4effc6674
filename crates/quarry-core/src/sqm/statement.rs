use super::{SqmExpr, SqmFrom, SqmParameters, SqmPath, SqmPredicate, SqmQuery};

#[derive(Debug, Clone, PartialEq)]
pub enum SqmStatement {
    Select(SqmSelectStatement),
    Update(SqmUpdateStatement),
    Delete(SqmDeleteStatement),
    Insert(SqmInsertStatement),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmSelectStatement {
    pub query: SqmQuery,
    pub params: SqmParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmUpdateStatement {
    pub target: SqmFrom,
    pub assignments: Vec<SqmAssignment>,
    pub where_: Option<SqmPredicate>,
    pub params: SqmParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmAssignment {
    pub path: SqmPath,
    pub value: SqmExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmDeleteStatement {
    pub target: SqmFrom,
    pub where_: Option<SqmPredicate>,
    pub params: SqmParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmInsertStatement {
    pub target: SqmFrom,

    /// Attribute paths receiving the inserted values, in order
    pub paths: Vec<SqmPath>,

    pub source: SqmInsertSource,
    pub params: SqmParameters,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqmInsertSource {
    Values(Vec<Vec<SqmExpr>>),
    Select(SqmQuery),
}

impl SqmStatement {
    pub fn params(&self) -> &SqmParameters {
        match self {
            SqmStatement::Select(stmt) => &stmt.params,
            SqmStatement::Update(stmt) => &stmt.params,
            SqmStatement::Delete(stmt) => &stmt.params,
            SqmStatement::Insert(stmt) => &stmt.params,
        }
    }

    pub fn params_mut(&mut self) -> &mut SqmParameters {
        match self {
            SqmStatement::Select(stmt) => &mut stmt.params,
            SqmStatement::Update(stmt) => &mut stmt.params,
            SqmStatement::Delete(stmt) => &mut stmt.params,
            SqmStatement::Insert(stmt) => &mut stmt.params,
        }
    }

    pub fn is_select(&self) -> bool {
        matches!(self, SqmStatement::Select(_))
    }

    pub fn into_select(self) -> Option<SqmSelectStatement> {
        match self {
            SqmStatement::Select(stmt) => Some(stmt),
            _ => None,
        }
    }
}

impl From<SqmSelectStatement> for SqmStatement {
    fn from(value: SqmSelectStatement) -> Self {
        SqmStatement::Select(value)
    }
}
