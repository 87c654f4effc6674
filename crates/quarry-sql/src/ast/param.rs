use quarry_core::{
    sqm::ParamId,
    stmt::{Type, Value},
};

/// A parameter slot in the rendered SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum JdbcParameter {
    /// Resolved from the statement's bindings at execution.
    ///
    /// A multi-valued parameter is expanded into one slot per list element
    /// before rendering; `element` then names the slot's position in the
    /// bound list.
    Query {
        id: ParamId,
        ty: Type,
        element: Option<usize>,
    },

    /// Bound to a value fixed when the tree was built: filter arguments,
    /// flush state, loader keys.
    Value(Value),
}

impl JdbcParameter {
    pub fn query(id: ParamId, ty: Type) -> JdbcParameter {
        JdbcParameter::Query {
            id,
            ty,
            element: None,
        }
    }

    pub fn as_query(&self) -> Option<ParamId> {
        match self {
            JdbcParameter::Query { id, .. } => Some(*id),
            JdbcParameter::Value(_) => None,
        }
    }
}
