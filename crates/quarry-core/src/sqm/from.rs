use super::{CteId, PathSegment, SqmPath, SqmPredicate};
use crate::{
    schema::app::{AttributeId, AttributeTy, CollectionKind, EntityId},
    stmt::Type,
    Error, Result, Schema,
};

use std::fmt;

/// Identifies a from element within a statement, including nested
/// subqueries, so correlated references stay unambiguous.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FromId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct SqmFrom {
    pub id: FromId,

    /// Identification variable, if the query declared one
    pub alias: Option<String>,

    pub source: FromSource,

    /// What a path rooted at this element evaluates to
    pub ty: FromTy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromSource {
    /// An entity, polymorphic over its subclasses
    Entity(EntityId),

    /// A CTE declared by an enclosing query
    Cte(CteId),

    /// An association or element collection of another from element
    Attribute { lhs: FromId, attribute: AttributeId },

    /// An entity-valued column of a CTE
    CteColumn {
        lhs: FromId,
        cte: CteId,
        column: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromTy {
    Entity(EntityId),
    Cte(CteId),

    /// Rows of an element collection
    Element(Type),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqmFromClause {
    pub roots: Vec<SqmRoot>,
}

/// A root of the from clause with every join hanging off it, in
/// declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqmRoot {
    pub from: SqmFrom,
    pub joins: Vec<SqmJoin>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqmJoin {
    pub from: SqmFrom,
    pub kind: JoinKind,

    /// Fetch joins initialize the association on the owning entity
    pub fetch: bool,

    pub on: Option<SqmPredicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

impl FromTy {
    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            FromTy::Entity(id) => Some(*id),
            _ => None,
        }
    }

    /// Type of the bare identification variable used as an expression.
    pub fn path_ty(&self) -> Type {
        match self {
            FromTy::Entity(id) => Type::Entity(*id),
            FromTy::Cte(_) => Type::Unknown,
            FromTy::Element(ty) => ty.clone(),
        }
    }
}

impl FromSource {
    /// Source and type of a from element reached by joining `path`: an
    /// association, an element collection, or an entity-valued CTE column.
    pub fn join_target(schema: &Schema, path: &SqmPath) -> Result<(FromSource, FromTy)> {
        match path.last() {
            Some(PathSegment::Attribute(attribute)) => {
                let attr = schema.attribute(*attribute);
                let ty = match &attr.ty {
                    AttributeTy::ToOne(to_one) => FromTy::Entity(to_one.target),
                    AttributeTy::Collection(collection) => match &collection.kind {
                        CollectionKind::Element { ty } => FromTy::Element(ty.clone()),
                        _ => FromTy::Entity(collection.target().unwrap_or(attribute.entity)),
                    },
                    _ => {
                        return Err(Error::semantic(format!(
                            "`{}` is not an association and cannot be joined",
                            schema.role(*attribute)
                        )))
                    }
                };
                Ok((
                    FromSource::Attribute {
                        lhs: path.from,
                        attribute: *attribute,
                    },
                    ty,
                ))
            }
            Some(PathSegment::CteColumn(cte, column)) => match &path.ty {
                Type::Entity(entity) => Ok((
                    FromSource::CteColumn {
                        lhs: path.from,
                        cte: *cte,
                        column: *column,
                    },
                    FromTy::Entity(*entity),
                )),
                ty => Err(Error::semantic(format!(
                    "CTE attribute of type {ty:?} is not entity-valued and cannot be joined"
                ))),
            },
            _ => Err(Error::semantic("only attribute paths can be joined")),
        }
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self, FromSource::Attribute { .. })
    }
}

impl SqmFromClause {
    /// Every from element, roots before their joins.
    pub fn froms(&self) -> impl Iterator<Item = &SqmFrom> + '_ {
        self.roots.iter().flat_map(|root| {
            std::iter::once(&root.from).chain(root.joins.iter().map(|join| &join.from))
        })
    }

    pub fn find(&self, id: FromId) -> Option<&SqmFrom> {
        self.froms().find(|from| from.id == id)
    }

    pub fn find_join_mut(&mut self, id: FromId) -> Option<&mut SqmJoin> {
        self.roots
            .iter_mut()
            .flat_map(|root| root.joins.iter_mut())
            .find(|join| join.from.id == id)
    }
}

impl fmt::Debug for FromId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "FromId({})", self.0)
    }
}
