use super::{CteId, FromId, FromTy, SqmFrom};
use crate::{
    schema::app::{AttributeId, AttributeTy, EmbeddableId},
    stmt::Type,
    Error, Result, Schema,
};

/// A navigable path: a from element followed by resolved segments.
///
/// `p.address.city` is the from element of `p` with an attribute segment
/// (`address`) and an embeddable field segment (`city`). A path with no
/// segments is the identification variable itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SqmPath {
    pub from: FromId,
    pub segments: Vec<PathSegment>,

    /// Plural (collection-valued) paths are typed as `Type::List(element)`.
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Attribute(AttributeId),
    Field(EmbeddableId, usize),
    CteColumn(CteId, usize),
}

/// Resolves CTE column names while paths are being bound.
pub trait CteColumns {
    /// Index and type of the named column, including synthetic search and
    /// cycle columns.
    fn cte_column(&self, cte: CteId, name: &str) -> Option<(usize, Type)>;

    fn cte_name(&self, cte: CteId) -> String;
}

impl SqmPath {
    pub fn root(from: &SqmFrom) -> SqmPath {
        SqmPath {
            from: from.id,
            segments: vec![],
            ty: from.ty.path_ty(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_plural(&self) -> bool {
        matches!(self.ty, Type::List(_))
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// The attribute named by the last segment, if any.
    pub fn last_attribute(&self) -> Option<AttributeId> {
        match self.segments.last() {
            Some(PathSegment::Attribute(id)) => Some(*id),
            _ => None,
        }
    }

    /// The path without its last segment.
    pub fn parent(&self, schema: &Schema, from_ty: &FromTy) -> Option<SqmPath> {
        let (_, rest) = self.segments.split_last()?;
        let ty = match rest.last() {
            None => from_ty.path_ty(),
            Some(PathSegment::Attribute(id)) => schema.attribute(*id).expr_ty(),
            Some(PathSegment::Field(embeddable, index)) => {
                schema.app.embeddable(*embeddable).fields[*index].ty.clone()
            }
            Some(PathSegment::CteColumn(..)) => Type::Unknown,
        };
        Some(SqmPath {
            from: self.from,
            segments: rest.to_vec(),
            ty,
        })
    }

    /// Navigates to `name` from this path. `from_ty` describes the from
    /// element the path is rooted at.
    pub fn resolve(
        &self,
        schema: &Schema,
        ctes: &dyn CteColumns,
        from_ty: &FromTy,
        name: &str,
    ) -> Result<SqmPath> {
        if self.is_plural() {
            return Err(Error::semantic(format!(
                "cannot dereference plural attribute path; join it to reach `{name}`"
            )));
        }

        let base_ty = match (self.is_root(), from_ty) {
            (true, FromTy::Cte(cte)) => {
                let Some((index, ty)) = ctes.cte_column(*cte, name) else {
                    return Err(Error::semantic(format!(
                        "could not resolve attribute `{name}` of CTE `{}`",
                        ctes.cte_name(*cte)
                    )));
                };
                return Ok(self.push(PathSegment::CteColumn(*cte, index), ty));
            }
            (true, from_ty) => from_ty.path_ty(),
            (false, _) => self.ty.clone(),
        };

        match base_ty {
            Type::Entity(entity) => {
                let entity = schema.entity(entity);
                let Some(attr) = entity.attribute(name) else {
                    return Err(Error::semantic(format!(
                        "could not resolve attribute `{name}` of `{}`",
                        entity.name
                    )));
                };
                let ty = match &attr.ty {
                    AttributeTy::Collection(_) => Type::list(attr.expr_ty()),
                    _ => attr.expr_ty(),
                };
                Ok(self.push(PathSegment::Attribute(attr.id), ty))
            }
            Type::Embeddable(embeddable) => {
                let def = schema.app.embeddable(embeddable);
                let Some(index) = def.field_index(name) else {
                    return Err(Error::semantic(format!(
                        "could not resolve attribute `{name}` of embeddable `{}`",
                        def.name
                    )));
                };
                Ok(self.push(
                    PathSegment::Field(embeddable, index),
                    def.fields[index].ty.clone(),
                ))
            }
            ty => Err(Error::semantic(format!(
                "cannot dereference `{name}` from a path of type {ty:?}"
            ))),
        }
    }

    /// Resolves a dotted sequence of names.
    pub fn resolve_all<'a>(
        &self,
        schema: &Schema,
        ctes: &dyn CteColumns,
        from_ty: &FromTy,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<SqmPath> {
        let mut path = self.clone();
        for name in names {
            path = path.resolve(schema, ctes, from_ty, name)?;
        }
        Ok(path)
    }

    fn push(&self, segment: PathSegment, ty: Type) -> SqmPath {
        let mut segments = self.segments.clone();
        segments.push(segment);
        SqmPath {
            from: self.from,
            segments,
            ty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDef, EntityDef};
    use crate::sqm::FromSource;

    struct NoCtes;

    impl CteColumns for NoCtes {
        fn cte_column(&self, _: CteId, _: &str) -> Option<(usize, Type)> {
            None
        }

        fn cte_name(&self, _: CteId) -> String {
            String::new()
        }
    }

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder
            .embeddable("Address", [("city", Type::String), ("zip", Type::String)])
            .entity(
                EntityDef::new("Person")
                    .id("id", Type::I64)
                    .attribute(AttributeDef::embedded("address", "Address"))
                    .attribute(AttributeDef::many_to_one("employer", "Company"))
                    .attribute(AttributeDef::element_collection("nicknames", Type::String)),
            )
            .entity(
                EntityDef::new("Company")
                    .id("id", Type::I64)
                    .basic("name", Type::String),
            );
        builder.build().unwrap()
    }

    fn person_root(schema: &Schema) -> SqmFrom {
        let person = schema.entity_by_name("Person").unwrap().id;
        SqmFrom {
            id: FromId(0),
            alias: Some("p".into()),
            source: FromSource::Entity(person),
            ty: FromTy::Entity(person),
        }
    }

    #[test]
    fn resolves_embedded_and_to_one_navigation() {
        let schema = schema();
        let from = person_root(&schema);
        let root = SqmPath::root(&from);

        let city = root
            .resolve_all(&schema, &NoCtes, &from.ty, ["address", "city"])
            .unwrap();
        assert_eq!(city.ty, Type::String);
        assert_eq!(city.segments.len(), 2);

        let company = root
            .resolve_all(&schema, &NoCtes, &from.ty, ["employer", "name"])
            .unwrap();
        assert_eq!(company.ty, Type::String);
    }

    #[test]
    fn unknown_attribute_is_semantic_error() {
        let schema = schema();
        let from = person_root(&schema);

        let err = SqmPath::root(&from)
            .resolve(&schema, &NoCtes, &from.ty, "nme")
            .unwrap_err();
        assert!(err.is_semantic());
        assert_eq!(
            err.to_string(),
            "semantic error: could not resolve attribute `nme` of `Person`"
        );
    }

    #[test]
    fn plural_paths_cannot_be_dereferenced() {
        let schema = schema();
        let from = person_root(&schema);
        let nicknames = SqmPath::root(&from)
            .resolve(&schema, &NoCtes, &from.ty, "nicknames")
            .unwrap();

        assert!(nicknames.is_plural());
        assert!(nicknames
            .resolve(&schema, &NoCtes, &from.ty, "length")
            .unwrap_err()
            .is_semantic());
    }
}
