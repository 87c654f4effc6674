use quarry_core::{
    schema::app::EntityId,
    sqm::FromId,
    stmt::{Type, Value},
};

/// How the columns of a lowered select map back to domain results.
///
/// Built while the top-level query is lowered; positions index the select
/// list of the rendered statement.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelectionPlan {
    /// One reader per selection of the query
    pub(crate) results: Vec<ResultReader>,

    /// Entities read from each row: selected entities first, then fetched
    /// ones in join order
    pub(crate) entities: Vec<EntityReader>,

    pub(crate) fetches: Vec<FetchReader>,

    /// Column types handed to the driver for decoding
    pub(crate) columns: Vec<Type>,
}

#[derive(Debug, Clone)]
pub(crate) enum ResultReader {
    Scalar { position: usize },

    /// Several columns read back as one record (embeddables, tuples)
    Record { positions: Vec<usize> },

    /// Index into `SelectionPlan::entities`
    Entity(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct EntityReader {
    /// Static type of the from element; rows may hold any subtype
    pub(crate) entity: EntityId,

    pub(crate) from: FromId,

    /// Positions of the identifier columns
    pub(crate) key: Vec<usize>,

    pub(crate) concrete: ConcreteReader,

    /// Attribute readers of every concrete type the row may hold
    pub(crate) attributes: Vec<(EntityId, Vec<AttributeReader>)>,
}

/// Resolves the concrete type of a row.
#[derive(Debug, Clone)]
pub(crate) enum ConcreteReader {
    Fixed(EntityId),

    /// Single table: the discriminator column
    Discriminator {
        position: usize,
        values: Vec<(Value, EntityId)>,
    },

    /// Joined: the first subclass, deepest first, whose table key is
    /// present
    SubclassKeys {
        keys: Vec<(EntityId, usize)>,
        fallback: EntityId,
    },

    /// Union: the synthetic `clazz_` column
    Clazz {
        position: usize,
        entities: Vec<EntityId>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum AttributeReader {
    Value { position: usize },

    Embedded { positions: Vec<usize> },

    /// Foreign key of a to-one reference
    ToOne { position: usize },

    /// Inverse to-one and collections: nothing in the row
    Deferred,
}

#[derive(Debug, Clone)]
pub(crate) struct FetchReader {
    /// Entity reader of the owner
    pub(crate) owner: usize,

    pub(crate) attribute: usize,

    pub(crate) target: FetchTarget,
}

#[derive(Debug, Clone)]
pub(crate) enum FetchTarget {
    Entity(usize),
    Value { position: usize },
}

impl SelectionPlan {
    pub(crate) fn reader_for(&self, from: FromId) -> Option<usize> {
        self.entities.iter().position(|reader| reader.from == from)
    }

    /// Whether a fetched collection can repeat the owning row.
    pub(crate) fn fetches_collection(&self, schema: &quarry_core::Schema) -> bool {
        self.fetches.iter().any(|fetch| {
            let owner = self.entities[fetch.owner].entity;
            schema.entity(owner).attributes[fetch.attribute]
                .as_collection()
                .is_some()
        })
    }
}

impl ConcreteReader {
    pub(crate) fn resolve(&self, row: &[Value]) -> Option<EntityId> {
        match self {
            ConcreteReader::Fixed(entity) => Some(*entity),
            ConcreteReader::Discriminator { position, values } => values
                .iter()
                .find(|(value, _)| *value == row[*position])
                .map(|(_, entity)| *entity),
            ConcreteReader::SubclassKeys { keys, fallback } => Some(
                keys.iter()
                    .find(|(_, position)| !row[*position].is_null())
                    .map(|(entity, _)| *entity)
                    .unwrap_or(*fallback),
            ),
            ConcreteReader::Clazz { position, entities } => {
                let index = row[*position].to_i64().ok()?;
                entities.get(usize::try_from(index).ok()?).copied()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_rows_resolve_to_deepest_present_subclass() {
        let reader = ConcreteReader::SubclassKeys {
            keys: vec![(EntityId(2), 1), (EntityId(1), 2)],
            fallback: EntityId(0),
        };
        let row = vec![Value::I64(1), Value::Null, Value::I64(1)];
        assert_eq!(reader.resolve(&row), Some(EntityId(1)));

        let row = vec![Value::I64(1), Value::Null, Value::Null];
        assert_eq!(reader.resolve(&row), Some(EntityId(0)));
    }

    #[test]
    fn unknown_discriminator_has_no_type() {
        let reader = ConcreteReader::Discriminator {
            position: 0,
            values: vec![(Value::from("A"), EntityId(3))],
        };
        assert_eq!(reader.resolve(&[Value::from("A")]), Some(EntityId(3)));
        assert_eq!(reader.resolve(&[Value::from("B")]), None);
    }
}
