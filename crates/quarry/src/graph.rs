//! Entity graphs and the per-attribute fetch decision.

use quarry_core::{
    schema::app::{Attribute, AttributeTy, EntityId, FetchProfile, FetchStyle, FetchTiming},
    Error, Result, Schema,
};

use indexmap::IndexMap;

/// Names the attributes to fetch for one operation, with nested graphs for
/// the entities those attributes reach.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityGraph {
    entity: String,
    attributes: IndexMap<String, Option<EntityGraph>>,
}

/// How attributes the graph does not name are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphSemantic {
    /// Unnamed attributes keep their mapped fetch timing.
    Load,

    /// Unnamed attributes are lazy, whatever their mapping says.
    Fetch,
}

impl EntityGraph {
    pub fn new(entity: impl Into<String>) -> EntityGraph {
        EntityGraph {
            entity: entity.into(),
            attributes: IndexMap::new(),
        }
    }

    pub fn add_attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.entry(name.into()).or_insert(None);
        self
    }

    pub fn add_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self = self.add_attribute(name);
        }
        self
    }

    /// Names `attribute` and fetches the entities it reaches per `graph`.
    pub fn add_subgraph(mut self, attribute: impl Into<String>, graph: EntityGraph) -> Self {
        self.attributes.insert(attribute.into(), Some(graph));
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.attributes.contains_key(attribute)
    }

    pub fn subgraph(&self, attribute: &str) -> Option<&EntityGraph> {
        self.attributes.get(attribute)?.as_ref()
    }

    /// Checks every named attribute exists on the graph's entity, and that
    /// subgraphs hang off associations.
    pub(crate) fn validate(&self, schema: &Schema) -> Result<EntityId> {
        let Some(entity) = schema.entity_by_name(&self.entity) else {
            return Err(Error::illegal_argument(format!(
                "entity graph for unknown entity `{}`",
                self.entity
            )));
        };

        for (name, subgraph) in &self.attributes {
            let Some(attr) = schema.app.subtree(entity.id).into_iter().find_map(|id| {
                schema.entity(id).attribute(name)
            }) else {
                return Err(Error::illegal_argument(format!(
                    "entity graph names unknown attribute `{}.{name}`",
                    entity.name
                )));
            };

            if let Some(subgraph) = subgraph {
                let target = match &attr.ty {
                    AttributeTy::ToOne(to_one) => to_one.target,
                    AttributeTy::Collection(collection) => match collection.target() {
                        Some(target) => target,
                        None => {
                            return Err(Error::illegal_argument(format!(
                                "`{}.{name}` holds values and cannot have a subgraph",
                                entity.name
                            )))
                        }
                    },
                    _ => {
                        return Err(Error::illegal_argument(format!(
                            "`{}.{name}` is not an association and cannot have a subgraph",
                            entity.name
                        )))
                    }
                };
                let sub = subgraph.validate(schema)?;
                if !schema.app.is_subtype_of(sub, target)
                    && !schema.app.is_subtype_of(target, sub)
                {
                    return Err(Error::illegal_argument(format!(
                        "subgraph of `{}.{name}` is for unrelated entity `{}`",
                        entity.name, subgraph.entity
                    )));
                }
            }
        }

        Ok(entity.id)
    }
}

/// The graph in effect for one entity instance being loaded.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphNode<'a> {
    pub(crate) graph: &'a EntityGraph,
    pub(crate) semantic: GraphSemantic,
}

/// Outcome of the fetch decision for one association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fetch {
    /// Initialize right after the owner is loaded
    Eager(FetchStyle),

    /// Initialize on first access
    Lazy(FetchStyle),
}

/// Decides when and how associations are fetched: an explicit graph beats
/// an enabled fetch profile, which beats the static mapping.
#[derive(Debug)]
pub(crate) struct FetchPolicy<'a> {
    schema: &'a Schema,
    profiles: Vec<&'a FetchProfile>,
    default_batch: Option<usize>,
}

impl<'a> GraphNode<'a> {
    /// The node for entities reached through `attribute`. A named attribute
    /// without a subgraph yields an empty node, so a fetch graph keeps
    /// everything below it lazy.
    pub(crate) fn child(&self, attribute: &str, empty: &'a EntityGraph) -> Option<GraphNode<'a>> {
        if !self.graph.contains(attribute) {
            return None;
        }
        Some(GraphNode {
            graph: self.graph.subgraph(attribute).unwrap_or(empty),
            semantic: self.semantic,
        })
    }
}

impl<'a> FetchPolicy<'a> {
    pub(crate) fn new(
        schema: &'a Schema,
        profiles: impl IntoIterator<Item = &'a FetchProfile>,
        default_batch: Option<usize>,
    ) -> FetchPolicy<'a> {
        FetchPolicy {
            schema,
            profiles: profiles.into_iter().collect(),
            default_batch,
        }
    }

    pub(crate) fn decide(&self, attr: &Attribute, node: Option<GraphNode<'_>>) -> Fetch {
        if let Some(node) = node {
            if node.graph.contains(&attr.name) {
                return Fetch::Eager(self.graph_style(attr));
            }
            if node.semantic == GraphSemantic::Fetch {
                return Fetch::Lazy(self.mapped_style(attr));
            }
        }

        for profile in &self.profiles {
            let item = profile.items.iter().find(|item| {
                let named = self.schema.attribute(item.attribute);
                named.declaring == attr.declaring && item.attribute.index == attr.id.index
            });
            if let Some(item) = item {
                return Fetch::Eager(item.style);
            }
        }

        match attr.fetch_timing() {
            FetchTiming::Eager => Fetch::Eager(self.mapped_style(attr)),
            FetchTiming::Lazy => Fetch::Lazy(self.mapped_style(attr)),
        }
    }

    /// Style from the mapping, with plain select fetching upgraded to batch
    /// fetching when a batch size applies.
    pub(crate) fn mapped_style(&self, attr: &Attribute) -> FetchStyle {
        let (style, entity_batch) = match &attr.ty {
            AttributeTy::Collection(collection) => (collection.style, None),
            AttributeTy::ToOne(to_one) => (
                FetchStyle::Select,
                self.schema.entity(self.schema.entity(to_one.target).root).batch_size,
            ),
            _ => (FetchStyle::Select, None),
        };

        match style {
            FetchStyle::Select => match entity_batch.or(self.default_batch) {
                Some(size) if size > 1 => FetchStyle::Batch(size),
                _ => FetchStyle::Select,
            },
            style => style,
        }
    }

    /// How many proxies of the hierarchy rooted at `root` one load may
    /// initialize together.
    pub(crate) fn entity_batch_size(&self, root: EntityId) -> Option<usize> {
        self.schema
            .entity(root)
            .batch_size
            .or(self.default_batch)
            .filter(|size| *size > 1)
    }

    /// Graph-named collections are loaded for every owner of the result at
    /// once; to-one references are batched by key.
    fn graph_style(&self, attr: &Attribute) -> FetchStyle {
        match &attr.ty {
            AttributeTy::Collection(_) => FetchStyle::Subselect,
            _ => self.mapped_style(attr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{
        schema::{AttributeDef, EntityDef, FetchProfileDef},
        stmt::Type,
    };

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder
            .entity(
                EntityDef::new("Company")
                    .id("id", Type::I64)
                    .basic("location", Type::String)
                    .attribute(AttributeDef::element_collection("phoneNumbers", Type::String).eager())
                    .attribute(AttributeDef::one_to_many("employees", "Employee").mapped_by("company")),
            )
            .entity(
                EntityDef::new("Employee")
                    .id("id", Type::I64)
                    .attribute(AttributeDef::many_to_one("company", "Company")),
            )
            .fetch_profile(FetchProfileDef::new("withEmployees").fetch(
                "Company",
                "employees",
                FetchStyle::Join,
            ));
        builder.build().unwrap()
    }

    #[test]
    fn load_and_fetch_graphs_differ_on_unnamed_attributes() {
        let schema = schema();
        let company = schema.entity_by_name("Company").unwrap();
        let phones = company.attribute("phoneNumbers").unwrap();
        let employees = company.attribute("employees").unwrap();
        let policy = FetchPolicy::new(&schema, [], None);
        let graph = EntityGraph::new("Company").add_attribute("location");

        let load = GraphNode {
            graph: &graph,
            semantic: GraphSemantic::Load,
        };
        assert!(matches!(policy.decide(phones, Some(load)), Fetch::Eager(_)));
        assert!(matches!(policy.decide(employees, Some(load)), Fetch::Lazy(_)));

        let fetch = GraphNode {
            graph: &graph,
            semantic: GraphSemantic::Fetch,
        };
        assert!(matches!(policy.decide(phones, Some(fetch)), Fetch::Lazy(_)));
    }

    #[test]
    fn graph_beats_profile_beats_mapping() {
        let schema = schema();
        let company = schema.entity_by_name("Company").unwrap();
        let employees = company.attribute("employees").unwrap();
        let profile = schema.app.fetch_profile("withEmployees").unwrap();
        let policy = FetchPolicy::new(&schema, [profile], None);

        assert_eq!(policy.decide(employees, None), Fetch::Eager(FetchStyle::Join));

        let graph = EntityGraph::new("Company").add_attribute("location");
        let node = GraphNode {
            graph: &graph,
            semantic: GraphSemantic::Fetch,
        };
        assert!(matches!(policy.decide(employees, Some(node)), Fetch::Lazy(_)));
    }

    #[test]
    fn default_batch_size_upgrades_select_fetching() {
        let schema = schema();
        let employee = schema.entity_by_name("Employee").unwrap();
        let company = employee.attribute("company").unwrap();

        let policy = FetchPolicy::new(&schema, [], Some(16));
        assert_eq!(policy.mapped_style(company), FetchStyle::Batch(16));
    }

    #[test]
    fn unknown_graph_attribute_is_rejected() {
        let schema = schema();
        let err = EntityGraph::new("Company")
            .add_attribute("nope")
            .validate(&schema)
            .unwrap_err();
        assert!(err.is_illegal_argument());
    }
}
