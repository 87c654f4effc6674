mod def;
pub use def::{AttributeDef, EntityDef, FetchProfileDef, FilterDef};
use def::AttributeDefKind;

use super::{
    app::{
        self, Attribute, AttributeId, AttributeTy, CacheConfig, Collection, CollectionKind,
        EmbeddableId, Entity, EntityId, FetchStyle, FetchTiming, IdStrategy, InheritanceType,
        ToOne, ToOneKind,
    },
    db::{self, ColumnId, Table, TableId},
    mapping::{
        CollectionMapping, ElementMapping, EntityMapping, EntityTable, EntityTableKind, Formula,
        Mapping, ToOneMapping, ValueMapping,
    },
    Schema,
};
use crate::{stmt::Type, Error, Result};

use indexmap::IndexMap;
use std::collections::HashMap;

/// Collects entity, embeddable, filter, and fetch profile definitions and
/// binds them into an immutable [`Schema`].
#[derive(Debug, Default)]
pub struct Builder {
    entities: Vec<EntityDef>,
    embeddables: Vec<(String, Vec<(String, Type)>)>,
    filters: Vec<FilterDef>,
    fetch_profiles: Vec<FetchProfileDef>,

    /// If set, prefix all table names with this string
    table_name_prefix: Option<String>,
}

/// Used to track state during the build process
struct BuildSchema<'a> {
    /// Build options
    builder: &'a Builder,

    app: app::Schema,

    /// Entity definitions by entity id
    defs: Vec<&'a EntityDef>,

    /// Maps table names to identifiers
    table_lookup: IndexMap<String, TableId>,

    /// Tables as they are built
    tables: Vec<Table>,

    /// Mappings by entity id, filled in hierarchy order
    mappings: Vec<Option<EntityMapping>>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&mut self, entity: EntityDef) -> &mut Self {
        self.entities.push(entity);
        self
    }

    /// Registers an embeddable value type with its `(field, type)` list.
    pub fn embeddable<'a>(
        &mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (&'a str, Type)>,
    ) -> &mut Self {
        let fields = fields
            .into_iter()
            .map(|(name, ty)| (name.to_string(), ty))
            .collect();
        self.embeddables.push((name.into(), fields));
        self
    }

    pub fn filter(&mut self, filter: FilterDef) -> &mut Self {
        self.filters.push(filter);
        self
    }

    pub fn fetch_profile(&mut self, profile: FetchProfileDef) -> &mut Self {
        self.fetch_profiles.push(profile);
        self
    }

    pub fn table_name_prefix(&mut self, prefix: &str) -> &mut Self {
        self.table_name_prefix = Some(prefix.to_string());
        self
    }

    /// Binds the definitions. Invalid combinations are rejected here, before
    /// any query can run.
    pub fn build(&self) -> Result<Schema> {
        let mut builder = BuildSchema {
            builder: self,
            app: app::Schema::default(),
            defs: vec![],
            table_lookup: IndexMap::new(),
            tables: vec![],
            mappings: vec![],
        };

        builder.build_embeddables()?;
        builder.build_entity_shells()?;
        builder.build_hierarchies()?;

        for id in builder.hierarchy_order() {
            builder.build_attributes(id)?;
        }

        builder.verify_associations()?;

        for root in builder.roots() {
            builder.build_tables_for_hierarchy(root)?;
        }

        builder.build_collection_mappings()?;
        builder.build_filters()?;
        builder.build_fetch_profiles()?;

        let mapping = Mapping {
            entities: builder
                .mappings
                .into_iter()
                .enumerate()
                .map(|(i, mapping)| {
                    mapping.ok_or_else(|| Error::mapping(format!("entity #{i} has no tables")))
                })
                .collect::<Result<_>>()?,
        };

        let schema = Schema {
            app: builder.app,
            db: db::Schema {
                tables: builder.tables,
            },
            mapping,
        };

        schema.verify_filter_conditions()?;

        Ok(schema)
    }
}

impl<'a> BuildSchema<'a> {
    fn build_embeddables(&mut self) -> Result<()> {
        for (name, fields) in &self.builder.embeddables {
            if self.app.embeddables.iter().any(|e| &e.name == name) {
                return Err(Error::mapping(format!("duplicate embeddable `{name}`")));
            }

            self.app.embeddables.push(app::Embeddable {
                id: EmbeddableId(self.app.embeddables.len()),
                name: name.clone(),
                fields: fields
                    .iter()
                    .map(|(name, ty)| app::EmbeddableField {
                        name: name.clone(),
                        ty: ty.clone(),
                    })
                    .collect(),
            });
        }

        Ok(())
    }

    fn build_entity_shells(&mut self) -> Result<()> {
        for def in &self.builder.entities {
            if self.app.entity_by_name(&def.name).is_some() {
                return Err(Error::mapping(format!("duplicate entity `{}`", def.name)));
            }

            let id = EntityId(self.app.entities.len());

            self.app.entities.push(Entity {
                id,
                name: def.name.clone(),
                parent: None,
                subclasses: vec![],
                root: id,
                is_abstract: def.is_abstract,
                inheritance: None,
                discriminator_value: None,
                identifier: app::Identifier {
                    attribute: usize::MAX,
                    strategy: IdStrategy::Assigned,
                },
                attributes: vec![],
                version: None,
                tenant: None,
                soft_delete: None,
                cache: None,
                batch_size: def.batch_size,
                filters: vec![],
                immutable: def.immutable,
            });
            self.defs.push(def);
            self.mappings.push(None);
        }

        Ok(())
    }

    fn entity_id(&self, name: &str, referenced_by: &str) -> Result<EntityId> {
        self.app.entity_by_name(name).map(|e| e.id).ok_or_else(|| {
            Error::mapping(format!(
                "`{referenced_by}` references unknown entity `{name}`"
            ))
        })
    }

    fn build_hierarchies(&mut self) -> Result<()> {
        for i in 0..self.defs.len() {
            let def = self.defs[i];
            if let Some(parent) = &def.extends {
                let parent = self.entity_id(parent, &def.name)?;
                self.app.entities[i].parent = Some(parent);
                self.app.entities[parent.0].subclasses.push(EntityId(i));
            }
        }

        for i in 0..self.defs.len() {
            let mut root = EntityId(i);
            let mut depth = 0;
            while let Some(parent) = self.app.entities[root.0].parent {
                root = parent;
                depth += 1;
                if depth > self.defs.len() {
                    return Err(Error::mapping(format!(
                        "inheritance cycle involving `{}`",
                        self.defs[i].name
                    )));
                }
            }
            self.app.entities[i].root = root;

            if root.0 != i && self.defs[i].inheritance.is_some() {
                return Err(Error::mapping(format!(
                    "`{}` declares an inheritance strategy but is not a hierarchy root",
                    self.defs[i].name
                )));
            }
            if root.0 != i && self.defs[i].soft_delete.is_some() {
                return Err(Error::mapping(format!(
                    "`{}`: soft delete must be declared on the hierarchy root",
                    self.defs[i].name
                )));
            }
        }

        for i in 0..self.defs.len() {
            let root = self.app.entities[i].root;
            let root_def = self.defs[root.0];
            let in_hierarchy = !self.app.entities[root.0].subclasses.is_empty();

            let inheritance = match root_def.inheritance {
                Some(strategy) => Some(strategy),
                None if in_hierarchy => Some(InheritanceType::SingleTable),
                None => None,
            };

            let entity = &mut self.app.entities[i];
            entity.inheritance = inheritance;

            if inheritance == Some(InheritanceType::SingleTable) && !entity.is_abstract {
                let ty = root_def
                    .discriminator_column
                    .as_ref()
                    .map(|(_, ty)| ty.clone())
                    .unwrap_or(Type::String);

                entity.discriminator_value = match &self.defs[i].discriminator_value {
                    Some(value) if value.is_a(&ty) => Some(ty.cast(value.clone())?),
                    Some(_) => {
                        return Err(Error::mapping(format!(
                            "discriminator value of `{}` does not match the column type {ty:?}",
                            entity.name
                        )))
                    }
                    None if ty.is_string() => Some(entity.name.clone().into()),
                    None => {
                        return Err(Error::mapping(format!(
                            "`{}` needs an explicit discriminator value",
                            entity.name
                        )))
                    }
                };
            }

            entity.soft_delete = root_def.soft_delete.clone();
            entity.cache = root_def.cache.map(|access| CacheConfig {
                access,
                region: root_def.name.clone(),
            });
        }

        Ok(())
    }

    /// Entity ids ordered so that parents come before their subclasses.
    fn hierarchy_order(&self) -> Vec<EntityId> {
        self.roots()
            .into_iter()
            .flat_map(|root| self.app.subtree(root))
            .collect()
    }

    fn roots(&self) -> Vec<EntityId> {
        self.app
            .entities
            .iter()
            .filter(|entity| entity.is_root())
            .map(|entity| entity.id)
            .collect()
    }

    fn build_attributes(&mut self, id: EntityId) -> Result<()> {
        let def = self.defs[id.0];
        let parent = self.app.entities[id.0].parent;

        let mut attributes = vec![];
        let mut identifier = None;
        let mut version = None;
        let mut tenant = None;
        let mut filters = vec![];

        if let Some(parent) = parent {
            let parent = &self.app.entities[parent.0];
            for attr in &parent.attributes {
                let mut attr = attr.clone();
                attr.id.entity = id;
                attributes.push(attr);
            }
            identifier = Some(parent.identifier.clone());
            version = parent.version;
            tenant = parent.tenant;
            filters = parent.filters.clone();
            let batch_size = parent.batch_size;
            let entity = &mut self.app.entities[id.0];
            entity.batch_size = entity.batch_size.or(batch_size);
        }

        for attr_def in &def.attributes {
            if attributes.iter().any(|a: &Attribute| a.name == attr_def.name) {
                return Err(Error::mapping(format!(
                    "duplicate attribute `{}.{}`",
                    def.name, attr_def.name
                )));
            }

            let index = attributes.len();
            let role = format!("{}.{}", def.name, attr_def.name);

            if let Some(strategy) = attr_def.id {
                if identifier.is_some() {
                    return Err(Error::mapping(format!(
                        "`{}` declares more than one identifier",
                        def.name
                    )));
                }
                if !matches!(attr_def.kind, AttributeDefKind::Basic(_)) {
                    return Err(Error::mapping(format!("identifier `{role}` must be basic")));
                }
                identifier = Some(app::Identifier {
                    attribute: index,
                    strategy,
                });
            }

            if attr_def.version {
                match &attr_def.kind {
                    AttributeDefKind::Basic(ty) if ty.is_integer() => version = Some(index),
                    _ => {
                        return Err(Error::mapping(format!(
                            "version attribute `{role}` must be an integer"
                        )))
                    }
                }
            }

            if attr_def.tenant {
                if !matches!(attr_def.kind, AttributeDefKind::Basic(_)) {
                    return Err(Error::mapping(format!(
                        "tenant attribute `{role}` must be basic"
                    )));
                }
                tenant = Some(index);
            }

            let ty = self.attribute_ty(attr_def, &role)?;

            attributes.push(Attribute {
                id: AttributeId { entity: id, index },
                name: attr_def.name.clone(),
                declaring: id,
                ty,
                nullable: attr_def.nullable && attr_def.id.is_none(),
            });
        }

        let Some(identifier) = identifier else {
            return Err(Error::mapping(format!(
                "entity `{}` has no identifier",
                def.name
            )));
        };

        if identifier.strategy == IdStrategy::Identity
            && self.app.entities[id.0].inheritance == Some(InheritanceType::Union)
        {
            return Err(Error::mapping(format!(
                "`{}`: identity generation cannot be used with union inheritance",
                def.name
            )));
        }

        for (name, condition) in &def.filters {
            filters.retain(|f: &app::EntityFilter| &f.name != name);
            filters.push(app::EntityFilter {
                name: name.clone(),
                condition: condition.clone().unwrap_or_default(),
            });
        }

        let entity = &mut self.app.entities[id.0];
        entity.attributes = attributes;
        entity.identifier = identifier;
        entity.version = version;
        entity.tenant = tenant;
        entity.filters = filters;

        Ok(())
    }

    fn attribute_ty(&self, def: &AttributeDef, role: &str) -> Result<AttributeTy> {
        let collection = |kind: CollectionKind| -> Result<AttributeTy> {
            let style = def.style.unwrap_or(FetchStyle::Select);
            let fetch = match (def.fetch, style) {
                (Some(fetch), _) => fetch,
                (None, FetchStyle::Join) => FetchTiming::Eager,
                (None, _) => FetchTiming::Lazy,
            };

            if let FetchStyle::Batch(0) = style {
                return Err(Error::mapping(format!("`{role}`: batch size must be positive")));
            }

            Ok(AttributeTy::Collection(Collection {
                kind,
                fetch,
                style,
                cascade: def.cascade,
                orphan_removal: def.orphan_removal,
                ordering: def.ordering.clone(),
                soft_delete: def.soft_delete.clone(),
                cache: def.cache.map(|access| CacheConfig {
                    access,
                    region: role.to_string(),
                }),
            }))
        };

        let to_one = |target: &str, kind: ToOneKind| -> Result<AttributeTy> {
            Ok(AttributeTy::ToOne(ToOne {
                target: self.entity_id(target, role)?,
                kind,
                mapped_by: def.mapped_by.clone(),
                fetch: def.fetch.unwrap_or(FetchTiming::Eager),
                cascade: def.cascade,
            }))
        };

        match &def.kind {
            AttributeDefKind::Basic(ty) => Ok(AttributeTy::Basic(app::Basic { ty: ty.clone() })),
            AttributeDefKind::Embedded(name) => {
                let embeddable = self
                    .app
                    .embeddables
                    .iter()
                    .find(|e| &e.name == name)
                    .ok_or_else(|| {
                        Error::mapping(format!("`{role}` references unknown embeddable `{name}`"))
                    })?;
                Ok(AttributeTy::Embedded(app::Embedded {
                    embeddable: embeddable.id,
                }))
            }
            AttributeDefKind::ManyToOne(target) => to_one(target, ToOneKind::ManyToOne),
            AttributeDefKind::OneToOne(target) => to_one(target, ToOneKind::OneToOne),
            AttributeDefKind::OneToMany(target) => {
                if def.soft_delete.is_some() {
                    return Err(Error::mapping(format!(
                        "`{role}`: soft delete is not supported on one-to-many collections; \
                         declare it on the target entity instead"
                    )));
                }
                collection(CollectionKind::OneToMany {
                    target: self.entity_id(target, role)?,
                    mapped_by: def.mapped_by.clone(),
                })
            }
            AttributeDefKind::ManyToMany(target) => collection(CollectionKind::ManyToMany {
                target: self.entity_id(target, role)?,
            }),
            AttributeDefKind::Element(ty) => collection(CollectionKind::Element { ty: ty.clone() }),
        }
    }

    fn verify_associations(&self) -> Result<()> {
        for entity in &self.app.entities {
            for attr in entity.declared_attributes() {
                let role = format!("{}.{}", entity.name, attr.name);

                match &attr.ty {
                    AttributeTy::ToOne(to_one) => {
                        if let Some(mapped_by) = &to_one.mapped_by {
                            let target = self.app.entity(to_one.target);
                            let owning = target.attribute(mapped_by).and_then(|a| a.as_to_one());
                            match owning {
                                Some(owning) if owning.mapped_by.is_none() => {}
                                _ => {
                                    return Err(Error::mapping(format!(
                                        "`{role}` is mapped by `{}.{mapped_by}`, which is not an owning to-one",
                                        target.name
                                    )))
                                }
                            }
                        }
                    }
                    AttributeTy::Collection(collection) => {
                        if let CollectionKind::OneToMany {
                            target,
                            mapped_by: Some(mapped_by),
                        } = &collection.kind
                        {
                            let target = self.app.entity(*target);
                            let back = target.attribute(mapped_by).and_then(|a| a.as_to_one());
                            match back {
                                Some(back)
                                    if back.mapped_by.is_none()
                                        && self.app.is_subtype_of(entity.id, back.target) => {}
                                _ => {
                                    return Err(Error::mapping(format!(
                                        "`{role}` is mapped by `{}.{mapped_by}`, which is not a to-one referencing `{}`",
                                        target.name, entity.name
                                    )))
                                }
                            }
                        }

                        if let Some(app::Ordering::OrderBy {
                            attribute: Some(attribute),
                            ..
                        }) = &collection.ordering
                        {
                            let known = collection
                                .target()
                                .map(|target| self.app.entity(target).attribute(attribute).is_some())
                                .unwrap_or(false);
                            if !known {
                                return Err(Error::mapping(format!(
                                    "`{role}` is ordered by unknown element attribute `{attribute}`"
                                )));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    fn table_name(&self, name: &str) -> String {
        match &self.builder.table_name_prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_string(),
        }
    }

    /// Returns the table with the given name, creating it when missing.
    fn table(&mut self, name: &str) -> TableId {
        let name = self.table_name(name);
        if let Some(id) = self.table_lookup.get(&name) {
            return *id;
        }

        let id = TableId(self.tables.len());
        self.tables.push(Table::new(id, name.clone()));
        self.table_lookup.insert(name, id);
        id
    }

    fn new_table(&mut self, name: &str) -> Result<TableId> {
        if self.table_lookup.contains_key(&self.table_name(name)) {
            return Err(Error::mapping(format!("table `{name}` is mapped twice")));
        }
        Ok(self.table(name))
    }

    fn entity_table_name(&self, id: EntityId) -> String {
        self.defs[id.0]
            .table
            .clone()
            .unwrap_or_else(|| self.defs[id.0].name.clone())
    }

    fn attr_def(&self, entity: EntityId, name: &str) -> Result<&'a AttributeDef> {
        let declaring = self.app.entities[entity.0]
            .attribute(name)
            .map(|attr| attr.declaring)
            .unwrap_or(entity);
        self.defs[declaring.0]
            .attributes
            .iter()
            .find(|def| def.name == name)
            .ok_or_else(|| {
                Error::mapping(format!(
                    "`{}.{name}` has no definition",
                    self.defs[declaring.0].name
                ))
            })
    }

    /// Adds the identifier columns of `root` to `table`.
    fn add_key_columns(&mut self, table: TableId, root: EntityId, generated: bool) -> Result<Vec<ColumnId>> {
        let entity = &self.app.entities[root.0];
        let id_attr = entity.id_attribute();
        let name = self
            .attr_def(root, &id_attr.name)?
            .column
            .clone()
            .unwrap_or_else(|| id_attr.name.clone());
        let ty = id_attr.expr_ty();
        let auto_increment = generated && entity.identifier.strategy == IdStrategy::Identity;

        let table = &mut self.tables[table.0];
        let column = table.add_column(&name, ty, false);
        let col = table.column_mut(column);
        col.primary_key = true;
        col.auto_increment = auto_increment;
        table.primary_key = vec![column];
        Ok(vec![column])
    }

    fn build_tables_for_hierarchy(&mut self, root: EntityId) -> Result<()> {
        let strategy = self.app.entities[root.0].inheritance;

        match strategy {
            None | Some(InheritanceType::SingleTable) => self.build_single_table(root),
            Some(InheritanceType::Joined) => self.build_joined(root),
            Some(InheritanceType::Union) => self.build_union(root),
        }
    }

    fn build_single_table(&mut self, root: EntityId) -> Result<()> {
        let name = self.entity_table_name(root);
        let table = self.new_table(&name)?;
        let key = self.add_key_columns(table, root, true)?;

        let discriminator = match self.app.entities[root.0].inheritance {
            Some(InheritanceType::SingleTable) => {
                let (name, ty) = self.defs[root.0]
                    .discriminator_column
                    .clone()
                    .unwrap_or_else(|| ("dtype".to_string(), Type::String));
                Some(self.tables[table.0].add_column(&name, ty, false))
            }
            _ => None,
        };

        let soft_delete = self.add_soft_delete_column(root, table);

        for id in self.app.subtree(root) {
            let mut tables = match self.app.entities[id.0].parent {
                Some(parent) => self.mapping(parent)?.tables.clone(),
                None => vec![EntityTable {
                    table,
                    key: key.clone(),
                    kind: EntityTableKind::Root,
                }],
            };

            let attributes = self.map_attributes(id, table, &mut tables, id != root)?;

            self.mappings[id.0] = Some(EntityMapping {
                entity: id,
                tables,
                discriminator,
                soft_delete,
                attributes,
            });
        }

        Ok(())
    }

    fn build_joined(&mut self, root: EntityId) -> Result<()> {
        let root_name = self.entity_table_name(root);
        let root_table = self.new_table(&root_name)?;
        let root_key = self.add_key_columns(root_table, root, true)?;
        let soft_delete = self.add_soft_delete_column(root, root_table);

        for id in self.app.subtree(root) {
            let (home, mut tables) = match self.app.entities[id.0].parent {
                None => (
                    root_table,
                    vec![EntityTable {
                        table: root_table,
                        key: root_key.clone(),
                        kind: EntityTableKind::Root,
                    }],
                ),
                Some(parent) => {
                    let name = self.entity_table_name(id);
                    let table = self.new_table(&name)?;
                    let key = self.add_key_columns(table, root, false)?;

                    let mut tables = self.mapping(parent)?.tables.clone();
                    let insert_at = tables
                        .iter()
                        .position(|t| t.kind == EntityTableKind::Secondary)
                        .unwrap_or(tables.len());
                    tables.insert(
                        insert_at,
                        EntityTable {
                            table,
                            key,
                            kind: EntityTableKind::Subclass(id),
                        },
                    );
                    (table, tables)
                }
            };

            let attributes = self.map_attributes(id, home, &mut tables, false)?;

            self.mappings[id.0] = Some(EntityMapping {
                entity: id,
                tables,
                discriminator: None,
                soft_delete,
                attributes,
            });
        }

        Ok(())
    }

    fn build_union(&mut self, root: EntityId) -> Result<()> {
        let subtree = self.app.subtree(root);

        for &id in &subtree {
            if self.app.entities[id.0].is_abstract {
                continue;
            }

            let name = self.entity_table_name(id);
            let table = self.new_table(&name)?;
            let key = self.add_key_columns(table, root, false)?;
            let soft_delete = self.add_soft_delete_column(root, table);

            let mut tables = vec![EntityTable {
                table,
                key,
                kind: EntityTableKind::Root,
            }];

            let attributes = self.map_all_attributes(id, table, &mut tables)?;

            self.mappings[id.0] = Some(EntityMapping {
                entity: id,
                tables,
                discriminator: None,
                soft_delete,
                attributes,
            });
        }

        // Abstract classes borrow the column layout of their first concrete
        // descendant; columns are resolved by name in every concrete table.
        for &id in subtree.iter().rev() {
            if !self.app.entities[id.0].is_abstract {
                continue;
            }

            let concrete = self
                .app
                .subtree(id)
                .into_iter()
                .find(|sub| !self.app.entities[sub.0].is_abstract)
                .ok_or_else(|| {
                    Error::mapping(format!(
                        "abstract entity `{}` has no concrete subclass",
                        self.app.entities[id.0].name
                    ))
                })?;

            let mut mapping = self.mapping(concrete)?.clone();
            mapping.entity = id;
            mapping
                .attributes
                .truncate(self.app.entities[id.0].attributes.len());
            self.mappings[id.0] = Some(mapping);
        }

        Ok(())
    }

    fn mapping(&self, id: EntityId) -> Result<&EntityMapping> {
        self.mappings[id.0].as_ref().ok_or_else(|| {
            Error::mapping(format!(
                "`{}` is mapped before its parent",
                self.app.entities[id.0].name
            ))
        })
    }

    fn add_soft_delete_column(&mut self, root: EntityId, table: TableId) -> Option<ColumnId> {
        let soft_delete = self.app.entities[root.0].soft_delete.clone()?;
        Some(self.tables[table.0].add_column(&soft_delete.column, soft_delete.column_ty(), false))
    }

    /// Maps declared attributes into `home`; inherited ones reuse the
    /// parent's mapping.
    fn map_attributes(
        &mut self,
        id: EntityId,
        home: TableId,
        tables: &mut Vec<EntityTable>,
        force_nullable: bool,
    ) -> Result<Vec<ValueMapping>> {
        let parent_mappings = match self.app.entities[id.0].parent {
            Some(parent) => self.mapping(parent)?.attributes.clone(),
            None => vec![],
        };

        let mut mappings = parent_mappings;
        let attrs = self.app.entities[id.0].attributes.clone();

        for attr in attrs.iter().skip(mappings.len()) {
            let mapping = self.map_attribute(id, attr, home, tables, force_nullable)?;
            mappings.push(mapping);
        }

        Ok(mappings)
    }

    /// Maps every attribute, inherited or not, into `home`.
    fn map_all_attributes(
        &mut self,
        id: EntityId,
        home: TableId,
        tables: &mut Vec<EntityTable>,
    ) -> Result<Vec<ValueMapping>> {
        let attrs = self.app.entities[id.0].attributes.clone();
        attrs
            .iter()
            .map(|attr| self.map_attribute(id, attr, home, tables, false))
            .collect()
    }

    fn map_attribute(
        &mut self,
        id: EntityId,
        attr: &Attribute,
        home: TableId,
        tables: &mut Vec<EntityTable>,
        force_nullable: bool,
    ) -> Result<ValueMapping> {
        let def = self.attr_def(id, &attr.name)?;
        let entity = &self.app.entities[id.0];

        if attr.id.index == entity.identifier.attribute {
            let key = tables[0].key.clone();
            return Ok(ValueMapping::BasicColumn(key[0]));
        }

        let table = match &def.secondary_table {
            Some(name) => self.secondary_table(id, name, tables)?,
            None => home,
        };
        let nullable = attr.nullable || force_nullable;

        Ok(match &attr.ty {
            AttributeTy::Basic(basic) => match &def.formula {
                Some(sql) => ValueMapping::FormulaColumn(Formula {
                    sql: sql.clone(),
                    ty: basic.ty.clone(),
                    table,
                }),
                None => {
                    let name = def.column.clone().unwrap_or_else(|| attr.name.clone());
                    ValueMapping::BasicColumn(self.tables[table.0].add_column(
                        &name,
                        basic.ty.clone(),
                        nullable,
                    ))
                }
            },
            AttributeTy::Embedded(embedded) => {
                let prefix = def.column_prefix.clone().unwrap_or_default();
                let fields = self.app.embeddable(embedded.embeddable).fields.clone();
                ValueMapping::EmbeddedColumns(
                    fields
                        .iter()
                        .map(|field| {
                            self.tables[table.0].add_column(
                                &format!("{prefix}{}", field.name),
                                field.ty.clone(),
                                true,
                            )
                        })
                        .collect(),
                )
            }
            AttributeTy::ToOne(to_one) => match &to_one.mapped_by {
                Some(mapped_by) => {
                    let target = self.app.entity(to_one.target);
                    let owning = target
                        .attribute(mapped_by)
                        .map(|a| a.id)
                        .ok_or_else(|| Error::mapping(format!("unknown `{mapped_by}`")))?;
                    ValueMapping::ToOneValue(ToOneMapping::Inverse { owning })
                }
                None => {
                    let target_root = self.app.entity(to_one.target).root;
                    let target_ty = self.app.entity(target_root).id_attribute().expr_ty();
                    let name = def
                        .join_column
                        .clone()
                        .unwrap_or_else(|| format!("{}_id", attr.name));
                    ValueMapping::ToOneValue(ToOneMapping::ForeignKey(vec![self.tables[table.0]
                        .add_column(&name, target_ty, nullable)]))
                }
            },
            // Collection tables are created once every entity table exists.
            AttributeTy::Collection(_) => ValueMapping::CollectionValue(CollectionMapping {
                table,
                key: vec![],
                element: ElementMapping::Value {
                    column: tables[0].key[0],
                    ty: Type::Unknown,
                },
                index: None,
                soft_delete: None,
                inverse: true,
            }),
        })
    }

    fn secondary_table(
        &mut self,
        id: EntityId,
        name: &str,
        tables: &mut Vec<EntityTable>,
    ) -> Result<TableId> {
        let table = self.table(name);
        if !tables.iter().any(|t| t.table == table) {
            let root = self.app.entities[id.0].root;
            let key = self.add_key_columns(table, root, false)?;
            tables.push(EntityTable {
                table,
                key,
                kind: EntityTableKind::Secondary,
            });
        }
        Ok(table)
    }

    fn build_collection_mappings(&mut self) -> Result<()> {
        let mut built: HashMap<(EntityId, String), ValueMapping> = HashMap::new();

        for id in self.hierarchy_order() {
            let attrs = self.app.entities[id.0].attributes.clone();

            for attr in &attrs {
                let AttributeTy::Collection(collection) = &attr.ty else {
                    continue;
                };

                let key = (attr.declaring, attr.name.clone());
                let mapping = match built.get(&key) {
                    Some(mapping) => mapping.clone(),
                    None => {
                        let mapping = ValueMapping::CollectionValue(
                            self.collection_mapping(attr.declaring, attr, collection)?,
                        );
                        built.insert(key, mapping.clone());
                        mapping
                    }
                };

                if let Some(entity_mapping) = self.mappings[id.0].as_mut() {
                    entity_mapping.attributes[attr.id.index] = mapping;
                }
            }
        }

        Ok(())
    }

    fn collection_mapping(
        &mut self,
        owner: EntityId,
        attr: &Attribute,
        collection: &Collection,
    ) -> Result<CollectionMapping> {
        let def = self.attr_def(owner, &attr.name)?;
        let owner_root = self.app.entities[owner.0].root;
        let owner_table = self.entity_table_name(owner_root);
        let owner_id_ty = self.app.entity(owner_root).id_attribute().expr_ty();

        match &collection.kind {
            CollectionKind::OneToMany {
                target,
                mapped_by: Some(mapped_by),
            } => {
                let target_entity = self.app.entity(*target);
                let back = target_entity
                    .attribute(mapped_by)
                    .map(|a| a.id.index)
                    .ok_or_else(|| Error::mapping(format!("unknown `{mapped_by}`")))?;

                let ValueMapping::ToOneValue(ToOneMapping::ForeignKey(fk)) =
                    self.mapping_of(*target)?.attributes[back].clone()
                else {
                    return Err(Error::mapping(format!(
                        "`{}.{}` is mapped by a to-one without a foreign key",
                        self.app.entity(owner).name,
                        attr.name
                    )));
                };

                let table = fk[0].table;
                let index = def
                    .order_column
                    .as_ref()
                    .map(|name| self.tables[table.0].add_column(name, Type::I32, true));

                Ok(CollectionMapping {
                    table,
                    key: fk,
                    element: ElementMapping::Entity {
                        target: *target,
                        fk: vec![],
                    },
                    index,
                    soft_delete: None,
                    inverse: true,
                })
            }
            CollectionKind::OneToMany {
                target,
                mapped_by: None,
            } => {
                let table = self.mapping_of(*target)?.tables[0].table;
                let name = def
                    .join_column
                    .clone()
                    .unwrap_or_else(|| format!("{owner_table}_id"));
                let key = self.tables[table.0].add_column(&name, owner_id_ty, true);
                let index = def
                    .order_column
                    .as_ref()
                    .map(|name| self.tables[table.0].add_column(name, Type::I32, true));

                Ok(CollectionMapping {
                    table,
                    key: vec![key],
                    element: ElementMapping::Entity {
                        target: *target,
                        fk: vec![],
                    },
                    index,
                    soft_delete: None,
                    inverse: false,
                })
            }
            CollectionKind::ManyToMany { target } => {
                let target_root = self.app.entity(*target).root;
                let target_ty = self.app.entity(target_root).id_attribute().expr_ty();
                let table = self.collection_table(def, &owner_table, &attr.name)?;
                let key = self.collection_key(def, table, &owner_table, owner_id_ty);
                let name = def
                    .element_column
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", attr.name));
                let fk = self.tables[table.0].add_column(&name, target_ty, false);

                Ok(CollectionMapping {
                    table,
                    key: vec![key],
                    element: ElementMapping::Entity {
                        target: *target,
                        fk: vec![fk],
                    },
                    index: self.collection_index(def, table),
                    soft_delete: self.collection_soft_delete(collection, table),
                    inverse: false,
                })
            }
            CollectionKind::Element { ty } => {
                let table = self.collection_table(def, &owner_table, &attr.name)?;
                let key = self.collection_key(def, table, &owner_table, owner_id_ty);
                let name = def.element_column.clone().unwrap_or_else(|| attr.name.clone());
                let column = self.tables[table.0].add_column(&name, ty.clone(), true);

                Ok(CollectionMapping {
                    table,
                    key: vec![key],
                    element: ElementMapping::Value {
                        column,
                        ty: ty.clone(),
                    },
                    index: self.collection_index(def, table),
                    soft_delete: self.collection_soft_delete(collection, table),
                    inverse: false,
                })
            }
        }
    }

    fn mapping_of(&self, id: EntityId) -> Result<&EntityMapping> {
        self.mappings[id.0].as_ref().ok_or_else(|| {
            Error::mapping(format!("entity `{}` has no tables", self.app.entity(id).name))
        })
    }

    fn collection_table(&mut self, def: &AttributeDef, owner_table: &str, attr: &str) -> Result<TableId> {
        let name = def
            .collection_table
            .clone()
            .unwrap_or_else(|| format!("{owner_table}_{attr}"));
        self.new_table(&name)
    }

    fn collection_key(&mut self, def: &AttributeDef, table: TableId, owner_table: &str, ty: Type) -> ColumnId {
        let name = def
            .key_column
            .clone()
            .unwrap_or_else(|| format!("{owner_table}_id"));
        self.tables[table.0].add_column(&name, ty, false)
    }

    fn collection_index(&mut self, def: &AttributeDef, table: TableId) -> Option<ColumnId> {
        let name = def.order_column.as_ref()?;
        Some(self.tables[table.0].add_column(name, Type::I32, false))
    }

    fn collection_soft_delete(&mut self, collection: &Collection, table: TableId) -> Option<ColumnId> {
        let soft_delete = collection.soft_delete.as_ref()?;
        Some(self.tables[table.0].add_column(&soft_delete.column, soft_delete.column_ty(), false))
    }

    fn build_filters(&mut self) -> Result<()> {
        for def in &self.builder.filters {
            if self.app.filter(&def.name).is_some() {
                return Err(Error::mapping(format!("duplicate filter `{}`", def.name)));
            }
            self.app.filters.push(app::Filter {
                name: def.name.clone(),
                params: def.params.clone(),
                default_condition: def.default_condition.clone(),
            });
        }

        // Every tenant attribute is compared against one shared parameter,
        // so they must agree on its type.
        let mut tenant_ty: Option<(Type, String)> = None;
        for entity in &self.app.entities {
            let Some(attr) = entity.tenant_attribute() else {
                continue;
            };
            let ty = attr.expr_ty();
            match &tenant_ty {
                Some((expected, first)) if *expected != ty => {
                    return Err(Error::mapping(format!(
                        "tenant attribute `{}.{}` has type {ty:?} but `{first}` has {expected:?}",
                        entity.name, attr.name
                    )))
                }
                Some(_) => {}
                None => tenant_ty = Some((ty, format!("{}.{}", entity.name, attr.name))),
            }
        }

        if let Some((ty, _)) = tenant_ty {
            self.app.filters.push(app::Filter {
                name: app::TENANT_FILTER.to_string(),
                params: vec![(app::TENANT_PARAM.to_string(), ty.clone())],
                default_condition: None,
            });
            self.app.tenant_ty = Some(ty);

            for entity in &mut self.app.entities {
                let Some(index) = entity.tenant else { continue };
                let condition = format!(
                    "{} = :{}",
                    entity.attributes[index].name,
                    app::TENANT_PARAM
                );
                entity.filters.retain(|f| f.name != app::TENANT_FILTER);
                entity.filters.push(app::EntityFilter {
                    name: app::TENANT_FILTER.to_string(),
                    condition,
                });
            }
        }

        for entity in &mut self.app.entities {
            for filter in &mut entity.filters {
                let def = self
                    .app
                    .filters
                    .iter()
                    .find(|f| f.name == filter.name)
                    .ok_or_else(|| {
                        Error::mapping(format!(
                            "`{}` uses undefined filter `{}`",
                            entity.name, filter.name
                        ))
                    })?;

                if filter.condition.is_empty() {
                    filter.condition = def.default_condition.clone().ok_or_else(|| {
                        Error::mapping(format!(
                            "`{}` uses filter `{}` without a condition",
                            entity.name, filter.name
                        ))
                    })?;
                }
            }
        }

        Ok(())
    }

    fn build_fetch_profiles(&mut self) -> Result<()> {
        for def in &self.builder.fetch_profiles {
            let mut items = vec![];

            for (entity, attribute, style) in &def.items {
                let entity = self.entity_id(entity, &def.name)?;
                let attr = self.app.entity(entity).attribute(attribute).ok_or_else(|| {
                    Error::mapping(format!(
                        "fetch profile `{}` references unknown attribute `{}.{attribute}`",
                        def.name,
                        self.app.entity(entity).name
                    ))
                })?;
                if !attr.is_association() {
                    return Err(Error::mapping(format!(
                        "fetch profile `{}`: `{attribute}` is not an association",
                        def.name
                    )));
                }
                items.push(app::FetchProfileItem {
                    attribute: attr.id,
                    style: *style,
                });
            }

            self.app.fetch_profiles.push(app::FetchProfile {
                name: def.name.clone(),
                items,
            });
        }

        Ok(())
    }
}

impl Schema {
    fn verify_filter_conditions(&self) -> Result<()> {
        for entity in &self.app.entities {
            for filter in &entity.filters {
                crate::hql::check_filter_condition(self, entity.id, filter).map_err(|err| {
                    err.context(Error::mapping(format!(
                        "filter `{}` on `{}`",
                        filter.name, entity.name
                    )))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::app::{MarkerConverter, SoftDelete};
    use crate::schema::mapping::ValueMapping;

    fn person_phone() -> Builder {
        let mut builder = Schema::builder();
        builder
            .entity(
                EntityDef::new("Person")
                    .table("person")
                    .id("id", Type::I64)
                    .basic("name", Type::String)
                    .attribute(AttributeDef::one_to_many("phones", "Phone").mapped_by("person")),
            )
            .entity(
                EntityDef::new("Phone")
                    .table("phone")
                    .id("id", Type::I64)
                    .basic("number", Type::String)
                    .attribute(AttributeDef::many_to_one("person", "Person").lazy()),
            );
        builder
    }

    #[test]
    fn bidirectional_one_to_many_uses_target_fk() {
        let schema = person_phone().build().unwrap();
        let person = schema.entity_by_name("Person").unwrap();
        let phones = person.attribute("phones").unwrap();

        let ValueMapping::CollectionValue(mapping) = schema.mapping_for(person).attribute(phones.id.index)
        else {
            panic!("expected collection mapping");
        };

        assert!(mapping.inverse);
        assert_eq!(schema.table(mapping.table).name, "phone");
        assert_eq!(schema.column(mapping.key[0]).name, "person_id");
    }

    #[test]
    fn soft_delete_on_one_to_many_is_rejected() {
        let mut builder = Schema::builder();
        builder
            .entity(
                EntityDef::new("Person").id("id", Type::I64).attribute(
                    AttributeDef::one_to_many("phones", "Phone")
                        .mapped_by("person")
                        .soft_delete(SoftDelete::default()),
                ),
            )
            .entity(
                EntityDef::new("Phone")
                    .id("id", Type::I64)
                    .attribute(AttributeDef::many_to_one("person", "Person")),
            );

        let err = builder.build().unwrap_err();
        assert!(err.is_mapping(), "{err}");
    }

    #[test]
    fn soft_delete_on_element_collection_adds_marker_column() {
        let mut builder = Schema::builder();
        builder.entity(
            EntityDef::new("Shelf").table("shelf").id("id", Type::I64).attribute(
                AttributeDef::element_collection("labels", Type::String)
                    .soft_delete(SoftDelete::default().converter(MarkerConverter::YesNo)),
            ),
        );

        let schema = builder.build().unwrap();
        let table = schema.db.table_by_name("shelf_labels").unwrap();
        let marker = table.column_by_name("deleted").unwrap();
        assert_eq!(marker.ty, Type::String);
        assert!(!marker.nullable);
    }

    #[test]
    fn tenant_attributes_must_share_a_type() {
        let mut builder = Schema::builder();
        builder
            .entity(
                EntityDef::new("Account")
                    .id("id", Type::I64)
                    .attribute(AttributeDef::basic("tenant", Type::String).tenant()),
            )
            .entity(
                EntityDef::new("Record")
                    .id("id", Type::I64)
                    .attribute(AttributeDef::basic("tenant", Type::I64).tenant()),
            );

        let err = builder.build().unwrap_err();
        assert!(err.is_mapping());
        assert!(err.to_string().contains("Record.tenant"), "{err}");
    }

    #[test]
    fn tenant_filter_is_registered() {
        let mut builder = Schema::builder();
        builder.entity(
            EntityDef::new("Account")
                .id("id", Type::I64)
                .attribute(AttributeDef::basic("tenant", Type::String).tenant()),
        );

        let schema = builder.build().unwrap();
        let filter = schema.app.filter(app::TENANT_FILTER).unwrap();
        assert_eq!(filter.param_ty(app::TENANT_PARAM), Some(&Type::String));
        assert_eq!(
            schema.entity_by_name("Account").unwrap().filters[0].condition,
            "tenant = :tenantId"
        );
    }

    #[test]
    fn joined_subclass_gets_own_table() {
        let mut builder = Schema::builder();
        builder
            .entity(
                EntityDef::new("Account")
                    .table("account")
                    .inheritance(InheritanceType::Joined)
                    .id("id", Type::I64)
                    .basic("owner", Type::String),
            )
            .entity(
                EntityDef::new("CreditAccount")
                    .table("credit_account")
                    .extends("Account")
                    .basic("credit_limit", Type::I64),
            );

        let schema = builder.build().unwrap();
        let credit = schema.entity_by_name("CreditAccount").unwrap();
        let mapping = schema.mapping_for(credit);

        assert_eq!(mapping.tables.len(), 2);
        assert_eq!(schema.table(mapping.tables[1].table).name, "credit_account");
        assert_eq!(credit.attributes.len(), 3);
        assert_eq!(credit.attributes[1].declaring, schema.entity_by_name("Account").unwrap().id);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let mut builder = Schema::builder();
        builder.entity(
            EntityDef::new("Person")
                .id("id", Type::I64)
                .attribute(AttributeDef::many_to_one("employer", "Company")),
        );

        let err = builder.build().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid mapping: `Person.employer` references unknown entity `Company`"
        );
    }
}
