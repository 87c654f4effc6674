//! Writes the persistence context back to the database.
//!
//! A flush runs in a fixed order: inserts (referenced entities first),
//! updates of dirty entities, removal of the collection rows of deleted
//! owners, collection updates and recreates, then deletes in reverse order
//! of registration.

use super::{context::EntityKey, Session};
use crate::{
    engine::{assemble::role_of, Bindings, Engine},
    entity::{Element, EntityRef, Lazy, Slot},
};

use quarry_core::{
    schema::{
        app::{AccessType, AttributeTy, IdStrategy, SoftDelete},
        db::ColumnId,
        mapping::{CollectionMapping, ElementMapping, ToOneMapping, ValueMapping},
    },
    sqm::SqmParameters,
    stmt::{Type, Value},
    err, Error, Result, Schema,
};
use quarry_sql::{
    ast::{Assignment, DeleteStatement, Expr, InsertSource, InsertStatement, Predicate, UpdateStatement},
    Statement,
};

use by_address::ByAddress;
use indexmap::IndexMap;
use petgraph::{algo::toposort, graph::DiGraph};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// A collection whose elements differ from its last synchronized state.
struct CollectionChange {
    owner: EntityRef,
    index: usize,
    old: Vec<Value>,
    current: Vec<Value>,
}

impl Session {
    /// Executes every pending change; returns whether any statement ran.
    pub(crate) async fn flush_changes(&mut self) -> Result<bool> {
        let shared = self.shared.clone();
        let engine = &shared.engine;
        let schema = &engine.schema;

        self.cascade_persist(schema).await?;
        self.remove_orphans(schema).await?;

        let inserts = self.ordered_inserts(schema)?;
        let updates = self.dirty_entities(schema);
        let deletes: Vec<EntityRef> = self
            .context
            .entries()
            .filter(|(_, entry)| entry.is_deleted())
            .map(|(_, entry)| entry.instance.clone())
            .collect();
        let collections = self.changed_collections(schema);

        if inserts.is_empty() && updates.is_empty() && deletes.is_empty() && collections.is_empty() {
            return Ok(false);
        }
        debug!(
            inserts = inserts.len(),
            updates = updates.len(),
            collections = collections.len(),
            deletes = deletes.len(),
            "flushing"
        );

        for instance in &inserts {
            self.insert_entity(engine, instance).await?;
            let state = instance.data().state();
            if let Some(entry) = self.context.entry_of_mut(schema, instance) {
                entry.exists = true;
                entry.loaded = Some(state);
            }
        }

        for (instance, dirty) in &updates {
            self.update_entity(engine, instance, dirty).await?;
        }

        for instance in &deletes {
            self.remove_collection_rows(engine, instance).await?;
        }

        for change in &collections {
            self.write_collection(engine, change).await?;
            if let Some(entry) = self.context.entry_of_mut(schema, &change.owner) {
                entry.collections.insert(change.index, change.current.clone());
            }
        }

        for instance in deletes.iter().rev() {
            self.delete_entity(engine, instance).await?;
        }

        Ok(true)
    }

    /// Persists new instances reachable through cascading associations and
    /// rejects references to unsaved ones.
    async fn cascade_persist(&mut self, schema: &Schema) -> Result<()> {
        let mut reachable = vec![];

        for (_, entry) in self.context.entries() {
            if entry.is_deleted() || !entry.instance.is_loaded() {
                continue;
            }
            let data = entry.instance.data();
            let model = data.model();

            for (attr, slot) in model.attributes.iter().zip(&data.slots) {
                let targets: Vec<EntityRef> = match slot {
                    Slot::ToOne {
                        target: Lazy::Initialized(Some(target)),
                        ..
                    } => vec![target.clone()],
                    Slot::Collection(Lazy::Initialized(elements)) => elements
                        .iter()
                        .filter_map(|element| element.as_entity().cloned())
                        .collect(),
                    _ => continue,
                };

                for target in targets {
                    if self.context.entry_of(schema, &target).is_some() {
                        continue;
                    }
                    if attr.cascade().persist {
                        reachable.push(target);
                    } else if target.id().is_null() {
                        return Err(Error::transient_object(&model.name, &attr.name));
                    }
                }
            }
        }

        for target in reachable {
            self.persist(&target).await?;
        }
        Ok(())
    }

    /// Removes entities dropped from orphan-removal collections.
    async fn remove_orphans(&mut self, schema: &Schema) -> Result<()> {
        let mut orphans = vec![];

        for (_, entry) in self.context.entries() {
            if entry.is_deleted() || !entry.instance.is_loaded() {
                continue;
            }
            let data = entry.instance.data();
            let model = data.model();

            for (attr, slot) in model.attributes.iter().zip(&data.slots) {
                let (Some(collection), Slot::Collection(Lazy::Initialized(elements))) = (attr.as_collection(), slot)
                else {
                    continue;
                };
                let (true, Some(target)) = (collection.orphan_removal, collection.target()) else {
                    continue;
                };
                let Some(old) = entry.collections.get(&attr.id.index) else {
                    continue;
                };
                let current: Vec<Value> = elements.iter().map(Element::key).collect();
                let root = schema.entity(target).root;

                orphans.extend(
                    old.iter()
                        .filter(|key| !current.contains(key))
                        .filter_map(|key| self.context.instance(&EntityKey::new(root, key.clone()))),
                );
            }
        }

        for orphan in orphans {
            if self.contains(&orphan) {
                debug!(entity = %orphan.entity_name(), id = %orphan.id(), "removing orphan");
                self.remove(&orphan).await?;
            }
        }
        Ok(())
    }

    /// New instances in an order where every instance comes after the new
    /// instances it references.
    fn ordered_inserts(&self, schema: &Schema) -> Result<Vec<EntityRef>> {
        let pending: Vec<EntityRef> = self
            .context
            .entries()
            .filter(|(_, entry)| !entry.exists && !entry.is_deleted())
            .map(|(_, entry)| entry.instance.clone())
            .collect();
        if pending.len() < 2 {
            return Ok(pending);
        }

        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: HashMap<_, _> = pending
            .iter()
            .enumerate()
            .map(|(i, instance)| (ByAddress(instance.0.clone()), graph.add_node(i)))
            .collect();

        for instance in &pending {
            let data = instance.data();
            let mapping = schema.mapping_for(data.entity);
            let from = nodes[&ByAddress(instance.0.clone())];

            for (index, slot) in data.slots.iter().enumerate() {
                let Slot::ToOne {
                    target: Lazy::Initialized(Some(target)),
                    ..
                } = slot
                else {
                    continue;
                };
                if !matches!(
                    mapping.attribute(index),
                    ValueMapping::ToOneValue(ToOneMapping::ForeignKey(_))
                ) || target.ptr_eq(instance)
                {
                    continue;
                }
                if let Some(to) = nodes.get(&ByAddress(target.0.clone())) {
                    graph.add_edge(*to, from, ());
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let instance = &pending[graph[cycle.node_id()]];
            Error::unsupported(format!(
                "cannot order inserts: new `{}` instances reference each other in a cycle",
                instance.entity_name()
            ))
        })?;
        Ok(order.into_iter().map(|node| pending[graph[node]].clone()).collect())
    }

    /// Managed instances whose state differs from the loaded snapshot, with
    /// the indices of the changed attributes.
    fn dirty_entities(&self, schema: &Schema) -> Vec<(EntityRef, Vec<usize>)> {
        let mut dirty = vec![];

        for (_, entry) in self.context.entries() {
            if entry.is_deleted() || !entry.exists {
                continue;
            }
            let Some(snapshot) = &entry.loaded else {
                continue;
            };
            let data = entry.instance.data();
            if data.hollow {
                continue;
            }
            let model = data.model();
            let mapping = schema.mapping_for(data.entity);
            let state = data.state();

            let changed: Vec<usize> = model
                .attributes
                .iter()
                .filter(|attr| attr.id.index != model.identifier.attribute)
                .filter(|attr| Some(attr.id.index) != model.version)
                .filter(|attr| !mapping.attribute(attr.id.index).columns().is_empty())
                .filter(|attr| state.get(attr.id.index) != snapshot.get(attr.id.index))
                .map(|attr| attr.id.index)
                .collect();

            if changed.is_empty() {
                continue;
            }
            if schema.entity(model.root).immutable {
                warn!(entity = %model.name, id = %data.id(), "ignoring changes to immutable entity");
                continue;
            }
            dirty.push((entry.instance.clone(), changed));
        }
        dirty
    }

    /// Initialized collections of live owners whose elements changed since
    /// they were last synchronized.
    fn changed_collections(&self, schema: &Schema) -> Vec<CollectionChange> {
        let mut changes = vec![];

        for (_, entry) in self.context.entries() {
            if entry.is_deleted() {
                continue;
            }
            let data = entry.instance.data();
            if data.hollow {
                continue;
            }

            for (index, slot) in data.slots.iter().enumerate() {
                let Slot::Collection(Lazy::Initialized(elements)) = slot else {
                    continue;
                };
                let current: Vec<Value> = elements.iter().map(Element::key).collect();
                let old = entry.collections.get(&index);
                if old == Some(&current) || (old.is_none() && current.is_empty()) {
                    continue;
                }
                let mapping = schema.mapping_for(data.entity).attribute(index);
                if mapping.as_collection().is_none() {
                    continue;
                }

                changes.push(CollectionChange {
                    owner: entry.instance.clone(),
                    index,
                    old: old.cloned().unwrap_or_default(),
                    current,
                });
            }
        }
        changes
    }

    /// Inserts one instance, one statement per table. A database-generated
    /// identifier is read back and assigned.
    pub(crate) async fn insert_entity(&mut self, engine: &Engine, instance: &EntityRef) -> Result<()> {
        let schema = &engine.schema;
        let (entity, state) = {
            let data = instance.data();
            (data.entity, data.state())
        };
        let model = schema.entity(entity);
        let root = schema.entity(model.root);
        let mapping = schema.mapping_for(entity);
        let mut id = state[model.identifier.attribute].clone();
        let generated = root.identifier.strategy == IdStrategy::Identity && id.is_null();

        for (position, table) in mapping.tables.iter().enumerate() {
            let generated = generated && position == 0;
            let mut columns: IndexMap<ColumnId, Value> = IndexMap::new();

            if !generated {
                columns.extend(spread(&table.key, &id));
            }
            for attr in &model.attributes {
                if attr.id.index == model.identifier.attribute {
                    continue;
                }
                for (column, value) in attribute_columns(mapping.attribute(attr.id.index), &state[attr.id.index]) {
                    if column.table == table.table && !table.key.contains(&column) {
                        columns.entry(column).or_insert(value);
                    }
                }
            }
            if position == 0 {
                if let (Some(column), Some(value)) = (mapping.discriminator, &model.discriminator_value) {
                    columns.insert(column, value.clone());
                }
                if let (Some(column), Some(soft)) = (mapping.soft_delete, &root.soft_delete) {
                    columns.insert(column, soft.not_deleted_value());
                }
            }

            let stmt = InsertStatement {
                table: schema.table(table.table).name.clone(),
                columns: columns.keys().map(|column| schema.column(*column).name.clone()).collect(),
                source: InsertSource::Values(vec![columns.into_values().map(Expr::value_param).collect()]),
                returning: if generated {
                    table.key.iter().map(|column| schema.column(*column).name.clone()).collect()
                } else {
                    vec![]
                },
            };

            if !generated {
                self.write(engine, stmt).await?;
                continue;
            }

            if !engine.capability().insert_returning {
                return Err(Error::unsupported(format!(
                    "identity generation for `{}` needs `insert … returning`",
                    model.name
                )));
            }
            let tys = table.key.iter().map(|column| schema.column(*column).ty.clone()).collect();
            let rendered = engine.render(&Statement::from(stmt), &SqmParameters::new(), &Bindings::default())?;
            let rows = engine.query_rows(self.connection().await?, rendered, tys).await?;
            let Some(mut row) = rows.into_iter().next() else {
                return Err(err!(
                    "insert into `{}` returned no generated key",
                    schema.table(table.table).name
                ));
            };
            let value = if row.len() == 1 { row.remove(0) } else { Value::record(row) };
            id = model.id_attribute().expr_ty().cast(value)?;
            instance.data_mut().slots[model.identifier.attribute] = Slot::Value(id.clone());
        }

        trace!(entity = %model.name, %id, "inserted");
        Ok(())
    }

    async fn update_entity(&mut self, engine: &Engine, instance: &EntityRef, dirty: &[usize]) -> Result<()> {
        let schema = &engine.schema;
        let (entity, id, state, snapshot) = {
            let data = instance.data();
            let snapshot = self
                .context
                .entry_of(schema, instance)
                .and_then(|entry| entry.loaded.clone())
                .unwrap_or_default();
            (data.entity, data.id().clone(), data.state(), snapshot)
        };
        let model = schema.entity(entity);
        let mapping = schema.mapping_for(entity);

        let region = engine.entity_region(entity);
        if let Some(region) = &region {
            if region.access() == AccessType::ReadOnly {
                return Err(Error::unsupported(format!(
                    "cannot update `{}` cached in read-only region `{}`",
                    model.name,
                    region.name()
                )));
            }
        }

        let version = match model.version {
            Some(index) => Some((index, snapshot[index].clone(), increment(&snapshot[index])?)),
            None => None,
        };

        debug!(entity = %model.name, %id, dirty = dirty.len(), "updating dirty attributes");

        for (position, table) in mapping.tables.iter().enumerate() {
            let mut assignments = vec![];
            for index in dirty {
                for (column, value) in attribute_columns(mapping.attribute(*index), &state[*index]) {
                    if column.table == table.table {
                        assignments.push(Assignment::new(schema.column(column).name.clone(), Expr::value_param(value)));
                    }
                }
            }

            let mut where_ = key_predicate(schema, &table.key, &id)?;
            if position == 0 {
                if let Some((index, old, new)) = &version {
                    let column = version_column(schema, mapping.attribute(*index))?;
                    assignments.push(Assignment::new(column.clone(), Expr::value_param(new.clone())));
                    where_ = Predicate::conjoin(Some(where_), Predicate::eq(Expr::unqualified(column), Expr::value_param(old.clone())));
                }
            }
            if assignments.is_empty() {
                continue;
            }

            let stmt = UpdateStatement {
                table: schema.table(table.table).name.clone(),
                assignments,
                where_: Some(where_),
            };
            if self.write(engine, stmt).await? == 0 {
                return Err(Error::stale_state(&model.name, id.to_string()));
            }
        }

        if let Some((index, _, new)) = version {
            instance.data_mut().slots[index] = Slot::Value(new);
        }
        let state = instance.data().state();
        if let Some(entry) = self.context.entry_of_mut(schema, instance) {
            entry.loaded = Some(state);
        }
        if let Some(region) = region {
            region.evict(&id);
        }
        Ok(())
    }

    /// Removes the rows that belong only to a deleted owner's collections.
    async fn remove_collection_rows(&mut self, engine: &Engine, instance: &EntityRef) -> Result<()> {
        let schema = &engine.schema;
        let (entity, id) = {
            let data = instance.data();
            (data.entity, data.id().clone())
        };
        let model = schema.entity(entity);
        if schema.entity(model.root).soft_delete.is_some() {
            return Ok(());
        }
        let mapping = schema.mapping_for(entity);

        for attr in &model.attributes {
            let AttributeTy::Collection(collection) = &attr.ty else {
                continue;
            };
            let Some(collection_mapping) = mapping.attribute(attr.id.index).as_collection() else {
                continue;
            };

            if collection_mapping.has_own_table() {
                let stmt = remove_all(schema, collection_mapping, collection.soft_delete.as_ref(), &id)?;
                self.write(engine, stmt).await?;
            } else if !collection_mapping.inverse {
                let mut assignments: Vec<Assignment> = collection_mapping
                    .key
                    .iter()
                    .map(|column| Assignment::new(schema.column(*column).name.clone(), Expr::value_param(Value::Null)))
                    .collect();
                if let Some(index) = collection_mapping.index {
                    assignments.push(Assignment::new(schema.column(index).name.clone(), Expr::value_param(Value::Null)));
                }
                let stmt = UpdateStatement {
                    table: schema.table(collection_mapping.table).name.clone(),
                    assignments,
                    where_: Some(key_predicate(schema, &collection_mapping.key, &id)?),
                };
                self.write(engine, stmt).await?;
            }

            if let Some(region) = engine.collection_region(role_of(attr)) {
                region.evict(&id);
            }
        }
        Ok(())
    }

    /// Brings the rows of one collection in line with its elements.
    ///
    /// Indexed collections are rewritten: every row is removed and the
    /// current elements inserted with one multi-row statement. So is a bag
    /// that loses one of several equal elements. Other collections remove
    /// and insert only the difference.
    async fn write_collection(&mut self, engine: &Engine, change: &CollectionChange) -> Result<()> {
        let schema = &engine.schema;
        let (attr, mapping, id) = {
            let data = change.owner.data();
            let attr = data.model().attributes[change.index].clone();
            let Some(mapping) = schema.mapping_for(data.entity).attribute(change.index).as_collection() else {
                return Ok(());
            };
            (attr, mapping, data.id().clone())
        };
        let Some(collection) = attr.as_collection() else {
            return Ok(());
        };
        let role = role_of(&attr);

        if mapping.inverse {
            trace!(role = %schema.role(role), "inverse collection; rows written by the owning side");
            return Ok(());
        }

        let soft = collection.soft_delete.as_ref();
        let (removed, added) = diff(&change.old, &change.current);
        debug!(
            role = %schema.role(role),
            owner = %id,
            removed = removed.len(),
            added = added.len(),
            "synchronizing collection"
        );

        if !mapping.has_own_table() {
            self.write_foreign_keys(engine, mapping, &id, &removed, &change.current)
                .await?;
        } else if mapping.index.is_some() {
            if !change.old.is_empty() {
                self.write(engine, remove_all(schema, mapping, soft, &id)?).await?;
            }
            if !change.current.is_empty() {
                let rows: Vec<(usize, &Value)> = change.current.iter().enumerate().collect();
                self.write(engine, insert_rows(schema, mapping, soft, &id, &rows)).await?;
            }
        } else if needs_recreate(&removed, &change.current) {
            // Rows of a bag are indistinguishable; drop them all and re-insert.
            self.write(engine, remove_all(schema, mapping, soft, &id)?).await?;
            if !change.current.is_empty() {
                let rows: Vec<(usize, &Value)> = change.current.iter().enumerate().collect();
                self.write(engine, insert_rows(schema, mapping, soft, &id, &rows)).await?;
            }
        } else {
            for element in &removed {
                self.write(engine, remove_one(schema, mapping, soft, &id, element)?)
                    .await?;
            }
            if !added.is_empty() {
                let rows: Vec<(usize, &Value)> = added.iter().enumerate().collect();
                self.write(engine, insert_rows(schema, mapping, soft, &id, &rows)).await?;
            }
        }

        if let Some(region) = engine.collection_region(role) {
            region.evict(&id);
        }
        Ok(())
    }

    /// A unidirectional one-to-many keeps its key on the target's table:
    /// removed elements are detached, current ones pointed at the owner.
    async fn write_foreign_keys(
        &mut self,
        engine: &Engine,
        mapping: &CollectionMapping,
        owner: &Value,
        removed: &[Value],
        current: &[Value],
    ) -> Result<()> {
        let schema = &engine.schema;
        let ElementMapping::Entity { target, .. } = &mapping.element else {
            return Ok(());
        };
        let target_key = schema.mapping_for(*target).id_columns().to_vec();
        let table = schema.table(mapping.table).name.clone();

        let set = |key: &Value, index: Option<usize>| {
            let mut assignments: Vec<Assignment> = spread(&mapping.key, key)
                .into_iter()
                .map(|(column, value)| Assignment::new(schema.column(column).name.clone(), Expr::value_param(value)))
                .collect();
            if let Some(column) = mapping.index {
                let position = index.map_or(Value::Null, |i| Value::I32(i as i32));
                assignments.push(Assignment::new(schema.column(column).name.clone(), Expr::value_param(position)));
            }
            assignments
        };

        let mut stmts = vec![];
        for element in removed {
            stmts.push(UpdateStatement {
                table: table.clone(),
                assignments: set(&Value::Null, None),
                where_: Some(key_predicate(schema, &target_key, element)?),
            });
        }
        for (position, element) in current.iter().enumerate() {
            stmts.push(UpdateStatement {
                table: table.clone(),
                assignments: set(owner, Some(position)),
                where_: Some(key_predicate(schema, &target_key, element)?),
            });
        }

        for stmt in stmts {
            self.write(engine, stmt).await?;
        }
        Ok(())
    }

    async fn delete_entity(&mut self, engine: &Engine, instance: &EntityRef) -> Result<()> {
        let schema = &engine.schema;
        let (entity, id) = {
            let data = instance.data();
            (data.entity, data.id().clone())
        };
        let model = schema.entity(entity);
        let root = schema.entity(model.root);
        let mapping = schema.mapping_for(entity);
        let key = EntityKey::new(model.root, id.clone());

        let version = model.version.and_then(|index| {
            let snapshot = self.context.get(&key)?.loaded.as_ref()?;
            Some((mapping.attribute(index), snapshot[index].clone()))
        });
        let version_check = |where_: Predicate| -> Result<Predicate> {
            Ok(match &version {
                Some((column, old)) => Predicate::conjoin(
                    Some(where_),
                    Predicate::eq(Expr::unqualified(version_column(schema, column)?), Expr::value_param(old.clone())),
                ),
                None => where_,
            })
        };

        if let (Some(soft), Some(column)) = (&root.soft_delete, mapping.soft_delete) {
            debug!(entity = %model.name, %id, "soft deleting");
            let table = mapping.root_table();
            let stmt = UpdateStatement {
                table: schema.table(table.table).name.clone(),
                assignments: vec![Assignment::new(schema.column(column).name.clone(), Expr::value_param(soft.deleted_value()))],
                where_: Some(version_check(key_predicate(schema, &table.key, &id)?)?),
            };
            if self.write(engine, stmt).await? == 0 {
                return Err(Error::stale_state(&model.name, id.to_string()));
            }
        } else {
            debug!(entity = %model.name, %id, "deleting");
            for (position, table) in mapping.tables.iter().enumerate().rev() {
                let mut where_ = key_predicate(schema, &table.key, &id)?;
                if position == 0 {
                    where_ = version_check(where_)?;
                }
                let stmt = DeleteStatement {
                    table: schema.table(table.table).name.clone(),
                    where_: Some(where_),
                };
                if self.write(engine, stmt).await? == 0 && position == 0 {
                    return Err(Error::stale_state(&model.name, id.to_string()));
                }
            }
        }

        self.context.remove(&key);
        if let Some(region) = engine.entity_region(entity) {
            region.evict(&id);
        }
        Ok(())
    }

    /// Runs one write statement and returns its update count.
    async fn write(&mut self, engine: &Engine, stmt: impl Into<Statement>) -> Result<u64> {
        let rendered = engine.render(&stmt.into(), &SqmParameters::new(), &Bindings::default())?;
        engine.execute_update(self.connection().await?, rendered).await
    }
}

/// Initial value of a version attribute.
pub(crate) fn initial_version(ty: &Type) -> Value {
    match ty {
        Type::I32 => Value::I32(0),
        _ => Value::I64(0),
    }
}

fn increment(version: &Value) -> Result<Value> {
    match version {
        Value::I32(n) => Ok(Value::I32(n + 1)),
        Value::I64(n) => Ok(Value::I64(n + 1)),
        other => Err(Error::type_conversion(other.clone(), "numeric version")),
    }
}

fn version_column(schema: &Schema, mapping: &ValueMapping) -> Result<String> {
    match mapping {
        ValueMapping::BasicColumn(column) => Ok(schema.column(*column).name.clone()),
        _ => Err(Error::mapping("version attribute must map to a single column")),
    }
}

/// Columns an attribute's state is written to, with their values.
fn attribute_columns(mapping: &ValueMapping, value: &Value) -> Vec<(ColumnId, Value)> {
    match mapping {
        ValueMapping::BasicColumn(column) => vec![(*column, value.clone())],
        ValueMapping::EmbeddedColumns(columns)
        | ValueMapping::ToOneValue(ToOneMapping::ForeignKey(columns)) => spread(columns, value),
        _ => vec![],
    }
}

/// Pairs `columns` with the fields of a composite `value`, or with `value`
/// itself for a single column.
fn spread(columns: &[ColumnId], value: &Value) -> Vec<(ColumnId, Value)> {
    if let [column] = columns {
        return vec![(*column, value.clone())];
    }
    match value.as_record() {
        Some(fields) => columns.iter().copied().zip(fields.iter().cloned()).collect(),
        None => columns.iter().map(|column| (*column, Value::Null)).collect(),
    }
}

fn key_predicate(schema: &Schema, columns: &[ColumnId], value: &Value) -> Result<Predicate> {
    let (columns, values): (Vec<_>, Vec<_>) = spread(columns, value)
        .into_iter()
        .map(|(column, value)| (Expr::unqualified(schema.column(column).name.clone()), Expr::value_param(value)))
        .unzip();
    Predicate::columns_eq(columns, values)
        .ok_or_else(|| Error::mapping("cannot address a row without key columns"))
}

fn element_columns(mapping: &CollectionMapping) -> Vec<ColumnId> {
    match &mapping.element {
        ElementMapping::Entity { fk, .. } => fk.clone(),
        ElementMapping::Value { column, .. } => vec![*column],
    }
}

/// Every live row of the owner, soft deleted when the collection is.
fn remove_all(
    schema: &Schema,
    mapping: &CollectionMapping,
    soft: Option<&SoftDelete>,
    owner: &Value,
) -> Result<Statement> {
    let where_ = key_predicate(schema, &mapping.key, owner)?;
    remove(schema, mapping, soft, where_)
}

fn remove_one(
    schema: &Schema,
    mapping: &CollectionMapping,
    soft: Option<&SoftDelete>,
    owner: &Value,
    element: &Value,
) -> Result<Statement> {
    let where_ = Predicate::conjoin(
        Some(key_predicate(schema, &mapping.key, owner)?),
        key_predicate(schema, &element_columns(mapping), element)?,
    );
    remove(schema, mapping, soft, where_)
}

fn remove(
    schema: &Schema,
    mapping: &CollectionMapping,
    soft: Option<&SoftDelete>,
    where_: Predicate,
) -> Result<Statement> {
    let table = schema.table(mapping.table).name.clone();
    Ok(match (soft, mapping.soft_delete) {
        (Some(soft), Some(column)) => {
            let name = schema.column(column).name.clone();
            UpdateStatement {
                table,
                assignments: vec![Assignment::new(name.clone(), Expr::value_param(soft.deleted_value()))],
                where_: Some(Predicate::conjoin(
                    Some(where_),
                    Predicate::eq(Expr::unqualified(name), Expr::value_param(soft.not_deleted_value())),
                )),
            }
            .into()
        }
        _ => DeleteStatement {
            table,
            where_: Some(where_),
        }
        .into(),
    })
}

/// One multi-row insert of `(position, element)` pairs.
fn insert_rows(
    schema: &Schema,
    mapping: &CollectionMapping,
    soft: Option<&SoftDelete>,
    owner: &Value,
    rows: &[(usize, &Value)],
) -> Statement {
    let element = element_columns(mapping);
    let mut columns: Vec<ColumnId> = mapping.key.clone();
    columns.extend(&element);
    columns.extend(mapping.index);
    let marker = soft.zip(mapping.soft_delete);
    columns.extend(marker.map(|(_, column)| column));

    let values = rows
        .iter()
        .map(|(position, value)| {
            let mut row: Vec<Expr> = spread(&mapping.key, owner)
                .into_iter()
                .chain(spread(&element, value))
                .map(|(_, value)| Expr::value_param(value))
                .collect();
            if mapping.index.is_some() {
                row.push(Expr::value_param(Value::I32(*position as i32)));
            }
            if let Some((soft, _)) = marker {
                row.push(Expr::value_param(soft.not_deleted_value()));
            }
            row
        })
        .collect();

    InsertStatement {
        table: schema.table(mapping.table).name.clone(),
        columns: columns.iter().map(|column| schema.column(*column).name.clone()).collect(),
        source: InsertSource::Values(values),
        returning: vec![],
    }
    .into()
}

/// Elements of `old` missing from `current`, and elements of `current`
/// missing from `old`, counting duplicates.
fn diff(old: &[Value], current: &[Value]) -> (Vec<Value>, Vec<Value>) {
    let mut remaining: Vec<Option<&Value>> = current.iter().map(Some).collect();
    let mut removed = vec![];
    for value in old {
        match remaining.iter_mut().find(|slot| *slot == &Some(value)) {
            Some(slot) => *slot = None,
            None => removed.push(value.clone()),
        }
    }
    let added = remaining.into_iter().flatten().cloned().collect();
    (removed, added)
}

/// A removal can only address every row holding a value, so a removed value
/// that is still present forces a rewrite.
fn needs_recreate(removed: &[Value], current: &[Value]) -> bool {
    removed.iter().any(|value| current.contains(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn diff_counts_duplicates() {
        let old = vec![Value::from("a"), Value::from("b"), Value::from("b")];
        let current = vec![Value::from("b"), Value::from("c")];

        let (removed, added) = diff(&old, &current);
        assert_eq!(removed, vec![Value::from("a"), Value::from("b")]);
        assert_eq!(added, vec![Value::from("c")]);
    }

    #[test]
    fn removing_a_duplicate_recreates_the_bag() {
        let old = vec![Value::from("eu"), Value::from("eu"), Value::from("us")];

        let current = vec![Value::from("eu"), Value::from("us")];
        let (removed, _) = diff(&old, &current);
        assert!(needs_recreate(&removed, &current));

        let current = vec![Value::from("eu"), Value::from("eu")];
        let (removed, _) = diff(&old, &current);
        assert!(!needs_recreate(&removed, &current));
    }

    #[test]
    fn versions_increment_in_their_own_width() {
        assert_eq!(increment(&Value::I32(4)).unwrap(), Value::I32(5));
        assert_eq!(increment(&Value::I64(0)).unwrap(), Value::I64(1));
        assert!(increment(&Value::Null).is_err());
        assert_eq!(initial_version(&Type::I32), Value::I32(0));
    }

    #[test]
    fn composite_values_spread_over_columns() {
        let columns = [
            ColumnId { table: quarry_core::schema::db::TableId(0), index: 0 },
            ColumnId { table: quarry_core::schema::db::TableId(0), index: 1 },
        ];
        let value = Value::record(vec![Value::I64(1), Value::from("x")]);
        let spread = spread(&columns, &value);
        assert_eq!(spread[1], (columns[1], Value::from("x")));

        let nulls = super::spread(&columns, &Value::Null);
        assert!(nulls.iter().all(|(_, value)| value.is_null()));
    }
}
