//! Loading: by identifier, from the second-level cache, collections and
//! references, and the eager initialization that follows every load.

use super::{
    context::{EntityEntry, EntityKey, SubselectFetch},
    Session,
};
use crate::{
    cache::CacheEntry,
    engine::{
        assemble::{link_references, role_of, Assembler},
        load,
        lower::{EnabledFilters, FilterScope, LoweredSelect},
        plan::{ResultReader, SelectionPlan},
        Bindings, Engine,
    },
    entity::{Element, EntityRef, Lazy, Slot},
    graph::{EntityGraph, Fetch, FetchPolicy, GraphNode},
    query::RowValue,
};

use quarry_core::{
    schema::{
        app::{AttributeTy, EntityId, FetchStyle},
        mapping::{ToOneMapping, ValueMapping},
    },
    sqm::{SqmCopy, SqmCopyContext, SqmSelectStatement},
    stmt::{Value, ValueStream},
    Error, Result, Schema,
};
use quarry_sql::Statement;

use by_address::ByAddress;
use indexmap::IndexSet;
use std::{
    collections::{HashSet, VecDeque},
    rc::Rc,
};
use tracing::{debug, trace};

/// Rows of one executed select, and the instances it read.
pub(crate) struct Loaded {
    pub(crate) rows: Vec<Vec<RowValue>>,
    pub(crate) hydrated: Vec<EntityRef>,
}

/// An association to initialize right after its owner was loaded.
enum Work<'g> {
    Collection {
        owner: EntityRef,
        index: usize,
        style: FetchStyle,
        node: Option<GraphNode<'g>>,
    },
    ToOne {
        owner: EntityRef,
        index: usize,
        node: Option<GraphNode<'g>>,
    },
}

impl Session {
    /// Runs a user select: every enabled filter applies, the graph (if any)
    /// drives the selected entities' fetching.
    pub(crate) async fn select(
        &mut self,
        stmt: &SqmSelectStatement,
        bindings: &Bindings,
        graph: Option<GraphNode<'_>>,
    ) -> Result<Vec<Vec<RowValue>>> {
        let filters = self.filters.clone();
        let loaded = self
            .fetch_once(stmt, bindings, &filters, FilterScope::All, graph, true)
            .await?;

        let empty = EntityGraph::new("");
        self.complete(loaded.hydrated, graph, &empty).await?;
        Ok(loaded.rows)
    }

    /// Loads `entity` by identifier, initializing eager associations.
    pub(crate) async fn load_entity(
        &mut self,
        entity: EntityId,
        id: Value,
        graph: Option<GraphNode<'_>>,
    ) -> Result<Option<EntityRef>> {
        let mut hydrated = vec![];
        let instance = self.load_entity_once(entity, id, graph, &mut hydrated).await?;

        let empty = EntityGraph::new("");
        self.complete(hydrated, graph, &empty).await?;
        Ok(instance)
    }

    /// Initializes one collection of a managed owner.
    pub(crate) async fn load_collection(&mut self, owner: &EntityRef, index: usize) -> Result<()> {
        let shared = self.shared.clone();
        let style = {
            let data = owner.data();
            let attr = &data.model().attributes[index];
            match fetch_policy(&shared.engine, &self.profiles).decide(attr, None) {
                Fetch::Eager(style) | Fetch::Lazy(style) => style,
            }
        };

        let hydrated = self.load_collection_once(owner, index, style, None).await?;
        let empty = EntityGraph::new("");
        self.complete(hydrated, None, &empty).await
    }

    /// Initializes one to-one reference of a managed owner.
    pub(crate) async fn load_to_one(&mut self, owner: &EntityRef, index: usize) -> Result<()> {
        let hydrated = self.load_to_one_once(owner, index, None).await?;
        let empty = EntityGraph::new("");
        self.complete(hydrated, None, &empty).await
    }

    /// Lowers, runs, and assembles `stmt`. Associations the fetch policy
    /// makes eager are left to [`Session::complete`].
    pub(crate) async fn fetch_once(
        &mut self,
        stmt: &SqmSelectStatement,
        bindings: &Bindings,
        filters: &EnabledFilters,
        scope: FilterScope,
        graph: Option<GraphNode<'_>>,
        register_subselects: bool,
    ) -> Result<Loaded> {
        let shared = self.shared.clone();
        let engine = &shared.engine;

        let LoweredSelect { stmt: mut sql, params, plan } = engine.lower_select(stmt, filters, scope)?;
        sql.lock = bindings.lock();
        let rendered = engine.render(&Statement::from(sql), &params, bindings)?;
        let rows = engine
            .query_rows(self.connection().await?, rendered, plan.columns.clone())
            .await?;

        let mut assembler = Assembler::new(engine, &mut self.context);
        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            results.push(assembler.row(&plan, row)?);
        }
        let assembled = assembler.finish()?;

        if plan.fetches_collection(&engine.schema) {
            dedupe_entity_rows(&plan, &mut results);
        }

        for instance in &assembled.hydrated {
            self.cache_entity(engine, instance);
        }
        for (owner, index) in &assembled.collections {
            cache_collection(engine, owner, *index);
        }

        if register_subselects {
            self.register_subselects(engine, stmt, bindings, filters, &plan, &results, graph);
        }

        Ok(Loaded {
            rows: results,
            hydrated: assembled.hydrated,
        })
    }

    /// Initializes the eager associations of `hydrated`, and of whatever
    /// those loads hydrate in turn.
    pub(crate) async fn complete<'g>(
        &mut self,
        hydrated: Vec<EntityRef>,
        graph: Option<GraphNode<'g>>,
        empty: &'g EntityGraph,
    ) -> Result<()> {
        let mut queue = VecDeque::new();
        for instance in &hydrated {
            self.plan_eager(instance, graph, empty, &mut queue);
        }
        self.run_eager(queue, empty).await
    }

    async fn run_eager<'g>(
        &mut self,
        mut queue: VecDeque<Work<'g>>,
        empty: &'g EntityGraph,
    ) -> Result<()> {
        while let Some(work) = queue.pop_front() {
            let (hydrated, node) = match work {
                Work::Collection {
                    owner,
                    index,
                    style,
                    node,
                } => (
                    self.load_collection_once(&owner, index, style, node).await?,
                    node,
                ),
                Work::ToOne { owner, index, node } => {
                    (self.load_to_one_once(&owner, index, node).await?, node)
                }
            };

            for instance in &hydrated {
                self.plan_eager(instance, node, empty, &mut queue);
            }
        }
        Ok(())
    }

    /// Lowers and runs a user select whose rows stay in the database until
    /// read, for [`Session::assemble_streamed`] to turn into results.
    pub(crate) async fn open_cursor(
        &mut self,
        stmt: &SqmSelectStatement,
        bindings: &Bindings,
    ) -> Result<(ValueStream, SelectionPlan)> {
        let shared = self.shared.clone();
        let engine = &shared.engine;
        let filters = self.filters.clone();

        let LoweredSelect { stmt: mut sql, params, plan } =
            engine.lower_select(stmt, &filters, FilterScope::All)?;
        sql.lock = bindings.lock();
        let rendered = engine.render(&Statement::from(sql), &params, bindings)?;
        let rows = engine
            .open_cursor(self.connection().await?, rendered, plan.columns.clone())
            .await?;
        Ok((rows, plan))
    }

    /// Assembles one row read from `cursor` and initializes the eager
    /// associations of what it hydrated. Those loads share the connection,
    /// so whatever the cursor has left is buffered first.
    pub(crate) async fn assemble_streamed(
        &mut self,
        plan: &SelectionPlan,
        row: &[Value],
        cursor: &mut ValueStream,
        graph: Option<GraphNode<'_>>,
    ) -> Result<Vec<RowValue>> {
        let shared = self.shared.clone();
        let engine = &shared.engine;

        let mut assembler = Assembler::new(engine, &mut self.context);
        let values = assembler.row(plan, row)?;
        let assembled = assembler.finish()?;
        for instance in &assembled.hydrated {
            self.cache_entity(engine, instance);
        }

        let empty = EntityGraph::new("");
        let mut queue = VecDeque::new();
        for instance in &assembled.hydrated {
            self.plan_eager(instance, graph, &empty, &mut queue);
        }
        if !queue.is_empty() {
            if cursor.is_live() {
                trace!("buffering open cursor before eager loads");
            }
            cursor.buffer_remaining().await?;
            self.run_eager(queue, &empty).await?;
        }
        Ok(values)
    }

    /// Queues the eager associations of `instance` and enqueues batchable
    /// lazy ones so a later access picks up their siblings.
    fn plan_eager<'g>(
        &mut self,
        instance: &EntityRef,
        graph: Option<GraphNode<'g>>,
        empty: &'g EntityGraph,
        queue: &mut VecDeque<Work<'g>>,
    ) {
        let shared = self.shared.clone();
        let engine = &shared.engine;
        let schema = &engine.schema;
        let policy = fetch_policy(engine, &self.profiles);

        let data = instance.data();
        if data.hollow {
            return;
        }
        let model = data.model();
        let node = node_for(schema, graph, model.id);
        let id = data.id().clone();

        for (attr, slot) in model.attributes.iter().zip(&data.slots) {
            let decision = policy.decide(attr, node);
            let child = node.and_then(|node| node.child(&attr.name, empty));

            match (slot, decision) {
                (Slot::ToOne { target: Lazy::Initialized(Some(target)), .. }, Fetch::Eager(_))
                    if !target.is_loaded() =>
                {
                    queue.push_back(Work::ToOne {
                        owner: instance.clone(),
                        index: attr.id.index,
                        node: child,
                    });
                }
                (Slot::ToOne { key, target: Lazy::Uninitialized }, decision) => {
                    let Some(to_one) = attr.as_to_one() else { continue };
                    let batched = matches!(
                        decision,
                        Fetch::Eager(FetchStyle::Batch(_)) | Fetch::Lazy(FetchStyle::Batch(_))
                    );
                    if batched && !key.is_null() {
                        let root = schema.entity(to_one.target).root;
                        self.context.batch.add_entity(root, key.clone());
                    }
                    if matches!(decision, Fetch::Eager(_)) {
                        queue.push_back(Work::ToOne {
                            owner: instance.clone(),
                            index: attr.id.index,
                            node: child,
                        });
                    }
                }
                (Slot::Collection(Lazy::Uninitialized), decision) => {
                    let (Fetch::Eager(style) | Fetch::Lazy(style)) = decision;
                    if let FetchStyle::Batch(_) = style {
                        self.context.batch.add_collection(role_of(attr), id.clone());
                    }
                    if let Fetch::Eager(style) = decision {
                        queue.push_back(Work::Collection {
                            owner: instance.clone(),
                            index: attr.id.index,
                            style,
                            node: child,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    /// Remembers the query that loaded each selected entity, so collections
    /// fetched by subselect load for every owner of the result at once.
    #[allow(clippy::too_many_arguments)]
    fn register_subselects(
        &mut self,
        engine: &Engine,
        stmt: &SqmSelectStatement,
        bindings: &Bindings,
        filters: &EnabledFilters,
        plan: &SelectionPlan,
        rows: &[Vec<RowValue>],
        graph: Option<GraphNode<'_>>,
    ) {
        let schema = &engine.schema;
        let policy = fetch_policy(engine, &self.profiles);

        for (position, reader) in plan.results.iter().enumerate() {
            let ResultReader::Entity(index) = reader else {
                continue;
            };

            let mut keys = IndexSet::new();
            let mut roles = IndexSet::new();
            for row in rows {
                let Some(RowValue::Entity(owner)) = row.get(position) else {
                    continue;
                };
                let data = owner.data();
                let model = data.model();
                let node = node_for(schema, graph, model.id);

                for (attr, slot) in model.attributes.iter().zip(&data.slots) {
                    if !matches!(slot, Slot::Collection(Lazy::Uninitialized)) {
                        continue;
                    }
                    let (Fetch::Eager(style) | Fetch::Lazy(style)) = policy.decide(attr, node);
                    if style == FetchStyle::Subselect {
                        roles.insert(role_of(attr));
                    }
                }
                keys.insert(data.id().clone());
            }

            if roles.is_empty() {
                continue;
            }

            // Same numbering as the lowered copy the plan refers to
            let stmt = stmt.copy(&mut SqmCopyContext::new(0, 0));
            let fetch = Rc::new(SubselectFetch {
                stmt,
                bindings: bindings.unlocked(),
                filters: filters.clone(),
                owner: plan.entities[*index].from,
                keys: keys.into_iter().collect(),
            });
            debug!(
                owners = fetch.keys.len(),
                roles = roles.len(),
                "registered subselect fetch"
            );
            for role in roles {
                self.context.add_subselect(role, fetch.clone());
            }
        }
    }

    /// Resolves an identity from the persistence context, the second-level
    /// cache, or the database, in that order.
    pub(crate) async fn load_entity_once(
        &mut self,
        entity: EntityId,
        id: Value,
        graph: Option<GraphNode<'_>>,
        hydrated: &mut Vec<EntityRef>,
    ) -> Result<Option<EntityRef>> {
        let shared = self.shared.clone();
        let engine = &shared.engine;
        let schema = &engine.schema;
        let root = schema.entity(entity).root;
        let key = EntityKey::new(root, id.clone());

        if let Some(entry) = self.context.get(&key) {
            if entry.is_deleted() {
                return Ok(None);
            }
            if entry.instance.is_loaded() {
                let instance = entry.instance.clone();
                return Ok(Some(instance).filter(|instance| {
                    schema.app.is_subtype_of(instance.entity_id(), entity)
                }));
            }
        }

        if let Some(instance) = self.cached_entity(engine, entity, &id) {
            hydrated.push(instance.clone());
            return Ok(Some(instance));
        }

        let policy = fetch_policy(engine, &self.profiles);
        let ids = match policy.entity_batch_size(root) {
            Some(size) => self.context.batch.entity_batch(root, &id, size),
            None => vec![id],
        };
        let node = node_for(schema, graph, entity);
        let mapping = schema.mapping_for(entity);
        let joins: Vec<usize> = schema
            .entity(entity)
            .attributes
            .iter()
            .filter(|attr| attr.is_association())
            .filter(|attr| policy.decide(attr, node) == Fetch::Eager(FetchStyle::Join))
            .filter(|attr| {
                !matches!(
                    mapping.attribute(attr.id.index),
                    ValueMapping::ToOneValue(ToOneMapping::Inverse { .. })
                )
            })
            .map(|attr| attr.id.index)
            .collect();

        debug!(
            entity = %schema.entity(entity).name,
            ids = ids.len(),
            joins = joins.len(),
            "loading by identifier"
        );

        let stmt = load::by_ids(schema, entity, &ids, &joins)?;
        let filters = self.filters.clone();
        let loaded = self
            .fetch_once(&stmt, &Bindings::default(), &filters, FilterScope::TenantOnly, graph, true)
            .await?;
        hydrated.extend(loaded.hydrated);

        Ok(self
            .context
            .get(&key)
            .filter(|entry| !entry.is_deleted() && entry.instance.is_loaded())
            .map(|entry| entry.instance.clone())
            .filter(|instance| schema.app.is_subtype_of(instance.entity_id(), entity)))
    }

    /// Initializes the collection at `index`; returns the instances the load
    /// hydrated.
    pub(crate) async fn load_collection_once(
        &mut self,
        owner: &EntityRef,
        index: usize,
        style: FetchStyle,
        graph: Option<GraphNode<'_>>,
    ) -> Result<Vec<EntityRef>> {
        let shared = self.shared.clone();
        let engine = &shared.engine;
        let schema = &engine.schema;

        let (role, id) = {
            let data = owner.data();
            if data.collection(index).is_some_and(Lazy::is_initialized) {
                return Ok(vec![]);
            }
            (role_of(&data.model().attributes[index]), data.id().clone())
        };

        let mut hydrated = vec![];
        if self
            .cached_collection(engine, owner, index, &id, &mut hydrated)
            .await?
        {
            return Ok(hydrated);
        }

        let filters = self.filters.clone();
        let subselect = match style {
            FetchStyle::Subselect => match self.context.subselect(role, &id) {
                Some(fetch) => load::collection_by_subselect(schema, role, &fetch)?
                    .map(|stmt| (stmt, fetch)),
                None => None,
            },
            _ => None,
        };

        let (stmt, bindings, filters, owners) = match subselect {
            Some((stmt, fetch)) => {
                debug!(role = %schema.role(role), owners = fetch.keys.len(), "loading collection by subselect");
                (stmt, fetch.bindings.clone(), fetch.filters.clone(), fetch.keys.clone())
            }
            None => {
                let keys = match style {
                    FetchStyle::Batch(size) => self.context.batch.collection_batch(role, &id, size),
                    _ => vec![id.clone()],
                };
                debug!(role = %schema.role(role), owners = keys.len(), ?style, "loading collection");
                let stmt = load::collection_by_keys(schema, role, &keys)?;
                (stmt, Bindings::default(), filters, keys)
            }
        };

        let loaded = self
            .fetch_once(&stmt, &bindings, &filters, FilterScope::All, graph, false)
            .await?;
        hydrated.extend(loaded.hydrated);

        // Owners without rows (filtered out, or gone since they were read)
        // get an empty collection.
        let root = schema.entity(role.entity).root;
        for key in owners {
            let Some(instance) = self.context.instance(&EntityKey::new(root, key)) else {
                continue;
            };
            let initialized = instance
                .data()
                .collection(index)
                .map_or(true, Lazy::is_initialized);
            if initialized || !instance.is_loaded() {
                continue;
            }

            instance.data_mut().slots[index] = Slot::Collection(Lazy::Initialized(vec![]));
            if let Some(entry) = self.context.entry_of_mut(schema, &instance) {
                entry.collections.insert(index, vec![]);
            }
            let id = instance.id();
            self.context.batch.remove_collection(role, &id);
            self.context.remove_subselect(role, &id);
            engine.stats.collection_loaded();
            cache_collection(engine, &instance, index);
        }

        if owner.data().collection(index).is_some_and(|state| !state.is_initialized()) {
            return Err(Error::lazy_initialization(format!(
                "{} (owner not found)",
                schema.role(role)
            )));
        }
        Ok(hydrated)
    }

    /// Resolves the to-one reference at `index`; returns the instances the
    /// load hydrated.
    pub(crate) async fn load_to_one_once(
        &mut self,
        owner: &EntityRef,
        index: usize,
        graph: Option<GraphNode<'_>>,
    ) -> Result<Vec<EntityRef>> {
        let shared = self.shared.clone();
        let schema = &shared.engine.schema;
        let mut hydrated = vec![];

        let (attr, key, target, owner_entity, owner_id) = {
            let data = owner.data();
            let Slot::ToOne { key, target } = &data.slots[index] else {
                return Ok(hydrated);
            };
            (
                data.model().attributes[index].clone(),
                key.clone(),
                target.clone(),
                data.entity,
                data.id().clone(),
            )
        };
        let Some(to_one) = attr.as_to_one() else {
            return Ok(hydrated);
        };

        match target {
            Lazy::Initialized(Some(target)) if !target.is_loaded() => {
                let loaded = self
                    .load_entity_once(target.entity_id(), target.id(), graph, &mut hydrated)
                    .await?;
                if loaded.is_none() {
                    return Err(Error::entity_not_found(target.entity_name(), target.id().to_string()));
                }
                return Ok(hydrated);
            }
            Lazy::Initialized(_) => return Ok(hydrated),
            _ => {}
        }

        let resolved = match schema.mapping_for(owner_entity).attribute(index) {
            ValueMapping::ToOneValue(ToOneMapping::Inverse { owning }) => {
                let stmt = load::by_reference(schema, to_one.target, *owning, &owner_id);
                let filters = self.filters.clone();
                let loaded = self
                    .fetch_once(&stmt, &Bindings::default(), &filters, FilterScope::TenantOnly, graph, false)
                    .await?;
                hydrated.extend(loaded.hydrated);
                loaded.rows.into_iter().find_map(|row| match row.into_iter().next() {
                    Some(RowValue::Entity(entity)) => Some(entity),
                    _ => None,
                })
            }
            _ if key.is_null() => None,
            _ => {
                let target = self
                    .load_entity_once(to_one.target, key.clone(), graph, &mut hydrated)
                    .await?;
                match target {
                    Some(target) => Some(target),
                    None => {
                        return Err(Error::entity_not_found(
                            &schema.entity(to_one.target).name,
                            key.to_string(),
                        ))
                    }
                }
            }
        };

        trace!(role = %schema.role(attr.id), found = resolved.is_some(), "resolved reference");
        let mut data = owner.data_mut();
        if let Slot::ToOne { target, .. } = &mut data.slots[index] {
            *target = Lazy::Initialized(resolved);
        }
        Ok(hydrated)
    }

    /// Builds an instance from its cached state. Misses when the entry is of
    /// an unrelated type or belongs to another tenant.
    fn cached_entity(&mut self, engine: &Engine, entity: EntityId, id: &Value) -> Option<EntityRef> {
        let region = engine.entity_region(entity)?;
        let schema = &engine.schema;

        let (concrete, state) = match region.get(id) {
            Some(CacheEntry::Entity { entity: concrete, state, .. })
                if schema.app.is_subtype_of(concrete, entity) =>
            {
                (concrete, state)
            }
            _ => {
                engine.stats.cache_miss();
                trace!(region = region.name(), %id, "cache miss");
                return None;
            }
        };

        let model = schema.entity(concrete);
        if let (Some(tenant), Some(attr)) = (&self.tenant, model.tenant_attribute()) {
            if state.get(attr.id.index) != Some(tenant) {
                engine.stats.cache_miss();
                return None;
            }
        }

        let mapping = schema.mapping_for(concrete);
        let slots = model
            .attributes
            .iter()
            .zip(state.iter())
            .map(|(attr, value)| match &attr.ty {
                AttributeTy::Basic(_) | AttributeTy::Embedded(_) => Slot::Value(value.clone()),
                AttributeTy::ToOne(_) => {
                    let inverse = matches!(
                        mapping.attribute(attr.id.index),
                        ValueMapping::ToOneValue(ToOneMapping::Inverse { .. })
                    );
                    Slot::ToOne {
                        key: value.clone(),
                        target: if value.is_null() && !inverse {
                            Lazy::Initialized(None)
                        } else {
                            Lazy::Uninitialized
                        },
                    }
                }
                AttributeTy::Collection(_) => Slot::Collection(Lazy::Uninitialized),
            })
            .collect();

        let key = EntityKey::new(model.root, id.clone());
        let instance = match self.context.instance(&key) {
            Some(instance) => instance,
            None => {
                let instance = EntityRef::proxy(schema, concrete, id.clone());
                self.context
                    .insert(key.clone(), EntityEntry::proxy(instance.clone()));
                instance
            }
        };

        let state = {
            let mut data = instance.data_mut();
            data.entity = concrete;
            data.slots = slots;
            data.hollow = false;
            data.state()
        };
        if let Some(entry) = self.context.get_mut(&key) {
            entry.loaded = Some(state);
            entry.collections.clear();
        }
        self.context.batch.remove_entity(key.root, id);
        link_references(engine, &self.context, &instance);

        engine.stats.cache_hit();
        trace!(region = region.name(), %id, "cache hit");
        Some(instance)
    }

    /// Initializes a collection from its cached element keys. Entity
    /// elements missing from the context are loaded with one statement.
    async fn cached_collection(
        &mut self,
        engine: &Engine,
        owner: &EntityRef,
        index: usize,
        id: &Value,
        hydrated: &mut Vec<EntityRef>,
    ) -> Result<bool> {
        let schema = &engine.schema;
        let (role, target) = {
            let data = owner.data();
            let attr = &data.model().attributes[index];
            (role_of(attr), attr.as_collection().and_then(|c| c.target()))
        };
        let Some(region) = engine.collection_region(role) else {
            return Ok(false);
        };
        let Some(CacheEntry::Collection(keys)) = region.get(id) else {
            engine.stats.cache_miss();
            trace!(region = region.name(), owner = %id, "cache miss");
            return Ok(false);
        };

        let elements = match target {
            None => keys.iter().cloned().map(Element::Value).collect(),
            Some(target) => {
                let root = schema.entity(target).root;
                let mut missing = vec![];
                for key in &keys {
                    let known = self
                        .context
                        .get(&EntityKey::new(root, key.clone()))
                        .is_some_and(|entry| entry.instance.is_loaded());
                    if known {
                        continue;
                    }
                    match self.cached_entity(engine, target, key) {
                        Some(instance) => hydrated.push(instance),
                        None => missing.push(key.clone()),
                    }
                }

                if !missing.is_empty() {
                    let stmt = load::by_ids(schema, target, &missing, &[])?;
                    let filters = self.filters.clone();
                    let loaded = self
                        .fetch_once(&stmt, &Bindings::default(), &filters, FilterScope::TenantOnly, None, false)
                        .await?;
                    hydrated.extend(loaded.hydrated);
                }

                let mut elements = Vec::with_capacity(keys.len());
                for key in &keys {
                    match self
                        .context
                        .get(&EntityKey::new(root, key.clone()))
                        .filter(|entry| !entry.is_deleted() && entry.instance.is_loaded())
                    {
                        Some(entry) => elements.push(Element::Entity(entry.instance.clone())),
                        None => {
                            // Stale: an element is gone. Fall back to the database.
                            region.evict(id);
                            engine.stats.cache_miss();
                            return Ok(false);
                        }
                    }
                }
                elements
            }
        };

        owner.data_mut().slots[index] = Slot::Collection(Lazy::Initialized(elements));
        if let Some(entry) = self.context.entry_of_mut(schema, owner) {
            entry.collections.insert(index, keys);
        }
        self.context.batch.remove_collection(role, id);
        self.context.remove_subselect(role, id);

        engine.stats.cache_hit();
        trace!(region = region.name(), owner = %id, "cache hit");
        Ok(true)
    }

    /// Puts the state of a freshly read instance into its region.
    pub(crate) fn cache_entity(&self, engine: &Engine, instance: &EntityRef) {
        let data = instance.data();
        if data.hollow {
            return;
        }
        let Some(region) = engine.entity_region(data.entity) else {
            return;
        };

        let model = data.model();
        let state = data.state();
        let version = model.version.map(|index| state[index].clone());
        region.put(
            data.id().clone(),
            CacheEntry::Entity {
                entity: data.entity,
                state,
                version,
            },
        );
        engine.stats.cache_put();
    }
}

pub(crate) fn cache_collection(engine: &Engine, owner: &EntityRef, index: usize) {
    let data = owner.data();
    let role = role_of(&data.model().attributes[index]);
    let Some(region) = engine.collection_region(role) else {
        return;
    };
    let Some(Lazy::Initialized(elements)) = data.collection(index) else {
        return;
    };
    region.put(
        data.id().clone(),
        CacheEntry::Collection(elements.iter().map(Element::key).collect()),
    );
    engine.stats.cache_put();
}

pub(crate) fn fetch_policy<'a>(engine: &'a Engine, profiles: &'a [String]) -> FetchPolicy<'a> {
    FetchPolicy::new(
        &engine.schema,
        profiles
            .iter()
            .filter_map(|name| engine.schema.app.fetch_profile(name)),
        engine.settings.default_batch_fetch_size,
    )
}

/// The graph node that applies to an instance of `entity`. Nodes without
/// an entity (named attributes lacking a subgraph) apply to anything.
fn node_for<'g>(
    schema: &Schema,
    graph: Option<GraphNode<'g>>,
    entity: EntityId,
) -> Option<GraphNode<'g>> {
    graph.filter(|node| {
        let name = node.graph.entity();
        name.is_empty()
            || schema
                .entity_by_name(name)
                .is_some_and(|graph| schema.app.is_subtype_of(entity, graph.id))
    })
}

/// A collection fetch repeats the owner once per element; entity results
/// are returned once each.
fn dedupe_entity_rows(plan: &SelectionPlan, rows: &mut Vec<Vec<RowValue>>) {
    if !matches!(plan.results.as_slice(), [ResultReader::Entity(_)]) {
        return;
    }
    let mut seen = HashSet::new();
    rows.retain(|row| match row.first() {
        Some(RowValue::Entity(entity)) => seen.insert(ByAddress(entity.0.clone())),
        _ => true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{schema::EntityDef, stmt::Type};
    use std::sync::Arc;

    #[test]
    fn repeated_owners_keep_their_first_row() {
        let mut builder = Schema::builder();
        builder.entity(EntityDef::new("Owner").id("id", Type::I64));
        let schema = Arc::new(builder.build().unwrap());
        let a = EntityRef::new(&schema, "Owner").unwrap();
        let b = EntityRef::new(&schema, "Owner").unwrap();

        let plan = SelectionPlan {
            results: vec![ResultReader::Entity(0)],
            ..SelectionPlan::default()
        };
        let row = |owner: &EntityRef| vec![RowValue::Entity(owner.clone())];
        let mut rows = vec![row(&a), row(&b), row(&a), row(&b), row(&a)];
        dedupe_entity_rows(&plan, &mut rows);

        let owners: Vec<_> = rows
            .iter()
            .map(|row| match &row[0] {
                RowValue::Entity(owner) => owner.clone(),
                RowValue::Value(value) => panic!("unexpected {value:?}"),
            })
            .collect();
        assert_eq!(owners.len(), 2);
        assert!(owners[0].ptr_eq(&a));
        assert!(owners[1].ptr_eq(&b));
    }
}
