pub(crate) mod context;
mod fetch;
mod flush;

use context::{EntityEntry, EntityKey, EntryStatus, PersistenceContext};

use crate::{
    engine::{
        lower::{EnabledFilters, FilterScope},
        Bindings, Engine, ResourceRegistry,
    },
    entity::{Element, EntityRef, Lazy, Slot},
    factory::Shared,
    graph::{EntityGraph, GraphNode, GraphSemantic},
    query::{MutationQuery, Query},
};

use quarry_core::{
    driver::operation::Transaction,
    hql,
    schema::app::{EntityId, IdStrategy, TENANT_FILTER, TENANT_PARAM},
    sqm::{criteria::CriteriaQuery, SqmSelectStatement, SqmStatement},
    stmt::Value,
    Connection, Error, Result, Schema,
};

use by_address::ByAddress;
use indexmap::IndexMap;
use std::{collections::HashSet, fmt, sync::Arc};
use tracing::{debug, warn};

/// A unit of work: the persistence context, one connection, and the
/// filters, fetch profiles, and tenant that apply to everything it loads.
///
/// A session is single-threaded and short-lived. Instances it hands out
/// stay managed until the session is cleared or closed; reading the same
/// row twice returns the same instance.
pub struct Session {
    shared: Arc<Shared>,
    context: PersistenceContext,

    /// Opened on first use
    connection: Option<Box<dyn Connection>>,

    transaction: bool,
    filters: EnabledFilters,

    /// Enabled fetch profiles, in the order they were enabled
    profiles: Vec<String>,

    tenant: Option<Value>,

    /// Streams and other results that must be closed before the session
    pub(crate) resources: ResourceRegistry,

    closed: bool,
}

/// Work item of a cascading persist.
enum Cascade {
    Visit(EntityRef),
    Register(EntityRef),
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>, tenant: Option<Value>) -> Session {
        let mut filters = EnabledFilters::new();
        if let Some(tenant) = &tenant {
            filters.insert(
                TENANT_FILTER.to_string(),
                IndexMap::from([(TENANT_PARAM.to_string(), tenant.clone())]),
            );
        }

        Session {
            shared,
            context: PersistenceContext::default(),
            connection: None,
            transaction: false,
            filters,
            profiles: vec![],
            tenant,
            resources: ResourceRegistry::default(),
            closed: false,
        }
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.shared.engine
    }

    pub(crate) async fn connection(&mut self) -> Result<&mut dyn Connection> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => {
                debug!(url = %self.shared.driver.url(), "opening connection");
                self.shared.driver.connect().await?
            }
        };
        Ok(self.connection.insert(connection).as_mut())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::illegal_argument("session is closed"));
        }
        Ok(())
    }

    /// Flushes before a query runs, so it sees the session's own changes.
    pub(crate) async fn auto_flush(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.engine().settings.auto_flush {
            return Ok(());
        }
        if self.flush_changes().await? {
            debug!("auto-flushed before query");
            self.engine().stats.flushed();
        }
        Ok(())
    }

    /// Whether `stmt` fetch joins a collection, which rules out applying
    /// first/max results in SQL.
    pub(crate) fn fetches_collection(&self, stmt: &SqmSelectStatement) -> Result<bool> {
        let engine = self.engine();
        let lowered = engine.lower_select(stmt, &self.filters, FilterScope::All)?;
        Ok(lowered.plan.fetches_collection(&engine.schema))
    }

    /// Runs a bulk `update`, `delete` or `insert`. Bulk statements bypass
    /// the persistence context, so the target's cache region is cleared.
    pub(crate) async fn execute_mutation(&mut self, stmt: &SqmStatement, bindings: &Bindings) -> Result<u64> {
        let shared = self.shared.clone();
        let engine = &shared.engine;

        let lowered = engine.lower_mutation(stmt, &self.filters)?;
        let mut count = 0;
        for sql in &lowered.stmts {
            let rendered = engine.render(sql, &lowered.params, bindings)?;
            count = engine.execute_update(self.connection().await?, rendered).await?;
        }

        let target = match stmt {
            SqmStatement::Update(stmt) => stmt.target.ty.as_entity(),
            SqmStatement::Delete(stmt) => stmt.target.ty.as_entity(),
            SqmStatement::Insert(stmt) => stmt.target.ty.as_entity(),
            SqmStatement::Select(_) => None,
        };
        if let Some(region) = target.and_then(|entity| engine.entity_region(entity)) {
            debug!(region = region.name(), "clearing region after bulk statement");
            region.clear();
        }
        Ok(count)
    }

    /// Makes a transient instance managed; the insert runs on the next
    /// flush, or right away for database-generated identifiers.
    ///
    /// Associations marked for persist cascading are persisted with it;
    /// referenced instances are registered first.
    pub async fn persist(&mut self, instance: &EntityRef) -> Result<()> {
        self.check_open()?;
        let shared = self.shared.clone();
        let schema = &shared.engine.schema;

        let mut visited = HashSet::new();
        let mut work = vec![Cascade::Visit(instance.clone())];

        while let Some(step) = work.pop() {
            match step {
                Cascade::Visit(instance) => {
                    if !visited.insert(ByAddress(instance.0.clone())) {
                        continue;
                    }
                    if let Some(entry) = self.context.entry_of_mut(schema, &instance) {
                        if !entry.instance.ptr_eq(&instance) {
                            return Err(Error::illegal_argument(format!(
                                "a different `{}` instance with identifier {} is already managed",
                                instance.entity_name(),
                                instance.id()
                            )));
                        }
                        if entry.is_deleted() {
                            entry.status = EntryStatus::Managed;
                        }
                        continue;
                    }

                    work.push(Cascade::Register(instance.clone()));

                    let data = instance.data();
                    for (attr, slot) in data.model().attributes.iter().zip(&data.slots) {
                        if let Slot::ToOne {
                            target: Lazy::Initialized(Some(target)),
                            ..
                        } = slot
                        {
                            if attr.cascade().persist && !self.context.contains(schema, target) {
                                work.push(Cascade::Visit(target.clone()));
                            }
                        }
                    }
                }
                Cascade::Register(instance) => {
                    if self.context.contains(schema, &instance) {
                        continue;
                    }
                    self.register(&instance).await?;

                    let data = instance.data();
                    for (attr, slot) in data.model().attributes.iter().zip(&data.slots) {
                        let Slot::Collection(Lazy::Initialized(elements)) = slot else {
                            continue;
                        };
                        if !attr.cascade().persist {
                            continue;
                        }
                        for element in elements.iter().rev() {
                            if let Element::Entity(target) = element {
                                work.push(Cascade::Visit(target.clone()));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Assigns the identifier, version and tenant of a new instance and
    /// adds it to the context.
    async fn register(&mut self, instance: &EntityRef) -> Result<()> {
        let shared = self.shared.clone();
        let engine = &shared.engine;
        let schema = &engine.schema;

        let (entity, mut id) = {
            let data = instance.data();
            if data.hollow {
                return Err(Error::illegal_argument("cannot persist an uninitialized proxy"));
            }
            (data.entity, data.id().clone())
        };
        let model = schema.entity(entity);
        let strategy = schema.entity(model.root).identifier.strategy;

        if id.is_null() {
            match strategy {
                IdStrategy::Assigned => {
                    return Err(Error::illegal_argument(format!(
                        "identifier of `{}` must be assigned before calling persist",
                        model.name
                    )))
                }
                IdStrategy::Uuid => {
                    id = model.id_attribute().expr_ty().cast(Value::Uuid(uuid::Uuid::new_v4()))?;
                    instance.data_mut().slots[model.identifier.attribute] = Slot::Value(id.clone());
                }
                IdStrategy::Identity => {}
            }
        }

        {
            let mut data = instance.data_mut();
            if let Some(attr) = model.version_attribute() {
                if let Slot::Value(value @ Value::Null) = &mut data.slots[attr.id.index] {
                    *value = flush::initial_version(&attr.expr_ty());
                }
            }
            if let (Some(attr), Some(tenant)) = (model.tenant_attribute(), &self.tenant) {
                match &mut data.slots[attr.id.index] {
                    Slot::Value(value @ Value::Null) => *value = tenant.clone(),
                    Slot::Value(value) if *value != *tenant => {
                        return Err(Error::illegal_argument(format!(
                            "`{}` belongs to tenant {value}, not to the session's tenant {tenant}",
                            model.name
                        )))
                    }
                    _ => {}
                }
            }
        }

        if !id.is_null() {
            debug!(entity = %model.name, %id, "persisting");
            self.context
                .insert(EntityKey::new(model.root, id), EntityEntry::pending(instance.clone()));
            return Ok(());
        }

        // The identifier comes from the insert, so the referenced rows
        // have to exist first.
        let pending: Vec<EntityRef> = {
            let data = instance.data();
            data.slots
                .iter()
                .filter_map(|slot| match slot {
                    Slot::ToOne {
                        target: Lazy::Initialized(Some(target)),
                        ..
                    } => Some(target.clone()),
                    _ => None,
                })
                .filter(|target| {
                    self.context
                        .entry_of(schema, target)
                        .is_some_and(|entry| !entry.exists)
                })
                .collect()
        };
        for target in pending {
            self.insert_entity(engine, &target).await?;
            let state = target.data().state();
            if let Some(entry) = self.context.entry_of_mut(schema, &target) {
                entry.exists = true;
                entry.loaded = Some(state);
            }
        }

        self.insert_entity(engine, instance).await?;
        let (id, state) = {
            let data = instance.data();
            (data.id().clone(), data.state())
        };
        debug!(entity = %model.name, %id, "persisted with generated identifier");
        self.context
            .insert(EntityKey::new(model.root, id), EntityEntry::loaded(instance.clone(), state));
        Ok(())
    }

    /// The instance of `entity` with identifier `id`, from the session, the
    /// second-level cache, or the database.
    pub async fn find(&mut self, entity: &str, id: impl Into<Value>) -> Result<Option<EntityRef>> {
        self.check_open()?;
        let (entity, id) = self.identify(entity, id.into())?;
        self.load_entity(entity, id, None).await
    }

    /// Like [`find`](Session::find), with `graph` deciding what is fetched
    /// along with the instance.
    pub async fn find_with(
        &mut self,
        entity: &str,
        id: impl Into<Value>,
        graph: &EntityGraph,
        semantic: GraphSemantic,
    ) -> Result<Option<EntityRef>> {
        self.check_open()?;
        let (entity, id) = self.identify(entity, id.into())?;
        let root = graph.validate(&self.engine().schema)?;
        if !self.engine().schema.app.is_subtype_of(entity, root) {
            return Err(Error::illegal_argument(format!(
                "entity graph for `{}` does not apply to `{}`",
                graph.entity(),
                self.engine().schema.entity(entity).name
            )));
        }
        self.load_entity(entity, id, Some(GraphNode { graph, semantic })).await
    }

    /// A managed instance for `id` without reading it: the existing instance
    /// if the session has one, an uninitialized proxy otherwise.
    pub fn get_reference(&mut self, entity: &str, id: impl Into<Value>) -> Result<EntityRef> {
        self.check_open()?;
        let (entity, id) = self.identify(entity, id.into())?;
        let schema = self.shared.engine.schema.clone();
        let root = schema.entity(entity).root;
        let key = EntityKey::new(root, id.clone());

        if let Some(instance) = self.context.instance(&key) {
            if !schema.app.is_subtype_of(instance.entity_id(), entity)
                && !schema.app.is_subtype_of(entity, instance.entity_id())
            {
                return Err(Error::illegal_argument(format!(
                    "identifier {id} belongs to a `{}`, not a `{}`",
                    instance.entity_name(),
                    schema.entity(entity).name
                )));
            }
            return Ok(instance);
        }

        let instance = EntityRef::proxy(&schema, entity, id.clone());
        self.context.insert(key, EntityEntry::proxy(instance.clone()));
        self.context.batch.add_entity(root, id);
        Ok(instance)
    }

    /// Schedules a managed instance for deletion, cascading to associations
    /// marked for remove cascading and to orphan-removal collections.
    pub async fn remove(&mut self, instance: &EntityRef) -> Result<()> {
        self.check_open()?;
        let shared = self.shared.clone();
        let schema = &shared.engine.schema;

        let mut visited = HashSet::new();
        let mut work = vec![instance.clone()];

        while let Some(instance) = work.pop() {
            if !visited.insert(ByAddress(instance.0.clone())) {
                continue;
            }
            match self.context.entry_of(schema, &instance) {
                Some(entry) if entry.instance.ptr_eq(&instance) => {
                    if entry.is_deleted() {
                        continue;
                    }
                }
                _ => {
                    return Err(Error::illegal_argument(format!(
                        "cannot remove a detached `{}` instance",
                        instance.entity_name()
                    )))
                }
            }
            if !instance.is_loaded() {
                self.initialize(&instance).await?;
            }

            let attributes = instance.data().model().attributes.clone();
            for attr in &attributes {
                let cascade = attr.cascade();
                let orphans = attr.as_collection().is_some_and(|collection| collection.orphan_removal);
                if !cascade.remove && !orphans {
                    continue;
                }

                if attr.as_to_one().is_some() {
                    if let Some(target) = self.to_one(&instance, &attr.name).await? {
                        work.push(target);
                    }
                } else if attr.as_collection().is_some() {
                    for element in self.collection(&instance, &attr.name).await? {
                        if let Element::Entity(target) = element {
                            work.push(target);
                        }
                    }
                }
            }

            let key = EntityKey::of(schema, &instance);
            let Some(entry) = self.context.get_mut(&key) else {
                continue;
            };
            if entry.exists {
                debug!(entity = %instance.entity_name(), id = %key.id, "scheduling delete");
                entry.status = EntryStatus::Deleted;
            } else {
                self.context.remove(&key);
            }
        }
        Ok(())
    }

    /// Copies the state of a detached instance onto the managed instance
    /// with the same identity, loading it if needed, and returns the
    /// managed instance. A transient instance is copied and persisted.
    pub async fn merge(&mut self, detached: &EntityRef) -> Result<EntityRef> {
        self.check_open()?;
        let shared = self.shared.clone();
        let schema = &shared.engine.schema;

        if self.contains(detached) {
            return Ok(detached.clone());
        }
        if !detached.is_loaded() {
            return Err(Error::illegal_argument("cannot merge an uninitialized proxy"));
        }

        let (entity, id) = (detached.entity_id(), detached.id());
        let model = schema.entity(entity);

        let managed = match id.is_null() {
            true => None,
            false => self.load_entity(entity, id.clone(), None).await?,
        };
        let managed = match managed {
            Some(managed) => managed,
            None => {
                let copy = EntityRef::new(schema, &model.name)?;
                self.copy_state(detached, &copy).await?;
                self.persist(&copy).await?;
                return Ok(copy);
            }
        };

        if let Some(index) = model.version {
            let (theirs, ours) = (detached.data().state()[index].clone(), managed.data().state()[index].clone());
            if theirs != ours {
                return Err(Error::stale_state(&model.name, id.to_string()));
            }
        }

        self.copy_state(detached, &managed).await?;
        Ok(managed)
    }

    /// Copies every attribute but the version, resolving referenced
    /// entities to the session's instances.
    async fn copy_state(&mut self, from: &EntityRef, to: &EntityRef) -> Result<()> {
        let (model, slots) = {
            let data = from.data();
            (data.model().clone(), data.slots.clone())
        };

        for (attr, slot) in model.attributes.iter().zip(slots) {
            if Some(attr.id.index) == model.version {
                continue;
            }
            let slot = match slot {
                Slot::Value(value) => Slot::Value(value),
                Slot::ToOne {
                    target: Lazy::Initialized(target),
                    ..
                } => {
                    let target = match target {
                        Some(target) => Some(self.resolve(&target)?),
                        None => None,
                    };
                    Slot::ToOne {
                        key: target.as_ref().map(EntityRef::id).unwrap_or(Value::Null),
                        target: Lazy::Initialized(target),
                    }
                }
                Slot::Collection(Lazy::Initialized(elements)) => {
                    // Synchronized state is needed to write the difference
                    if to.data().collection(attr.id.index).is_some_and(|state| !state.is_initialized()) {
                        self.load_collection(to, attr.id.index).await?;
                    }
                    let mut resolved = Vec::with_capacity(elements.len());
                    for element in elements {
                        resolved.push(match element {
                            Element::Entity(target) => Element::Entity(self.resolve(&target)?),
                            value => value,
                        });
                    }
                    Slot::Collection(Lazy::Initialized(resolved))
                }
                _ => continue,
            };
            to.data_mut().slots[attr.id.index] = slot;
        }

        debug!(entity = %model.name, id = %to.id(), "merged state");
        Ok(())
    }

    /// The session's instance for the identity of `instance`.
    fn resolve(&mut self, instance: &EntityRef) -> Result<EntityRef> {
        let schema = self.shared.engine.schema.clone();
        if let Some(entry) = self.context.entry_of(&schema, instance) {
            return Ok(entry.instance.clone());
        }
        if instance.id().is_null() {
            return Ok(instance.clone());
        }
        let entity = schema.entity(instance.entity_id()).name.clone();
        self.get_reference(&entity, instance.id())
    }

    /// Re-reads the state of a managed instance, discarding unflushed
    /// changes.
    pub async fn refresh(&mut self, instance: &EntityRef) -> Result<()> {
        self.check_open()?;
        let shared = self.shared.clone();
        let engine = &shared.engine;

        if !self.contains(instance) {
            return Err(Error::illegal_argument(format!(
                "cannot refresh a `{}` instance the session does not manage",
                instance.entity_name()
            )));
        }
        let (entity, id) = (instance.entity_id(), instance.id());
        if let Some(region) = engine.entity_region(entity) {
            region.evict(&id);
        }

        instance.data_mut().hollow = true;
        if self.load_entity(entity, id.clone(), None).await?.is_none() {
            return Err(Error::entity_not_found(instance.entity_name(), id.to_string()));
        }
        Ok(())
    }

    /// Writes pending changes to the database.
    pub async fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.flush_changes().await?;
        self.engine().stats.flushed();
        Ok(())
    }

    /// Detaches every managed instance, discarding unflushed changes.
    pub fn clear(&mut self) {
        debug!(entities = self.context.len(), "clearing session");
        self.context.clear();
    }

    /// Detaches one instance. Changes to it are no longer tracked.
    pub fn evict(&mut self, instance: &EntityRef) {
        let schema = self.shared.engine.schema.clone();
        let key = EntityKey::of(&schema, instance);
        if self.context.get(&key).is_some_and(|entry| entry.instance.ptr_eq(instance)) {
            self.context.remove(&key);
            self.context.batch.remove_entity(key.root, &key.id);
        }
    }

    /// Whether `instance` is managed by this session and not removed.
    pub fn contains(&self, instance: &EntityRef) -> bool {
        self.context
            .entry_of(&self.engine().schema, instance)
            .is_some_and(|entry| entry.instance.ptr_eq(instance) && !entry.is_deleted())
    }

    /// Loads the state of a managed proxy.
    pub async fn initialize(&mut self, instance: &EntityRef) -> Result<()> {
        self.check_open()?;
        if instance.is_loaded() {
            return Ok(());
        }
        let schema = self.shared.engine.schema.clone();
        if self.context.entry_of(&schema, instance).is_none() {
            return Err(Error::lazy_initialization(format!(
                "{}#{} (no session)",
                instance.entity_name(),
                instance.id()
            )));
        }
        let (entity, id) = (instance.entity_id(), instance.id());
        match self.load_entity(entity, id.clone(), None).await? {
            Some(_) if instance.is_loaded() => Ok(()),
            _ => Err(Error::entity_not_found(instance.entity_name(), id.to_string())),
        }
    }

    /// Whether `attr` of `instance` is loaded; with no attribute, whether
    /// the instance itself is.
    pub fn is_initialized(&self, instance: &EntityRef, attr: Option<&str>) -> Result<bool> {
        match attr {
            None => Ok(instance.is_loaded()),
            Some(_) if !instance.is_loaded() => Ok(false),
            Some(attr) => instance.is_initialized(attr),
        }
    }

    /// Elements of the collection `attr`, loading it if needed.
    pub async fn collection(&mut self, owner: &EntityRef, attr: &str) -> Result<Vec<Element>> {
        let index = self.association(owner, attr).await?;
        if owner.data().collection(index).is_some_and(|state| !state.is_initialized()) {
            self.load_collection(owner, index).await?;
        }
        owner.collection(attr)
    }

    /// The entity referenced by `attr`, loading it if needed.
    pub async fn to_one(&mut self, owner: &EntityRef, attr: &str) -> Result<Option<EntityRef>> {
        let index = self.association(owner, attr).await?;
        let unloaded = match &owner.data().slots[index] {
            Slot::ToOne {
                target: Lazy::Initialized(Some(target)),
                ..
            } => !target.is_loaded(),
            Slot::ToOne { target, .. } => !target.is_initialized(),
            _ => false,
        };
        if unloaded {
            self.load_to_one(owner, index).await?;
        }
        owner.to_one(attr)
    }

    /// Appends to the collection `attr`, loading it first if needed.
    pub async fn add_element(&mut self, owner: &EntityRef, attr: &str, element: impl Into<Element>) -> Result<()> {
        self.collection(owner, attr).await?;
        owner.add_element(attr, element)
    }

    /// Removes the first occurrence of `element` from the collection `attr`,
    /// loading it first if needed.
    pub async fn remove_element(
        &mut self,
        owner: &EntityRef,
        attr: &str,
        element: impl Into<Element>,
    ) -> Result<bool> {
        self.collection(owner, attr).await?;
        owner.remove_element(attr, element)
    }

    /// Checks `owner` is managed and loaded; returns the index of `attr`.
    async fn association(&mut self, owner: &EntityRef, attr: &str) -> Result<usize> {
        self.check_open()?;
        if !owner.is_loaded() {
            self.initialize(owner).await?;
        }
        let schema = self.shared.engine.schema.clone();
        let index = {
            let data = owner.data();
            data.attribute(attr)?.id.index
        };
        let managed = self
            .context
            .entry_of(&schema, owner)
            .is_some_and(|entry| entry.instance.ptr_eq(owner));
        if !managed {
            let initialized = owner.is_initialized(attr)?;
            if !initialized {
                let data = owner.data();
                return Err(Error::lazy_initialization(format!(
                    "{} (no session)",
                    data.role(&data.model().attributes[index])
                )));
            }
        }
        Ok(index)
    }

    /// Parses `hql` into a select query.
    pub fn create_query(&mut self, hql: &str) -> Result<Query<'_>> {
        self.check_open()?;
        let engine = self.engine();
        let stmt = hql::interpret(&engine.schema, &engine.functions, hql)?;
        let Some(stmt) = stmt.into_select() else {
            return Err(Error::illegal_argument(format!(
                "not a select statement; use create_mutation_query: {hql}"
            )));
        };
        Ok(Query::new(self, stmt))
    }

    pub fn create_criteria_query(&mut self, query: &CriteriaQuery) -> Result<Query<'_>> {
        self.check_open()?;
        let stmt = query.build()?;
        Ok(Query::new(self, stmt))
    }

    /// Parses an `update`, `delete` or `insert` statement.
    pub fn create_mutation_query(&mut self, hql: &str) -> Result<MutationQuery<'_>> {
        self.check_open()?;
        let engine = self.engine();
        let stmt = hql::interpret(&engine.schema, &engine.functions, hql)?;
        if stmt.is_select() {
            return Err(Error::illegal_argument(format!(
                "select statement passed to create_mutation_query: {hql}"
            )));
        }
        Ok(MutationQuery::new(self, stmt))
    }

    /// Enables the filter `name` with a value for each of its parameters.
    pub fn enable_filter<'a>(
        &mut self,
        name: &str,
        params: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<()> {
        if name == TENANT_FILTER {
            return Err(Error::illegal_argument(
                "the tenant filter is enabled by opening a session for the tenant",
            ));
        }
        let Some(filter) = self.engine().schema.app.filter(name) else {
            return Err(Error::illegal_argument(format!("no filter named `{name}`")));
        };

        let mut values = IndexMap::new();
        for (param, value) in params {
            let Some(ty) = filter.param_ty(param) else {
                return Err(Error::illegal_argument(format!(
                    "filter `{name}` has no parameter `{param}`"
                )));
            };
            values.insert(param.to_string(), ty.cast(value)?);
        }
        if let Some((missing, _)) = filter.params.iter().find(|(param, _)| !values.contains_key(param)) {
            return Err(Error::illegal_argument(format!(
                "filter `{name}` parameter `{missing}` has no value"
            )));
        }

        debug!(filter = name, "enabling filter");
        self.filters.insert(name.to_string(), values);
        Ok(())
    }

    pub fn disable_filter(&mut self, name: &str) {
        if name != TENANT_FILTER {
            self.filters.shift_remove(name);
        }
    }

    pub fn is_filter_enabled(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn enable_fetch_profile(&mut self, name: &str) -> Result<()> {
        if self.engine().schema.app.fetch_profile(name).is_none() {
            return Err(Error::illegal_argument(format!("no fetch profile named `{name}`")));
        }
        if !self.profiles.iter().any(|profile| profile == name) {
            self.profiles.push(name.to_string());
        }
        Ok(())
    }

    pub fn disable_fetch_profile(&mut self, name: &str) {
        self.profiles.retain(|profile| profile != name);
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.check_open()?;
        if self.transaction {
            return Err(Error::transaction("a transaction is already active"));
        }
        self.connection().await?.exec(Transaction::Start.into()).await?;
        self.transaction = true;
        Ok(())
    }

    /// Flushes and commits. Fails while results of this session are open.
    pub async fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.transaction {
            return Err(Error::transaction("no active transaction to commit"));
        }
        if self.resources.has_registered_resources() {
            return Err(Error::resource_leak(self.resources.len()));
        }

        if let Err(err) = self.flush_changes().await {
            warn!(error = %err, "flush failed; rolling back");
            self.rollback().await?;
            return Err(err);
        }
        self.engine().stats.flushed();

        self.connection().await?.exec(Transaction::Commit.into()).await?;
        self.transaction = false;
        Ok(())
    }

    /// Rolls back and clears the session: managed state may no longer match
    /// the database.
    pub async fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.transaction {
            return Err(Error::transaction("no active transaction to roll back"));
        }
        self.transaction = false;
        self.connection().await?.exec(Transaction::Rollback.into()).await?;
        self.clear();
        Ok(())
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction
    }

    /// Whether streams or other results of this session are still open.
    pub fn has_registered_resources(&self) -> bool {
        self.resources.has_registered_resources()
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Releases the connection. Fails while results of this session are
    /// still open; an active transaction is rolled back.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.resources.has_registered_resources() {
            return Err(Error::resource_leak(self.resources.len()));
        }
        if self.transaction {
            warn!("closing session with an active transaction; rolling back");
            self.rollback().await?;
        }
        self.clear();
        self.connection = None;
        self.closed = true;
        Ok(())
    }

    /// Resolves an entity name and casts `id` to its identifier type.
    fn identify(&self, entity: &str, id: Value) -> Result<(EntityId, Value)> {
        let schema: &Schema = &self.engine().schema;
        let Some(model) = schema.entity_by_name(entity) else {
            return Err(Error::illegal_argument(format!("unknown entity `{entity}`")));
        };
        if id.is_null() {
            return Err(Error::illegal_argument(format!("null identifier for `{entity}`")));
        }
        let id = model.id_attribute().expr_ty().cast(id)?;
        Ok((model.id, id))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.resources.has_registered_resources() {
            warn!(open = self.resources.len(), "session dropped with open results");
        }
        if self.transaction {
            warn!("session dropped with an active transaction");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("entities", &self.context.len())
            .field("transaction", &self.transaction)
            .field("tenant", &self.tenant)
            .field("closed", &self.closed)
            .finish()
    }
}
