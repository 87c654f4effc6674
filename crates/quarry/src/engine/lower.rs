mod cte;
mod dml;
mod expr;
mod from;
mod select;

pub(crate) use dml::LoweredMutation;
pub(crate) use select::LoweredSelect;

use crate::engine::Engine;

use quarry_core::{
    driver::Capability,
    hql::FilterBinder,
    schema::{
        app::{EntityId, InheritanceType, TENANT_FILTER},
        db::{ColumnId, TableId},
        mapping::Formula,
    },
    sqm::{
        CteId, FromId, FromSource, FromTy, FunctionRegistry, PathSegment, SqmCopy,
        SqmCopyContext, SqmFrom, SqmParameters, SqmPredicate, SqmSelectStatement,
        SqmStatement,
    },
    stmt::{Type, Value},
    Error, Result, Schema,
};
use quarry_sql::ast::{Expr, Predicate, TableGroup, TableGroupJoin};

use indexmap::IndexMap;
use std::collections::HashMap;

/// Filters enabled on a session, with their parameter values.
pub(crate) type EnabledFilters = IndexMap<String, IndexMap<String, Value>>;

/// Which enabled filters restrict the lowered statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterScope {
    All,

    /// Identifier lookups see every row of the tenant, whatever user
    /// filters are enabled.
    TenantOnly,
}

/// Name of the synthetic column telling the arms of a union-inheritance
/// derived table apart.
pub(crate) const CLAZZ: &str = "clazz_";

impl Engine {
    pub(crate) fn lower_select(
        &self,
        stmt: &SqmSelectStatement,
        filters: &EnabledFilters,
        scope: FilterScope,
    ) -> Result<LoweredSelect> {
        let mut cx = SqmCopyContext::new(0, 0);
        let SqmSelectStatement { query, params } = stmt.copy(&mut cx);
        let (next_from, _) = cx.next_ids();

        let mut lower = Lower::new(self, filters, scope, params, next_from);
        let (stmt, plan) = lower.lower_top(&query)?;

        Ok(LoweredSelect {
            stmt,
            params: lower.params,
            plan,
        })
    }

    pub(crate) fn lower_mutation(
        &self,
        stmt: &SqmStatement,
        filters: &EnabledFilters,
    ) -> Result<LoweredMutation> {
        let mut cx = SqmCopyContext::new(0, 0);
        let stmt = stmt.copy(&mut cx);
        let (next_from, _) = cx.next_ids();

        let params = stmt.params().clone();
        let mut lower = Lower::new(self, filters, FilterScope::TenantOnly, params, next_from);
        let stmts = lower.lower_mutation(&stmt)?;

        Ok(LoweredMutation {
            stmts,
            params: lower.params,
        })
    }
}

/// State of one translation. From ids are unique across the statement, so
/// groups and implicit joins are tracked in flat maps; the frame stack only
/// says where an implicit join is attached.
pub(crate) struct Lower<'a> {
    schema: &'a Schema,
    functions: &'a FunctionRegistry,
    capability: &'static Capability,
    filters: &'a EnabledFilters,
    scope: FilterScope,

    params: SqmParameters,
    next_from: usize,

    /// Per-initial alias counters: `p1_0`, `p2_0`, `c1_0`, …
    aliases: HashMap<char, usize>,

    groups: HashMap<FromId, Group>,
    ctes: HashMap<CteId, CteInfo>,
    implicit: HashMap<(FromId, PathSegment), FromId>,
    frames: Vec<Frame>,
}

/// The tables a from element was lowered to.
#[derive(Debug, Clone)]
pub(crate) enum Group {
    Entity(EntityGroup),
    Element(ElementGroup),
    Cte { alias: String, cte: CteId },
}

#[derive(Debug, Clone)]
pub(crate) struct EntityGroup {
    pub(crate) entity: EntityId,

    /// Every table of the group with its alias, including the link table of
    /// a many-to-many join. An empty alias leaves columns unqualified.
    pub(crate) tables: Vec<(TableId, String)>,

    /// Set when a polymorphic union-inheritance entity is read through a
    /// derived `UNION ALL` table
    pub(crate) union: Option<UnionGroup>,
}

#[derive(Debug, Clone)]
pub(crate) struct UnionGroup {
    pub(crate) alias: String,

    /// Concrete entity of each arm, indexed by the `clazz_` value
    pub(crate) entities: Vec<EntityId>,
}

/// Rows of a collection table holding basic values.
#[derive(Debug, Clone)]
pub(crate) struct ElementGroup {
    pub(crate) alias: String,
    pub(crate) column: ColumnId,
    pub(crate) ty: Type,
}

#[derive(Debug)]
struct CteInfo {
    name: String,

    /// Declared columns followed by the synthetic search and cycle columns
    columns: Vec<(String, Type)>,
}

/// From clause of the query level being lowered.
#[derive(Debug, Default)]
struct Frame {
    roots: Vec<TableGroup>,

    /// Index into `roots` of the group each from element belongs to
    root_of: HashMap<FromId, usize>,
}

#[derive(Debug, Clone, Copy)]
struct JoinSlot {
    frame: usize,
    root: usize,
    position: usize,
}

/// A restriction a from element implies. Filter conditions are lowered once
/// the element is attached, so that paths in them can add joins.
enum Restriction {
    Sql(Predicate),
    Filter(SqmPredicate),
}

impl<'a> Lower<'a> {
    fn new(
        engine: &'a Engine,
        filters: &'a EnabledFilters,
        scope: FilterScope,
        params: SqmParameters,
        next_from: usize,
    ) -> Lower<'a> {
        Lower {
            schema: &engine.schema,
            functions: &engine.functions,
            capability: engine.capability(),
            filters,
            scope,
            params,
            next_from,
            aliases: HashMap::new(),
            groups: HashMap::new(),
            ctes: HashMap::new(),
            implicit: HashMap::new(),
            frames: vec![],
        }
    }

    fn fresh_from(&mut self) -> FromId {
        let id = FromId(self.next_from);
        self.next_from += 1;
        id
    }

    /// Next alias stem for `name`, e.g. `p3`.
    fn alias_stem(&mut self, name: &str) -> String {
        let initial = name
            .chars()
            .find(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase())
            .unwrap_or('t');
        let counter = self.aliases.entry(initial).or_default();
        *counter += 1;
        format!("{initial}{counter}")
    }

    fn group(&self, from: FromId) -> Result<&Group> {
        self.groups
            .get(&from)
            .ok_or_else(|| Error::sql_ast_syntax(format!("{from:?} has not been lowered")))
    }

    fn entity_group(&self, from: FromId) -> Result<&EntityGroup> {
        match self.group(from)? {
            Group::Entity(group) => Ok(group),
            _ => Err(Error::semantic(format!(
                "{from:?} is not entity-valued and has no attributes"
            ))),
        }
    }

    /// Adds a join to the group of the query level `lhs` belongs to, and
    /// returns where it landed.
    fn attach(&mut self, lhs: FromId, id: FromId, join: TableGroupJoin) -> Result<JoinSlot> {
        let Some((frame, root)) = self
            .frames
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, frame)| frame.root_of.get(&lhs).map(|root| (i, *root)))
        else {
            return Err(Error::not_yet_implemented(
                "implicit join in an update or delete statement",
            ));
        };

        let slot = JoinSlot {
            frame,
            root,
            position: self.frames[frame].roots[root].group_joins.len(),
        };
        let frame = &mut self.frames[frame];
        frame.roots[root].group_joins.push(join);
        frame.root_of.insert(id, root);
        Ok(slot)
    }

    fn join_mut(&mut self, slot: JoinSlot) -> &mut TableGroupJoin {
        &mut self.frames[slot.frame].roots[slot.root].group_joins[slot.position]
    }

    /// Restrictions the mapping of `group` implies: the soft-delete marker,
    /// the single-table discriminator, and the enabled filters.
    fn entity_restrictions(&mut self, from: FromId, group: &EntityGroup) -> Result<Vec<Restriction>> {
        let schema = self.schema;
        let entity = schema.entity(group.entity);
        let root = schema.entity(entity.root);
        let mut restrictions = vec![];

        let marker = schema
            .mapping_for(entity.id)
            .soft_delete
            .zip(entity.soft_delete.as_ref().or(root.soft_delete.as_ref()));
        if let Some((column, soft_delete)) = marker {
            restrictions.push(Restriction::Sql(Predicate::eq(
                group.column(schema, column)?,
                Expr::literal(soft_delete.not_deleted_value()),
            )));
        }

        if root.inheritance == Some(InheritanceType::SingleTable) && !entity.is_root() {
            let Some(column) = schema.mapping_for(root.id).discriminator else {
                return Err(Error::mapping(format!(
                    "single-table hierarchy `{}` has no discriminator column",
                    root.name
                )));
            };
            let values = schema
                .app
                .subtree(entity.id)
                .into_iter()
                .filter_map(|id| schema.entity(id).discriminator_value.clone())
                .map(Expr::literal)
                .collect();
            restrictions.push(Restriction::Sql(Predicate::in_list(
                group.column(schema, column)?,
                values,
            )));
        }

        let sqm_from = SqmFrom {
            id: from,
            alias: None,
            source: FromSource::Entity(entity.id),
            ty: FromTy::Entity(entity.id),
        };
        let filters = self.filters;
        for filter in &entity.filters {
            if self.scope == FilterScope::TenantOnly && filter.name != TENANT_FILTER {
                continue;
            }
            let Some(values) = filters.get(&filter.name) else {
                continue;
            };
            let mut binder =
                FilterBinder::new(schema, self.functions, &mut self.params, self.next_from);
            let predicate = binder.bind(&sqm_from, filter, values)?;
            self.next_from = binder.next_from();
            restrictions.push(Restriction::Filter(predicate));
        }

        Ok(restrictions)
    }

    fn lower_restrictions(&mut self, restrictions: Vec<Restriction>) -> Result<Vec<Predicate>> {
        restrictions
            .into_iter()
            .map(|restriction| match restriction {
                Restriction::Sql(predicate) => Ok(predicate),
                Restriction::Filter(predicate) => self.lower_predicate(&predicate),
            })
            .collect()
    }
}

impl Group {
    /// Columns identifying a row of the group: the identifier of an entity,
    /// the value of an element, every column of a CTE.
    fn identity_columns(&self, schema: &Schema, ctes: &HashMap<CteId, CteInfo>) -> Result<Vec<Expr>> {
        match self {
            Group::Entity(group) => group.id_columns(schema),
            Group::Element(group) => Ok(vec![qualify(&group.alias, &schema.column(group.column).name)]),
            Group::Cte { alias, cte } => {
                let info = ctes
                    .get(cte)
                    .ok_or_else(|| Error::sql_ast_syntax(format!("{cte:?} has not been lowered")))?;
                Ok(info
                    .columns
                    .iter()
                    .map(|(name, _)| qualify(alias, name))
                    .collect())
            }
        }
    }
}

impl EntityGroup {
    pub(crate) fn column(&self, schema: &Schema, id: ColumnId) -> Result<Expr> {
        let column = schema.column(id);

        if let Some(union) = &self.union {
            return Ok(qualify(&union.alias, &column.name));
        }

        let Some((_, alias)) = self.tables.iter().find(|(table, _)| *table == id.table) else {
            return Err(Error::sql_ast_syntax(format!(
                "column `{}.{}` is not part of the table group of `{}`",
                schema.table(id.table).name,
                column.name,
                schema.entity(self.entity).name
            )));
        };
        Ok(qualify(alias, &column.name))
    }

    pub(crate) fn id_columns(&self, schema: &Schema) -> Result<Vec<Expr>> {
        schema
            .mapping_for(self.entity)
            .id_columns()
            .iter()
            .map(|column| self.column(schema, *column))
            .collect()
    }

    pub(crate) fn formula(&self, formula: &Formula) -> Expr {
        let alias = match &self.union {
            Some(union) => Some(union.alias.as_str()),
            None => self
                .tables
                .iter()
                .find(|(table, _)| *table == formula.table)
                .map(|(_, alias)| alias.as_str()),
        };
        match alias {
            Some(alias) if !alias.is_empty() => {
                Expr::Fragment(formula.sql.replace("{alias}", alias))
            }
            _ => Expr::Fragment(formula.sql.replace("{alias}.", "")),
        }
    }
}

pub(crate) fn qualify(alias: &str, column: &str) -> Expr {
    if alias.is_empty() {
        Expr::unqualified(column)
    } else {
        Expr::column(alias, column)
    }
}

/// Single expression for one column, a tuple for several.
fn collapse(mut columns: Vec<Expr>) -> Expr {
    if columns.len() == 1 {
        columns.remove(0)
    } else {
        Expr::Tuple(columns)
    }
}
