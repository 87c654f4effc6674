use super::{qualify, EntityGroup, Group, Lower, CLAZZ};
use crate::engine::plan::{
    AttributeReader, ConcreteReader, EntityReader, FetchReader, FetchTarget, ResultReader,
    SelectionPlan,
};

use quarry_core::{
    schema::{
        app::{AttributeId, EntityId, InheritanceType, Ordering},
        db::ColumnId,
        mapping::{EntityTableKind, ToOneMapping, ValueMapping},
    },
    sqm::{
        FromId, FromSource, SqmExpr, SqmParameters, SqmQuery, SqmQueryGroup, SqmQueryPart,
        SqmQuerySpec, SqmSortSpec,
    },
    stmt::{Type, Value},
    Error, Result,
};
use quarry_sql::ast::{
    Expr, Predicate, QueryGroup, QueryPart, QuerySpec, SelectItem, SelectStatement, SortSpec,
};

/// A top-level select ready to render, with the plan reading its rows.
#[derive(Debug)]
pub(crate) struct LoweredSelect {
    pub(crate) stmt: SelectStatement,
    pub(crate) params: SqmParameters,
    pub(crate) plan: SelectionPlan,
}

/// Collects the select list of the top-level query spec. Every column is
/// selected once, however many readers use it.
#[derive(Debug, Default)]
pub(super) struct PlanBuilder {
    plan: SelectionPlan,
    select: Vec<SelectItem>,
}

impl PlanBuilder {
    fn position(&mut self, expr: Expr, ty: Type) -> usize {
        if let Some(position) = self.select.iter().position(|item| item.expr == expr) {
            return position;
        }
        self.select.push(SelectItem::new(expr));
        self.plan.columns.push(ty);
        self.select.len() - 1
    }
}

impl Lower<'_> {
    pub(super) fn lower_top(&mut self, query: &SqmQuery) -> Result<(SelectStatement, SelectionPlan)> {
        let with = self.lower_ctes(&query.ctes)?;

        let (body, plan) = match &query.body {
            SqmQueryPart::Spec(spec) => {
                let mut builder = PlanBuilder::default();
                let spec = self.lower_spec(spec, Some(&mut builder))?;
                (QueryPart::Spec(Box::new(spec)), builder.plan)
            }
            SqmQueryPart::Group(group) => {
                let plan = self.group_plan(query.first_spec())?;
                (QueryPart::Group(Box::new(self.lower_group(group)?)), plan)
            }
        };

        Ok((
            SelectStatement {
                with,
                body,
                lock: None,
            },
            plan,
        ))
    }

    pub(super) fn lower_subquery(&mut self, query: &SqmQuery) -> Result<SelectStatement> {
        let with = self.lower_ctes(&query.ctes)?;
        let body = self.lower_part(&query.body)?;
        Ok(SelectStatement {
            with,
            body,
            lock: None,
        })
    }

    pub(super) fn lower_part(&mut self, part: &SqmQueryPart) -> Result<QueryPart> {
        Ok(match part {
            SqmQueryPart::Spec(spec) => QueryPart::Spec(Box::new(self.lower_spec(spec, None)?)),
            SqmQueryPart::Group(group) => QueryPart::Group(Box::new(self.lower_group(group)?)),
        })
    }

    fn lower_group(&mut self, group: &SqmQueryGroup) -> Result<QueryGroup> {
        let parts = group
            .parts
            .iter()
            .map(|part| self.lower_part(part))
            .collect::<Result<_>>()?;

        // Sort keys name a selection of the first operand; they render as
        // positions since no operand's aliases are in scope.
        let selections = &group.parts[0].first_spec().select;
        let order_by = group
            .order_by
            .iter()
            .map(|sort| {
                let Some(position) = selections.iter().position(|s| s.expr == sort.expr) else {
                    return Err(Error::semantic(
                        "`order by` of a set operation must name a selection",
                    ));
                };
                Ok(SortSpec {
                    expr: Expr::literal(Value::I64(position as i64 + 1)),
                    desc: sort.desc,
                    nulls: sort.nulls,
                })
            })
            .collect::<Result<_>>()?;

        Ok(QueryGroup {
            op: group.op,
            parts,
            order_by,
            offset: self.lower_opt(group.offset.as_ref())?,
            fetch: self.lower_opt(group.fetch.as_ref())?,
        })
    }

    /// Set operations only read scalar columns.
    fn group_plan(&self, spec: &SqmQuerySpec) -> Result<SelectionPlan> {
        let mut plan = SelectionPlan::default();
        for (position, selection) in spec.select.iter().enumerate() {
            let entity_path = matches!(
                (&selection.expr, selection.expr.ty()),
                (SqmExpr::Path(_), Type::Entity(_))
            );
            if entity_path || matches!(selection.expr.ty(), Type::Embeddable(_)) {
                return Err(Error::not_yet_implemented(
                    "entity or embeddable selection in a set operation",
                ));
            }
            let ty = self.selection_ty(&selection.expr);
            plan.results.push(ResultReader::Scalar { position });
            plan.columns.push(ty);
        }
        Ok(plan)
    }

    pub(super) fn lower_spec(&mut self, spec: &SqmQuerySpec, plan: Option<&mut PlanBuilder>) -> Result<QuerySpec> {
        let restrictions = self.lower_from(&spec.from)?;
        let lowered = self.lower_spec_clauses(spec, restrictions, plan);
        let frame = self.frames.pop();

        let mut out = lowered?;
        out.from = frame.map(|frame| frame.roots).unwrap_or_default();
        Ok(out)
    }

    fn lower_spec_clauses(
        &mut self,
        spec: &SqmQuerySpec,
        restrictions: Vec<Predicate>,
        plan: Option<&mut PlanBuilder>,
    ) -> Result<QuerySpec> {
        let mut predicates = restrictions;
        if let Some(where_) = &spec.where_ {
            predicates.push(self.lower_predicate(where_)?);
        }

        let mut fetch_order = vec![];
        let select = match plan {
            Some(builder) => {
                self.plan_selections(spec, builder)?;
                fetch_order = self.plan_fetches(spec, builder)?;
                std::mem::take(&mut builder.select)
            }
            None => {
                let mut select = vec![];
                for selection in &spec.select {
                    match self.lower_expr(&selection.expr)? {
                        Expr::Tuple(items) => select.extend(items.into_iter().map(SelectItem::new)),
                        expr => select.push(SelectItem::new(expr)),
                    }
                }
                select
            }
        };

        let mut group_by = vec![];
        for expr in &spec.group_by {
            match self.lower_expr(expr)? {
                Expr::Tuple(items) => group_by.extend(items),
                expr => group_by.push(expr),
            }
        }

        let having = match &spec.having {
            Some(having) => Some(self.lower_predicate(having)?),
            None => None,
        };

        let mut order_by = self.lower_sorts(&spec.order_by)?;
        order_by.extend(fetch_order);

        Ok(QuerySpec {
            distinct: spec.distinct,
            select,
            from: vec![],
            where_: Predicate::and_all(predicates),
            group_by,
            having,
            order_by,
            offset: self.lower_opt(spec.offset.as_ref())?,
            fetch: self.lower_opt(spec.fetch.as_ref())?,
        })
    }

    fn lower_sorts(&mut self, sorts: &[SqmSortSpec]) -> Result<Vec<SortSpec>> {
        let mut order_by = vec![];
        for sort in sorts {
            let exprs = match self.lower_expr(&sort.expr)? {
                Expr::Tuple(items) => items,
                expr => vec![expr],
            };
            order_by.extend(exprs.into_iter().map(|expr| SortSpec {
                expr,
                desc: sort.desc,
                nulls: sort.nulls,
            }));
        }
        Ok(order_by)
    }

    fn lower_opt(&mut self, expr: Option<&SqmExpr>) -> Result<Option<Expr>> {
        expr.map(|expr| self.lower_expr(expr)).transpose()
    }

    /// The type a selected expression is decoded as.
    fn selection_ty(&self, expr: &SqmExpr) -> Type {
        let ty = match expr {
            SqmExpr::Param(param) => self.params.get(param.id).ty.clone(),
            expr => expr.ty(),
        };
        match self.jdbc_ty(&ty) {
            Type::Null => Type::Unknown,
            ty => ty,
        }
    }

    fn plan_selections(&mut self, spec: &SqmQuerySpec, builder: &mut PlanBuilder) -> Result<()> {
        let schema = self.schema;

        for selection in &spec.select {
            let reader = match &selection.expr {
                SqmExpr::Path(path) if matches!(path.ty, Type::Entity(_)) => {
                    let from = self.path_from(path.from, &path.segments)?;
                    if matches!(self.group(from)?, Group::Entity(_)) {
                        ResultReader::Entity(self.entity_reader(builder, from)?)
                    } else {
                        self.scalar_reader(&selection.expr, builder)?
                    }
                }
                SqmExpr::Path(path) => match &path.ty {
                    Type::Embeddable(embeddable) => {
                        let tys: Vec<_> = schema
                            .app
                            .embeddable(*embeddable)
                            .fields
                            .iter()
                            .map(|field| field.ty.clone())
                            .collect();
                        let positions = self
                            .path_columns(path)?
                            .into_iter()
                            .zip(tys)
                            .map(|(column, ty)| builder.position(column, ty))
                            .collect();
                        ResultReader::Record { positions }
                    }
                    _ => self.scalar_reader(&selection.expr, builder)?,
                },
                expr => self.scalar_reader(expr, builder)?,
            };
            builder.plan.results.push(reader);
        }

        Ok(())
    }

    fn scalar_reader(&mut self, expr: &SqmExpr, builder: &mut PlanBuilder) -> Result<ResultReader> {
        let ty = self.selection_ty(expr);
        Ok(match self.lower_expr(expr)? {
            Expr::Tuple(items) => {
                let tys = match &ty {
                    Type::Record(tys) if tys.len() == items.len() => tys.clone(),
                    _ => vec![Type::Unknown; items.len()],
                };
                let positions = items
                    .into_iter()
                    .zip(tys)
                    .map(|(item, ty)| builder.position(item, ty))
                    .collect();
                ResultReader::Record { positions }
            }
            lowered => ResultReader::Scalar {
                position: builder.position(lowered, ty),
            },
        })
    }

    /// Adds readers for every fetch join, in join order, and returns the
    /// sort keys keeping fetched ordered collections in order.
    fn plan_fetches(&mut self, spec: &SqmQuerySpec, builder: &mut PlanBuilder) -> Result<Vec<SortSpec>> {
        let mut order = vec![];

        let joins = spec.from.roots.iter().flat_map(|root| &root.joins);
        for join in joins.filter(|join| join.fetch) {
            let FromSource::Attribute { lhs, attribute } = join.from.source else {
                return Err(Error::semantic("only association joins can be fetched"));
            };
            let Some(owner) = builder.plan.reader_for(lhs) else {
                return Err(Error::semantic(format!(
                    "query specified join fetching, but the owner of the fetched association `{}` was not present in the select list",
                    self.schema.role(attribute)
                )));
            };

            let target = match self.group(join.from.id)?.clone() {
                Group::Entity(_) => FetchTarget::Entity(self.entity_reader(builder, join.from.id)?),
                Group::Element(element) => {
                    let column = qualify(&element.alias, &self.schema.column(element.column).name);
                    FetchTarget::Value {
                        position: builder.position(column, element.ty),
                    }
                }
                Group::Cte { .. } => {
                    return Err(Error::semantic("a CTE cannot be fetched"));
                }
            };

            builder.plan.fetches.push(FetchReader {
                owner,
                attribute: attribute.index,
                target,
            });
            order.extend(self.collection_order(attribute, join.from.id)?);
        }

        Ok(order)
    }

    /// Sort keys of an ordered collection joined as `target`.
    pub(super) fn collection_order(&self, attribute: AttributeId, target: FromId) -> Result<Vec<SortSpec>> {
        let schema = self.schema;
        let Some(ordering) = schema
            .attribute(attribute)
            .as_collection()
            .and_then(|collection| collection.ordering.as_ref())
        else {
            return Ok(vec![]);
        };
        let Some(mapping) = schema
            .mapping_for(attribute.entity)
            .attribute(attribute.index)
            .as_collection()
        else {
            return Ok(vec![]);
        };

        let group = self.group(target)?;
        let column_of = |column: ColumnId| match group {
            Group::Entity(group) => group.column(schema, column),
            Group::Element(group) => Ok(qualify(&group.alias, &schema.column(column).name)),
            Group::Cte { .. } => Err(Error::sql_ast_syntax("collection joined as a CTE")),
        };

        Ok(match ordering {
            Ordering::OrderColumn => match mapping.index {
                Some(index) => vec![SortSpec::asc(column_of(index)?)],
                None => {
                    return Err(Error::mapping(format!(
                        "ordered collection `{}` has no index column",
                        schema.role(attribute)
                    )))
                }
            },
            Ordering::OrderBy { attribute: name, desc } => {
                let exprs = match (name, group) {
                    (None, Group::Element(element)) => vec![column_of(element.column)?],
                    (None, Group::Entity(entity)) => entity.id_columns(schema)?,
                    (Some(name), Group::Entity(entity)) => {
                        let Some(attr) = schema.entity(entity.entity).attribute(name) else {
                            return Err(Error::mapping(format!(
                                "`{}` orders by unknown attribute `{name}`",
                                schema.role(attribute)
                            )));
                        };
                        schema
                            .mapping_for(entity.entity)
                            .attribute(attr.id.index)
                            .columns()
                            .into_iter()
                            .map(|column| entity.column(schema, column))
                            .collect::<Result<_>>()?
                    }
                    _ => {
                        return Err(Error::mapping(format!(
                            "`{}` cannot be ordered by an attribute of a basic value",
                            schema.role(attribute)
                        )))
                    }
                };
                exprs
                    .into_iter()
                    .map(|expr| SortSpec {
                        expr,
                        desc: *desc,
                        nulls: None,
                    })
                    .collect()
            }
        })
    }

    /// Selects what is needed to read entities of `from` and returns the
    /// index of its reader. Each from element is read once.
    fn entity_reader(&mut self, builder: &mut PlanBuilder, from: FromId) -> Result<usize> {
        if let Some(index) = builder.plan.reader_for(from) {
            return Ok(index);
        }

        let schema = self.schema;
        let group = self.entity_group(from)?.clone();
        let entity = schema.entity(group.entity);
        let root = schema.entity(entity.root);
        let subtree = schema.app.subtree(entity.id);

        let mut key = vec![];
        for column in schema.mapping_for(entity.id).id_columns() {
            let ty = schema.column(*column).ty.clone();
            key.push(builder.position(group.column(schema, *column)?, ty));
        }

        let concrete = if let Some(union) = &group.union {
            ConcreteReader::Clazz {
                position: builder.position(qualify(&union.alias, CLAZZ), Type::I64),
                entities: union.entities.clone(),
            }
        } else if subtree.len() == 1 {
            ConcreteReader::Fixed(entity.id)
        } else {
            match root.inheritance {
                Some(InheritanceType::SingleTable) => {
                    let Some(column) = schema.mapping_for(root.id).discriminator else {
                        return Err(Error::mapping(format!(
                            "single-table hierarchy `{}` has no discriminator column",
                            root.name
                        )));
                    };
                    let ty = schema.column(column).ty.clone();
                    ConcreteReader::Discriminator {
                        position: builder.position(group.column(schema, column)?, ty),
                        values: subtree
                            .iter()
                            .filter_map(|id| {
                                let value = schema.entity(*id).discriminator_value.clone()?;
                                Some((value, *id))
                            })
                            .collect(),
                    }
                }
                Some(InheritanceType::Joined) => {
                    let mut keys = vec![];
                    for descendant in subtree[1..].iter().rev() {
                        let table = schema
                            .mapping_for(*descendant)
                            .tables
                            .iter()
                            .find(|table| table.kind == EntityTableKind::Subclass(*descendant));
                        let Some(column) = table.and_then(|table| table.key.first()) else {
                            continue;
                        };
                        let ty = schema.column(*column).ty.clone();
                        keys.push((*descendant, builder.position(group.column(schema, *column)?, ty)));
                    }
                    ConcreteReader::SubclassKeys {
                        keys,
                        fallback: entity.id,
                    }
                }
                _ => ConcreteReader::Fixed(entity.id),
            }
        };

        let candidates: Vec<EntityId> = match &concrete {
            ConcreteReader::Fixed(id) => vec![*id],
            ConcreteReader::Clazz { entities, .. } => entities.clone(),
            _ => subtree.clone(),
        };

        let mut attributes = vec![];
        for id in candidates {
            let readers = (0..schema.entity(id).attributes.len())
                .map(|index| self.attribute_reader(builder, &group, id, index))
                .collect::<Result<_>>()?;
            attributes.push((id, readers));
        }

        builder.plan.entities.push(EntityReader {
            entity: entity.id,
            from,
            key,
            concrete,
            attributes,
        });
        Ok(builder.plan.entities.len() - 1)
    }

    fn attribute_reader(
        &self,
        builder: &mut PlanBuilder,
        group: &EntityGroup,
        entity: EntityId,
        index: usize,
    ) -> Result<AttributeReader> {
        let schema = self.schema;
        let attr = &schema.entity(entity).attributes[index];

        Ok(match schema.mapping_for(entity).attribute(index) {
            ValueMapping::BasicColumn(column) => AttributeReader::Value {
                position: builder.position(group.column(schema, *column)?, attr.expr_ty()),
            },
            ValueMapping::FormulaColumn(formula) => AttributeReader::Value {
                position: builder.position(group.formula(formula), formula.ty.clone()),
            },
            ValueMapping::EmbeddedColumns(columns) => {
                let mut positions = vec![];
                for column in columns {
                    let ty = schema.column(*column).ty.clone();
                    positions.push(builder.position(group.column(schema, *column)?, ty));
                }
                AttributeReader::Embedded { positions }
            }
            ValueMapping::ToOneValue(ToOneMapping::ForeignKey(columns)) => {
                let Some(column) = columns.first() else {
                    return Err(Error::mapping(format!(
                        "`{}` has an empty foreign key",
                        attr.name
                    )));
                };
                let ty = schema.column(*column).ty.clone();
                AttributeReader::ToOne {
                    position: builder.position(group.column(schema, *column)?, ty),
                }
            }
            ValueMapping::ToOneValue(ToOneMapping::Inverse { .. }) | ValueMapping::CollectionValue(_) => {
                AttributeReader::Deferred
            }
        })
    }
}
