use super::{
    qualify, CteInfo, ElementGroup, EntityGroup, Frame, Group, Lower, Restriction, UnionGroup,
    CLAZZ,
};

use quarry_core::{
    schema::{
        app::{AttributeId, EntityId, InheritanceType},
        mapping::{ElementMapping, EntityTable, EntityTableKind, ToOneMapping, ValueMapping},
    },
    sqm::{CteId, FromId, FromSource, FromTy, JoinKind, PathSegment, SqmFrom, SqmFromClause},
    stmt::{Type, Value},
    Error, Result, Schema,
};
use quarry_sql::ast::{
    Expr, Predicate, QueryGroup, QueryPart, QuerySpec, SelectItem, SelectStatement, SetOperator,
    TableGroup, TableGroupJoin, TableJoin, TableReference,
};

/// A lowered join: the joined group, the condition linking it to its left
/// hand side, and the restrictions its mapping implies.
pub(super) struct LoweredJoin {
    pub(super) group: TableGroup,
    pub(super) on: Option<Predicate>,
    pub(super) restrictions: Vec<Restriction>,
}

impl Lower<'_> {
    /// Lowers a from clause into a new frame, which the caller pops.
    /// Returns the restrictions of the roots, which belong in `WHERE`.
    pub(super) fn lower_from(&mut self, from: &SqmFromClause) -> Result<Vec<Predicate>> {
        self.frames.push(Frame::default());

        let mut where_ = vec![];
        let mut pending = vec![];

        for root in &from.roots {
            let (group, restrictions) = self.root_group(&root.from)?;

            let frame = self.frame_mut();
            let index = frame.roots.len();
            frame.roots.push(group);
            frame.root_of.insert(root.from.id, index);

            where_.extend(self.lower_restrictions(restrictions)?);

            for join in &root.joins {
                let lowered = self.join_group(&join.from)?;
                let frame = self.frame_mut();
                let position = frame.roots[index].group_joins.len();
                frame.roots[index].group_joins.push(TableGroupJoin {
                    kind: join.kind,
                    group: lowered.group,
                    on: None,
                });
                frame.root_of.insert(join.from.id, index);
                pending.push((index, position, join, lowered.on, lowered.restrictions));
            }
        }

        // Conditions are lowered once every explicit join is in place, so a
        // condition may reference any from element of the clause.
        for (index, position, join, on, restrictions) in pending {
            let mut predicates: Vec<Predicate> = on.into_iter().collect();
            let restrictions = self.lower_restrictions(restrictions)?;
            if join.kind == JoinKind::Cross {
                where_.extend(restrictions);
            } else {
                predicates.extend(restrictions);
            }
            if let Some(on) = &join.on {
                predicates.push(self.lower_predicate(on)?);
            }

            let on = Predicate::and_all(predicates);
            if on.is_none() && join.kind != JoinKind::Cross {
                return Err(Error::semantic(format!(
                    "join of {:?} has no join condition",
                    join.from.alias.as_deref().unwrap_or("entity")
                )));
            }
            self.frame_mut().roots[index].group_joins[position].on = on;
        }

        Ok(where_)
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let depth = self.frames.len();
        &mut self.frames[depth - 1]
    }

    fn root_group(&mut self, from: &SqmFrom) -> Result<(TableGroup, Vec<Restriction>)> {
        match &from.source {
            FromSource::Entity(entity) => {
                let name = self.schema.entity(*entity).name.clone();
                self.entity_table_group(from.id, *entity, &name)
            }
            FromSource::Cte(cte) => Ok((self.cte_group(from.id, *cte)?, vec![])),
            _ => Err(Error::semantic(
                "an attribute join cannot be the root of a from clause",
            )),
        }
    }

    fn join_group(&mut self, from: &SqmFrom) -> Result<LoweredJoin> {
        match &from.source {
            FromSource::Entity(entity) => {
                let name = self.schema.entity(*entity).name.clone();
                let (group, restrictions) = self.entity_table_group(from.id, *entity, &name)?;
                Ok(LoweredJoin {
                    group,
                    on: None,
                    restrictions,
                })
            }
            FromSource::Cte(cte) => Ok(LoweredJoin {
                group: self.cte_group(from.id, *cte)?,
                on: None,
                restrictions: vec![],
            }),
            FromSource::Attribute { lhs, attribute } => self.attribute_join(from.id, *lhs, *attribute),
            FromSource::CteColumn { lhs, cte, column } => {
                let FromTy::Entity(entity) = from.ty else {
                    return Err(Error::semantic("only entity-valued CTE columns can be joined"));
                };
                self.cte_column_join(from.id, *lhs, *cte, *column, entity)
            }
        }
    }

    /// Joins `segment` of the from element `lhs` on behalf of a path that
    /// navigates through it. Repeated navigation reuses the join.
    pub(super) fn implicit_join(&mut self, lhs: FromId, segment: PathSegment) -> Result<FromId> {
        if let Some(id) = self.implicit.get(&(lhs, segment)) {
            return Ok(*id);
        }

        let id = self.fresh_from();
        let lowered = match segment {
            PathSegment::Attribute(attribute) => self.attribute_join(id, lhs, attribute)?,
            PathSegment::CteColumn(cte, column) => {
                let ty = self
                    .ctes
                    .get(&cte)
                    .and_then(|info| info.columns.get(column))
                    .map(|(_, ty)| ty.clone());
                let Some(Type::Entity(entity)) = ty else {
                    return Err(Error::semantic(
                        "cannot dereference a CTE column that is not entity-valued",
                    ));
                };
                self.cte_column_join(id, lhs, cte, column, entity)?
            }
            PathSegment::Field(..) => {
                return Err(Error::sql_ast_syntax("embeddable fields cannot be joined"))
            }
        };

        // Attach first so restrictions may navigate further.
        let slot = self.attach(
            lhs,
            id,
            TableGroupJoin {
                kind: JoinKind::Inner,
                group: lowered.group,
                on: None,
            },
        )?;
        let mut predicates: Vec<Predicate> = lowered.on.into_iter().collect();
        predicates.extend(self.lower_restrictions(lowered.restrictions)?);
        self.join_mut(slot).on = Predicate::and_all(predicates);

        self.implicit.insert((lhs, segment), id);
        Ok(id)
    }

    /// The from element a path of to-one navigations ends on.
    pub(super) fn path_from(&mut self, from: FromId, segments: &[PathSegment]) -> Result<FromId> {
        let mut current = from;
        for segment in segments {
            current = self.implicit_join(current, *segment)?;
        }
        Ok(current)
    }

    pub(super) fn attribute_join(
        &mut self,
        id: FromId,
        lhs: FromId,
        attribute: AttributeId,
    ) -> Result<LoweredJoin> {
        let schema = self.schema;
        let attr = schema.attribute(attribute);
        let owner = self.entity_group(lhs)?.clone();

        match schema.mapping_for(attribute.entity).attribute(attribute.index) {
            ValueMapping::ToOneValue(ToOneMapping::ForeignKey(columns)) => {
                let Some(to_one) = attr.as_to_one() else {
                    return Err(Error::mapping(format!(
                        "`{}` has a foreign key but is not a to-one attribute",
                        schema.role(attribute)
                    )));
                };
                let (group, restrictions) = self.entity_table_group(id, to_one.target, &attr.name)?;
                let target = self.entity_group(id)?;

                let lhs = columns
                    .iter()
                    .map(|column| owner.column(schema, *column))
                    .collect::<Result<Vec<_>>>()?;
                Ok(LoweredJoin {
                    group,
                    on: Predicate::columns_eq(lhs, target.id_columns(schema)?),
                    restrictions,
                })
            }
            ValueMapping::ToOneValue(ToOneMapping::Inverse { owning }) => {
                let target_entity = owning.entity;
                let (group, restrictions) = self.entity_table_group(id, target_entity, &attr.name)?;
                let target = self.entity_group(id)?;

                let ValueMapping::ToOneValue(ToOneMapping::ForeignKey(columns)) =
                    schema.mapping_for(owning.entity).attribute(owning.index)
                else {
                    return Err(Error::mapping(format!(
                        "owning side `{}` of `{}` holds no foreign key",
                        schema.role(*owning),
                        schema.role(attribute)
                    )));
                };
                let fk = columns
                    .iter()
                    .map(|column| target.column(schema, *column))
                    .collect::<Result<Vec<_>>>()?;
                Ok(LoweredJoin {
                    group,
                    on: Predicate::columns_eq(fk, owner.id_columns(schema)?),
                    restrictions,
                })
            }
            ValueMapping::CollectionValue(mapping) => {
                let marker = attr
                    .as_collection()
                    .and_then(|collection| collection.soft_delete.as_ref());

                match &mapping.element {
                    ElementMapping::Entity { target, fk } if fk.is_empty() => {
                        let (group, restrictions) = self.entity_table_group(id, *target, &attr.name)?;
                        let target = self.entity_group(id)?;
                        let key = mapping
                            .key
                            .iter()
                            .map(|column| target.column(schema, *column))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(LoweredJoin {
                            group,
                            on: Predicate::columns_eq(key, owner.id_columns(schema)?),
                            restrictions,
                        })
                    }
                    ElementMapping::Entity { target, fk } => {
                        let link_alias = format!("{}_0", self.alias_stem(&attr.name));
                        let (target_group, mut restrictions) =
                            self.entity_table_group(id, *target, &attr.name)?;

                        let Some(Group::Entity(entity_group)) = self.groups.get_mut(&id) else {
                            return Err(Error::sql_ast_syntax("many-to-many target was not registered"));
                        };
                        entity_group.tables.push((mapping.table, link_alias.clone()));
                        let target = entity_group.clone();

                        let link_fk = fk
                            .iter()
                            .map(|column| qualify(&link_alias, &schema.column(*column).name))
                            .collect();
                        let link_on = Predicate::columns_eq(link_fk, target.id_columns(schema)?)
                            .ok_or_else(|| {
                                Error::mapping(format!(
                                    "link table of `{}` has no foreign key to its target",
                                    schema.role(attribute)
                                ))
                            })?;

                        let mut table_joins = vec![TableJoin {
                            kind: JoinKind::Inner,
                            table: target_group.primary,
                            on: link_on,
                        }];
                        table_joins.extend(target_group.table_joins);

                        let key = mapping
                            .key
                            .iter()
                            .map(|column| qualify(&link_alias, &schema.column(*column).name))
                            .collect();
                        if let (Some(column), Some(marker)) = (mapping.soft_delete, marker) {
                            restrictions.push(Restriction::Sql(Predicate::eq(
                                qualify(&link_alias, &schema.column(column).name),
                                Expr::literal(marker.not_deleted_value()),
                            )));
                        }

                        let link_name = &schema.table(mapping.table).name;
                        Ok(LoweredJoin {
                            group: TableGroup {
                                primary: TableReference::table(link_name, link_alias),
                                table_joins,
                                group_joins: vec![],
                            },
                            on: Predicate::columns_eq(key, owner.id_columns(schema)?),
                            restrictions,
                        })
                    }
                    ElementMapping::Value { column, ty } => {
                        let alias = format!("{}_0", self.alias_stem(&attr.name));
                        self.groups.insert(
                            id,
                            Group::Element(ElementGroup {
                                alias: alias.clone(),
                                column: *column,
                                ty: ty.clone(),
                            }),
                        );

                        let key = mapping
                            .key
                            .iter()
                            .map(|column| qualify(&alias, &schema.column(*column).name))
                            .collect();
                        let mut restrictions = vec![];
                        if let (Some(column), Some(marker)) = (mapping.soft_delete, marker) {
                            restrictions.push(Restriction::Sql(Predicate::eq(
                                qualify(&alias, &schema.column(column).name),
                                Expr::literal(marker.not_deleted_value()),
                            )));
                        }

                        let table = &schema.table(mapping.table).name;
                        Ok(LoweredJoin {
                            group: TableGroup::new(TableReference::table(table, alias)),
                            on: Predicate::columns_eq(key, owner.id_columns(schema)?),
                            restrictions,
                        })
                    }
                }
            }
            _ => Err(Error::semantic(format!(
                "`{}` is not an association and cannot be joined",
                schema.role(attribute)
            ))),
        }
    }

    fn cte_column_join(
        &mut self,
        id: FromId,
        lhs: FromId,
        cte: CteId,
        column: usize,
        entity: EntityId,
    ) -> Result<LoweredJoin> {
        let Group::Cte { alias, .. } = self.group(lhs)?.clone() else {
            return Err(Error::sql_ast_syntax(format!("{lhs:?} is not a CTE")));
        };
        let name = self
            .ctes
            .get(&cte)
            .and_then(|info| info.columns.get(column))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| Error::sql_ast_syntax(format!("{cte:?} has no column {column}")))?;

        let entity_name = self.schema.entity(entity).name.clone();
        let (group, restrictions) = self.entity_table_group(id, entity, &entity_name)?;
        let target = self.entity_group(id)?;

        Ok(LoweredJoin {
            group,
            on: Predicate::columns_eq(vec![qualify(&alias, &name)], target.id_columns(self.schema)?),
            restrictions,
        })
    }

    fn cte_group(&mut self, from: FromId, cte: CteId) -> Result<TableGroup> {
        let Some(CteInfo { name, .. }) = self.ctes.get(&cte) else {
            return Err(Error::sql_ast_syntax(format!("{cte:?} is not declared")));
        };
        let name = name.clone();
        let alias = format!("{}_0", self.alias_stem(&name));
        self.groups.insert(
            from,
            Group::Cte {
                alias: alias.clone(),
                cte,
            },
        );
        Ok(TableGroup::new(TableReference::table(name, alias)))
    }

    /// Lowers an entity to the tables holding its state and registers the
    /// group under `from`. `name` seeds the alias.
    pub(super) fn entity_table_group(
        &mut self,
        from: FromId,
        entity: EntityId,
        name: &str,
    ) -> Result<(TableGroup, Vec<Restriction>)> {
        let schema = self.schema;
        let model = schema.entity(entity);
        let root = schema.entity(model.root);
        let stem = self.alias_stem(name);
        let alias = |i: usize| format!("{stem}_{i}");
        let subtree = schema.app.subtree(entity);

        let (group, entity_group) = match root.inheritance {
            Some(InheritanceType::Union) if subtree.len() > 1 || model.is_abstract => {
                union_group(schema, entity, &subtree, alias(0))?
            }
            inheritance => {
                let mapping = schema.mapping_for(entity);
                let mut tables = vec![];
                let mut group = TableGroup::new(TableReference::table(
                    &schema.table(mapping.root_table().table).name,
                    alias(0),
                ));
                tables.push((mapping.root_table().table, alias(0)));

                for (i, table) in mapping.tables.iter().enumerate().skip(1) {
                    let kind = match table.kind {
                        EntityTableKind::Secondary => JoinKind::Left,
                        _ => JoinKind::Inner,
                    };
                    group.table_joins.push(TableJoin {
                        kind,
                        table: TableReference::table(&schema.table(table.table).name, alias(i)),
                        on: key_join(schema, mapping.root_table(), &alias(0), table, &alias(i))?,
                    });
                    tables.push((table.table, alias(i)));
                }

                // Joined inheritance: subclass tables are outer joined so
                // rows of every subtype are read.
                if inheritance == Some(InheritanceType::Joined) {
                    for descendant in &subtree[1..] {
                        let descendant_mapping = schema.mapping_for(*descendant);
                        let Some(table) = descendant_mapping
                            .tables
                            .iter()
                            .find(|table| table.kind == EntityTableKind::Subclass(*descendant))
                        else {
                            continue;
                        };
                        let i = tables.len();
                        group.table_joins.push(TableJoin {
                            kind: JoinKind::Left,
                            table: TableReference::table(&schema.table(table.table).name, alias(i)),
                            on: key_join(schema, mapping.root_table(), &alias(0), table, &alias(i))?,
                        });
                        tables.push((table.table, alias(i)));
                    }
                }

                (
                    group,
                    EntityGroup {
                        entity,
                        tables,
                        union: None,
                    },
                )
            }
        };

        self.groups.insert(from, Group::Entity(entity_group.clone()));
        let restrictions = self.entity_restrictions(from, &entity_group)?;
        Ok((group, restrictions))
    }
}

fn key_join(
    schema: &Schema,
    lhs: &EntityTable,
    lhs_alias: &str,
    rhs: &EntityTable,
    rhs_alias: &str,
) -> Result<Predicate> {
    let columns = |table: &EntityTable, alias: &str| {
        table
            .key
            .iter()
            .map(|column| qualify(alias, &schema.column(*column).name))
            .collect::<Vec<_>>()
    };
    Predicate::columns_eq(columns(lhs, lhs_alias), columns(rhs, rhs_alias)).ok_or_else(|| {
        Error::mapping(format!(
            "table `{}` has no key columns",
            schema.table(rhs.table).name
        ))
    })
}

/// A derived table reading every concrete table of a union-inheritance
/// subtree. Columns missing from an arm are selected as `NULL`; `clazz_`
/// tells the arms apart.
fn union_group(
    schema: &Schema,
    entity: EntityId,
    subtree: &[EntityId],
    alias: String,
) -> Result<(TableGroup, EntityGroup)> {
    let concrete: Vec<_> = subtree
        .iter()
        .copied()
        .filter(|id| !schema.entity(*id).is_abstract)
        .collect();
    if concrete.is_empty() {
        return Err(Error::mapping(format!(
            "`{}` has no concrete subclass to query",
            schema.entity(entity).name
        )));
    }

    let mut names: Vec<&str> = vec![];
    for id in &concrete {
        for column in &schema.root_table_for(*id).columns {
            if !names.contains(&column.name.as_str()) {
                names.push(&column.name);
            }
        }
    }

    let mut parts: Vec<_> = concrete
        .iter()
        .enumerate()
        .map(|(clazz, id)| {
            let table = schema.root_table_for(*id);
            let mut select: Vec<_> = names
                .iter()
                .map(|name| match table.column_by_name(name) {
                    Some(_) => SelectItem::aliased(Expr::unqualified(*name), *name),
                    None => SelectItem::aliased(Expr::literal(Value::Null), *name),
                })
                .collect();
            select.push(SelectItem::aliased(Expr::literal(Value::I64(clazz as i64)), CLAZZ));

            QueryPart::Spec(Box::new(QuerySpec {
                select,
                from: vec![TableGroup::new(TableReference::table(&table.name, &table.name))],
                ..Default::default()
            }))
        })
        .collect();

    let body = if parts.len() == 1 {
        parts.remove(0)
    } else {
        QueryPart::Group(Box::new(QueryGroup {
            op: SetOperator::UnionAll,
            parts,
            order_by: vec![],
            offset: None,
            fetch: None,
        }))
    };

    let group = TableGroup::new(TableReference::Derived {
        query: Box::new(SelectStatement::new(body)),
        alias: alias.clone(),
    });
    let entity_group = EntityGroup {
        entity,
        tables: vec![],
        union: Some(UnionGroup {
            alias,
            entities: concrete,
        }),
    };
    Ok((group, entity_group))
}
