use super::{collapse, EntityGroup, Group, Lower};

use quarry_core::{
    schema::{
        app::{IdStrategy, InheritanceType, TENANT_FILTER, TENANT_PARAM},
        db::ColumnId,
        mapping::ValueMapping,
    },
    sqm::{SqmFrom, SqmInsertSource, SqmParameters, SqmPredicate, SqmStatement},
    stmt::{Type, Value},
    Error, Result,
};
use quarry_sql::ast::{
    Assignment, DeleteStatement, Expr, InsertSource, InsertStatement, Predicate, QueryPart,
    QuerySpec, SelectItem, SelectStatement, Statement, TableGroup, TableReference, UpdateStatement,
};

use uuid::Uuid;

/// Statements of one mutation query, in execution order, with the
/// parameters they reference.
#[derive(Debug)]
pub(crate) struct LoweredMutation {
    pub(crate) stmts: Vec<Statement>,
    pub(crate) params: SqmParameters,
}

impl Lower<'_> {
    pub(super) fn lower_mutation(&mut self, stmt: &SqmStatement) -> Result<Vec<Statement>> {
        match stmt {
            SqmStatement::Select(_) => Err(Error::illegal_argument(
                "a select statement is not a mutation query",
            )),
            SqmStatement::Update(update) => {
                let (table, where_) = self.mutation_target(&update.target, update.where_.as_ref())?;

                let mut assignments = vec![];
                for assignment in &update.assignments {
                    let columns = self.path_columns(&assignment.path)?;
                    let values = match self.lower_expr(&assignment.value)? {
                        Expr::Tuple(values) if values.len() == columns.len() => values,
                        value if columns.len() == 1 => vec![value],
                        _ => {
                            return Err(Error::semantic(
                                "assigned value does not match the columns of the assigned path",
                            ))
                        }
                    };
                    for (column, value) in columns.iter().zip(values) {
                        assignments.push(Assignment::new(column_name(column)?, value));
                    }
                }

                Ok(vec![UpdateStatement {
                    table,
                    assignments,
                    where_,
                }
                .into()])
            }
            SqmStatement::Delete(delete) => {
                let (table, where_) = self.mutation_target(&delete.target, delete.where_.as_ref())?;
                self.lower_delete(&delete.target, table, where_)
            }
            SqmStatement::Insert(insert) => {
                let schema = self.schema;
                let group = self.mutation_group(&insert.target)?;
                let entity = schema.entity(group.entity);
                let table = schema.table(schema.mapping_for(entity.id).root_table().table);

                let mut columns = vec![];
                for path in &insert.paths {
                    for column in self.path_columns(path)? {
                        columns.push(column_name(&column)?.to_string());
                    }
                }

                let implied = self.implied_insert_values(&group, &columns)?;
                let generate_id = {
                    let id = schema.mapping_for(entity.id).id_columns();
                    entity.identifier.strategy == IdStrategy::Uuid
                        && id.len() == 1
                        && !columns.contains(&schema.column(id[0]).name)
                };
                columns.extend(implied.iter().map(|(name, _)| name.clone()));

                let source = match &insert.source {
                    SqmInsertSource::Values(rows) => {
                        let mut lowered = vec![];
                        for row in rows {
                            let mut values = vec![];
                            for value in row {
                                match self.lower_expr(value)? {
                                    Expr::Tuple(items) => values.extend(items),
                                    value => values.push(value),
                                }
                            }
                            values.extend(implied.iter().map(|(_, value)| value.clone()));
                            if generate_id {
                                values.push(Expr::value_param(Value::Uuid(Uuid::new_v4())));
                            }
                            lowered.push(values);
                        }
                        InsertSource::Values(lowered)
                    }
                    SqmInsertSource::Select(query) => {
                        if generate_id {
                            return Err(Error::not_yet_implemented(format!(
                                "insert-select into `{}` with a generated UUID identifier",
                                entity.name
                            )));
                        }
                        let mut query = self.lower_subquery(query)?;
                        let extra: Vec<_> = implied.into_iter().map(|(_, value)| value).collect();
                        append_select(&mut query.body, &extra);
                        InsertSource::Select(Box::new(query))
                    }
                };
                if generate_id {
                    let id = schema.mapping_for(entity.id).id_columns()[0];
                    columns.push(schema.column(id).name.clone());
                }

                Ok(vec![InsertStatement {
                    table: table.name.clone(),
                    columns,
                    source,
                    returning: vec![],
                }
                .into()])
            }
        }
    }

    /// Registers the target of an update or delete and returns its table
    /// and the restriction on the affected rows.
    fn mutation_target(
        &mut self,
        target: &SqmFrom,
        where_: Option<&SqmPredicate>,
    ) -> Result<(String, Option<Predicate>)> {
        let group = self.mutation_group(target)?;
        let restrictions = self.entity_restrictions(target.id, &group)?;
        let mut predicates = self.lower_restrictions(restrictions)?;
        if let Some(where_) = where_ {
            predicates.push(self.lower_predicate(where_)?);
        }

        let table = self.schema.root_table_for(group.entity).name.clone();
        Ok((table, Predicate::and_all(predicates)))
    }

    /// Mutations address one table; columns are qualified by its name.
    fn mutation_group(&mut self, target: &SqmFrom) -> Result<EntityGroup> {
        let schema = self.schema;
        let Some(entity) = target.ty.as_entity() else {
            return Err(Error::semantic("the target of a mutation query must be an entity"));
        };
        let model = schema.entity(entity);
        let root = schema.entity(model.root);
        let mapping = schema.mapping_for(entity);
        let subtree = schema.app.subtree(entity);

        let multi_table = mapping.tables.len() > 1
            || match root.inheritance {
                Some(InheritanceType::Joined) => subtree.len() > 1 || !model.is_root(),
                Some(InheritanceType::Union) => subtree.len() > 1 || model.is_abstract,
                _ => false,
            };
        if multi_table {
            return Err(Error::not_yet_implemented(format!(
                "mutation query against `{}`, which spans several tables",
                model.name
            )));
        }

        let table = mapping.root_table().table;
        let group = EntityGroup {
            entity,
            tables: vec![(table, schema.table(table).name.clone())],
            union: None,
        };
        self.groups.insert(target.id, Group::Entity(group.clone()));
        Ok(group)
    }

    /// Soft-deleted entities are marked; others also lose the rows of their
    /// join and element tables first.
    fn lower_delete(
        &mut self,
        target: &SqmFrom,
        table: String,
        where_: Option<Predicate>,
    ) -> Result<Vec<Statement>> {
        let schema = self.schema;
        let group = self.entity_group(target.id)?.clone();
        let entity = schema.entity(group.entity);
        let root = schema.entity(entity.root);
        let mapping = schema.mapping_for(entity.id);

        let marker = mapping
            .soft_delete
            .zip(entity.soft_delete.as_ref().or(root.soft_delete.as_ref()));
        if let Some((column, soft_delete)) = marker {
            return Ok(vec![UpdateStatement {
                table,
                assignments: vec![Assignment::new(
                    &schema.column(column).name,
                    Expr::literal(soft_delete.deleted_value()),
                )],
                where_,
            }
            .into()]);
        }

        let mut stmts = vec![];
        let id = group.id_columns(schema)?;
        for (index, _) in entity.attributes.iter().enumerate() {
            let ValueMapping::CollectionValue(collection) = mapping.attribute(index) else {
                continue;
            };
            if !collection.has_own_table() {
                continue;
            }
            let key = collection
                .key
                .iter()
                .map(|column| Expr::unqualified(&schema.column(*column).name))
                .collect();
            let owners = SelectStatement::spec(QuerySpec {
                select: vec![SelectItem::new(collapse(id.clone()))],
                from: vec![TableGroup::new(TableReference::table(&table, &table))],
                where_: where_.clone(),
                ..Default::default()
            });
            stmts.push(
                DeleteStatement {
                    table: schema.table(collection.table).name.clone(),
                    where_: Some(Predicate::InSubquery {
                        expr: collapse(key),
                        query: Box::new(owners),
                        negated: false,
                    }),
                }
                .into(),
            );
        }

        stmts.push(DeleteStatement { table, where_ }.into());
        Ok(stmts)
    }

    /// Columns the mapping fills in on insert when the statement does not:
    /// discriminator, soft-delete marker, tenant, and initial version.
    fn implied_insert_values(&self, group: &EntityGroup, listed: &[String]) -> Result<Vec<(String, Expr)>> {
        let schema = self.schema;
        let entity = schema.entity(group.entity);
        let root = schema.entity(entity.root);
        let mapping = schema.mapping_for(entity.id);
        let root_mapping = schema.mapping_for(root.id);
        let mut implied = vec![];
        let mut imply = |column: ColumnId, value: Expr| {
            let name = &schema.column(column).name;
            if !listed.contains(name) {
                implied.push((name.clone(), value));
            }
        };

        if let (Some(column), Some(value)) = (root_mapping.discriminator, &entity.discriminator_value) {
            imply(column, Expr::literal(value.clone()));
        }

        let soft_delete = entity.soft_delete.as_ref().or(root.soft_delete.as_ref());
        if let (Some(column), Some(soft_delete)) = (mapping.soft_delete, soft_delete) {
            imply(column, Expr::literal(soft_delete.not_deleted_value()));
        }

        if let Some(tenant) = entity.tenant_attribute() {
            let value = self
                .filters
                .get(TENANT_FILTER)
                .and_then(|params| params.get(TENANT_PARAM));
            if let (ValueMapping::BasicColumn(column), Some(value)) =
                (mapping.attribute(tenant.id.index), value)
            {
                imply(*column, Expr::value_param(value.clone()));
            }
        }

        if let Some(version) = entity.version_attribute() {
            if let ValueMapping::BasicColumn(column) = mapping.attribute(version.id.index) {
                let initial = match schema.column(*column).ty {
                    Type::I32 => Value::I32(0),
                    _ => Value::I64(0),
                };
                imply(*column, Expr::literal(initial));
            }
        }

        Ok(implied)
    }
}

fn column_name(expr: &Expr) -> Result<&str> {
    match expr {
        Expr::Column(column) => Ok(&column.column),
        _ => Err(Error::semantic("only mapped columns can be assigned")),
    }
}

/// Appends `exprs` to the select list of every operand of `part`.
fn append_select(part: &mut QueryPart, exprs: &[Expr]) {
    match part {
        QueryPart::Spec(spec) => spec
            .select
            .extend(exprs.iter().cloned().map(SelectItem::new)),
        QueryPart::Group(group) => {
            for part in &mut group.parts {
                append_select(part, exprs);
            }
        }
    }
}
