//! Statements the session issues on its own behalf: loading entities by
//! identifier and initializing collections. They are built as SQM and go
//! through the same translation as user queries, so filters, soft delete
//! and inheritance apply uniformly.

use crate::session::context::SubselectFetch;

use quarry_core::{
    schema::app::{AttributeId, EntityId},
    sqm::{
        ComparisonOp, FromId, FromSource, FromTy, JoinKind, PathSegment, SqmCopy, SqmCopyContext,
        SqmExpr, SqmFrom, SqmFromClause, SqmJoin, SqmParamRef, SqmParameters, SqmPath,
        SqmPredicate, SqmQuery, SqmQueryPart, SqmQuerySpec, SqmRoot, SqmSelectStatement,
        SqmSelection,
    },
    stmt::{Type, Value},
    Result, Schema,
};

/// `select e from Entity e [left join fetch e.a …] where e.id in (…)`
pub(crate) fn by_ids(
    schema: &Schema,
    entity: EntityId,
    ids: &[Value],
    fetch: &[usize],
) -> Result<SqmSelectStatement> {
    let root = FromId(0);
    let mut params = SqmParameters::new();
    let mut joins = vec![];
    for (i, index) in fetch.iter().enumerate() {
        joins.push(fetch_join(schema, root, FromId(i + 1), entity, *index)?);
    }

    let restriction = id_restriction(schema, root, entity, ids, &mut params);
    Ok(select(root, entity, joins, Some(restriction), params))
}

/// `select o from Owner o left join fetch o.role where o.id in (…)`
pub(crate) fn collection_by_keys(
    schema: &Schema,
    role: AttributeId,
    keys: &[Value],
) -> Result<SqmSelectStatement> {
    let root = FromId(0);
    let mut params = SqmParameters::new();
    let join = fetch_join(schema, root, FromId(1), role.entity, role.index)?;
    let restriction = id_restriction(schema, root, role.entity, keys, &mut params);
    Ok(select(root, role.entity, vec![join], Some(restriction), params))
}

/// Loads the collection for every owner the query in `fetch` returned,
/// restricting owners by that query instead of by an identifier list.
///
/// Returns `None` when the query cannot serve as a subquery, e.g. a set
/// operation or a grouped query.
pub(crate) fn collection_by_subselect(
    schema: &Schema,
    role: AttributeId,
    fetch: &SubselectFetch,
) -> Result<Option<SqmSelectStatement>> {
    let mut cx = SqmCopyContext::new(0, 0);
    let SqmSelectStatement { mut query, params } = fetch.stmt.copy(&mut cx);
    let owner = cx.from(fetch.owner);
    let (next, _) = cx.next_ids();

    if !query.ctes.is_empty() {
        return Ok(None);
    }
    let SqmQueryPart::Spec(spec) = &mut query.body else {
        return Ok(None);
    };
    if !spec.group_by.is_empty() || spec.having.is_some() {
        return Ok(None);
    }
    let Some(owner_ty) = spec.from.find(owner).and_then(|from| from.ty.as_entity()) else {
        return Ok(None);
    };

    spec.select = vec![SqmSelection {
        expr: entity_path(owner, owner_ty),
        alias: None,
    }];
    if spec.offset.is_none() && spec.fetch.is_none() {
        spec.order_by.clear();
    }
    for root in &mut spec.from.roots {
        for join in &mut root.joins {
            join.fetch = false;
        }
    }

    let root = FromId(next);
    let join = fetch_join(schema, root, FromId(next + 1), role.entity, role.index)?;
    let restriction = SqmPredicate::InSubquery {
        expr: id_path(schema, root, role.entity),
        query: Box::new(query),
        negated: false,
    };
    Ok(Some(select(root, role.entity, vec![join], Some(restriction), params)))
}

/// `select t from Target t where t.owning = :owner`, the inverse side of a
/// one-to-one.
pub(crate) fn by_reference(
    schema: &Schema,
    target: EntityId,
    owning: AttributeId,
    owner: &Value,
) -> SqmSelectStatement {
    let root = FromId(0);
    let mut params = SqmParameters::new();
    let attr = schema.attribute(owning);
    let param = params.value(owner.clone(), attr.expr_ty());
    let restriction = SqmPredicate::Comparison {
        lhs: SqmExpr::Path(SqmPath {
            from: root,
            segments: vec![PathSegment::Attribute(owning)],
            ty: attr.expr_ty(),
        }),
        op: ComparisonOp::Eq,
        rhs: SqmExpr::Param(SqmParamRef { id: param }),
    };
    select(root, target, vec![], Some(restriction), params)
}

fn select(
    root: FromId,
    entity: EntityId,
    joins: Vec<SqmJoin>,
    where_: Option<SqmPredicate>,
    params: SqmParameters,
) -> SqmSelectStatement {
    let spec = SqmQuerySpec {
        from: SqmFromClause {
            roots: vec![SqmRoot {
                from: SqmFrom {
                    id: root,
                    alias: None,
                    source: FromSource::Entity(entity),
                    ty: FromTy::Entity(entity),
                },
                joins,
            }],
        },
        select: vec![SqmSelection {
            expr: entity_path(root, entity),
            alias: None,
        }],
        where_,
        ..Default::default()
    };

    SqmSelectStatement {
        query: SqmQuery::spec(spec),
        params,
    }
}

fn fetch_join(
    schema: &Schema,
    owner: FromId,
    id: FromId,
    entity: EntityId,
    index: usize,
) -> Result<SqmJoin> {
    let attr = &schema.entity(entity).attributes[index];
    let path = SqmPath {
        from: owner,
        segments: vec![PathSegment::Attribute(attr.id)],
        ty: attr.expr_ty(),
    };
    let (source, ty) = FromSource::join_target(schema, &path)?;

    Ok(SqmJoin {
        from: SqmFrom {
            id,
            alias: None,
            source,
            ty,
        },
        kind: JoinKind::Left,
        fetch: true,
        on: None,
    })
}

fn entity_path(from: FromId, entity: EntityId) -> SqmExpr {
    SqmExpr::Path(SqmPath {
        from,
        segments: vec![],
        ty: Type::Entity(entity),
    })
}

fn id_path(schema: &Schema, from: FromId, entity: EntityId) -> SqmExpr {
    let id = schema.entity(entity).id_attribute();
    SqmExpr::Path(SqmPath {
        from,
        segments: vec![PathSegment::Attribute(id.id)],
        ty: id.expr_ty(),
    })
}

fn id_restriction(
    schema: &Schema,
    from: FromId,
    entity: EntityId,
    ids: &[Value],
    params: &mut SqmParameters,
) -> SqmPredicate {
    let ty = schema.entity(entity).id_attribute().expr_ty();
    let mut list: Vec<SqmExpr> = ids
        .iter()
        .map(|id| {
            let param = params.value(id.clone(), ty.clone());
            SqmExpr::Param(SqmParamRef { id: param })
        })
        .collect();

    let lhs = id_path(schema, from, entity);
    if list.len() == 1 {
        if let Some(rhs) = list.pop() {
            return SqmPredicate::Comparison {
                lhs,
                op: ComparisonOp::Eq,
                rhs,
            };
        }
    }
    SqmPredicate::InList {
        expr: lhs,
        list,
        negated: false,
    }
}
