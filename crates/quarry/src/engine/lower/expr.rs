use super::{collapse, qualify, Frame, Group, Lower};

use quarry_core::{
    schema::mapping::{ToOneMapping, ValueMapping},
    sqm::{
        function::FunctionKind, ComparisonOp, JunctionKind, ParamId, ParamKind, PathSegment,
        SqmExpr, SqmFunction, SqmPath, SqmPredicate,
    },
    stmt::{Type, Value},
    Error, Result,
};
use quarry_sql::ast::{
    Expr, FunctionCall, JdbcParameter, Predicate, QuerySpec, SelectItem, SelectStatement,
};

impl Lower<'_> {
    pub(super) fn lower_expr(&mut self, expr: &SqmExpr) -> Result<Expr> {
        Ok(match expr {
            SqmExpr::Literal(value) => Expr::Literal(value.clone()),
            SqmExpr::Path(path) => collapse(self.path_columns(path)?),
            SqmExpr::Param(param) => self.lower_param(param.id),
            SqmExpr::Function(function) => self.lower_function(function)?,
            SqmExpr::CountStar => Expr::CountStar,
            SqmExpr::Arithmetic(arithmetic) => Expr::arithmetic(
                self.lower_expr(&arithmetic.lhs)?,
                arithmetic.op,
                self.lower_expr(&arithmetic.rhs)?,
            ),
            SqmExpr::Negate(expr) => Expr::Negate(Box::new(self.lower_expr(expr)?)),
            SqmExpr::Case(case) => {
                let whens = case
                    .whens
                    .iter()
                    .map(|(when, then)| Ok((self.lower_predicate(when)?, self.lower_expr(then)?)))
                    .collect::<Result<_>>()?;
                let otherwise = match &case.otherwise {
                    Some(otherwise) => Some(Box::new(self.lower_expr(otherwise)?)),
                    None => None,
                };
                Expr::Case { whens, otherwise }
            }
            SqmExpr::Tuple(items) => Expr::Tuple(
                items
                    .iter()
                    .map(|item| self.lower_expr(item))
                    .collect::<Result<_>>()?,
            ),
            SqmExpr::Subquery { query, .. } => Expr::Subquery(Box::new(self.lower_subquery(query)?)),
        })
    }

    pub(super) fn lower_param(&self, id: ParamId) -> Expr {
        let param = self.params.get(id);
        match &param.kind {
            ParamKind::Value(value) => Expr::value_param(value.clone()),
            _ => Expr::Param(JdbcParameter::query(id, self.jdbc_ty(&param.ty))),
        }
    }

    /// Type a parameter is bound as: entity-valued parameters carry the
    /// identifier.
    pub(super) fn jdbc_ty(&self, ty: &Type) -> Type {
        match ty {
            Type::Entity(entity) => self.schema.entity(*entity).id_attribute().expr_ty(),
            ty => ty.clone(),
        }
    }

    fn lower_function(&mut self, function: &SqmFunction) -> Result<Expr> {
        let functions = self.functions;
        let Some(descriptor) = functions.get(&function.name) else {
            return Err(Error::semantic(format!(
                "function not found: {}",
                function.name
            )));
        };

        if descriptor.kind == FunctionKind::Size {
            let [SqmExpr::Path(path)] = &function.args[..] else {
                return Err(Error::semantic("`size` requires a collection-valued path argument"));
            };
            let query = self.collection_subquery(path, Expr::CountStar)?;
            return Ok(Expr::Subquery(Box::new(query)));
        }

        let render = descriptor.render.clone();
        let args = function
            .args
            .iter()
            .map(|arg| self.lower_expr(arg))
            .collect::<Result<_>>()?;
        Ok(Expr::Function(FunctionCall {
            render,
            args,
            distinct: function.distinct,
        }))
    }

    pub(super) fn lower_predicate(&mut self, predicate: &SqmPredicate) -> Result<Predicate> {
        Ok(match predicate {
            SqmPredicate::Comparison { lhs, op, rhs } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                compare(lhs, *op, rhs)
            }
            SqmPredicate::Between {
                expr,
                low,
                high,
                negated,
            } => Predicate::Between {
                expr: self.lower_expr(expr)?,
                low: self.lower_expr(low)?,
                high: self.lower_expr(high)?,
                negated: *negated,
            },
            SqmPredicate::InList {
                expr,
                list,
                negated,
            } => {
                let expr = self.lower_expr(expr)?;
                let list = match &list[..] {
                    // A filter parameter bound to a list expands inline.
                    [SqmExpr::Param(param)] => match &self.params.get(param.id).kind {
                        ParamKind::Value(Value::List(items)) => {
                            items.iter().cloned().map(Expr::value_param).collect()
                        }
                        _ => vec![self.lower_param(param.id)],
                    },
                    list => list
                        .iter()
                        .map(|item| self.lower_expr(item))
                        .collect::<Result<_>>()?,
                };
                Predicate::InList {
                    expr,
                    list,
                    negated: *negated,
                }
            }
            SqmPredicate::InSubquery {
                expr,
                query,
                negated,
            } => Predicate::InSubquery {
                expr: self.lower_expr(expr)?,
                query: Box::new(self.lower_subquery(query)?),
                negated: *negated,
            },
            SqmPredicate::Like {
                expr,
                pattern,
                escape,
                negated,
            } => Predicate::Like {
                expr: self.lower_expr(expr)?,
                pattern: self.lower_expr(pattern)?,
                escape: *escape,
                negated: *negated,
            },
            SqmPredicate::IsNull { expr, negated } => match self.lower_expr(expr)? {
                Expr::Tuple(columns) => {
                    let predicates = columns
                        .into_iter()
                        .map(|column| Predicate::IsNull {
                            expr: column,
                            negated: *negated,
                        })
                        .collect();
                    Predicate::Junction {
                        kind: if *negated { JunctionKind::Or } else { JunctionKind::And },
                        predicates,
                    }
                }
                expr => Predicate::IsNull {
                    expr,
                    negated: *negated,
                },
            },
            SqmPredicate::IsEmpty { path, negated } => {
                let query = self.collection_subquery(path, Expr::literal(Value::I32(1)))?;
                Predicate::Exists {
                    query: Box::new(query),
                    negated: !*negated,
                }
            }
            SqmPredicate::Junction { kind, predicates } => {
                if predicates.is_empty() {
                    let value = Value::Bool(*kind == JunctionKind::And);
                    return Ok(Predicate::Boolean(Expr::literal(value)));
                }
                Predicate::Junction {
                    kind: *kind,
                    predicates: predicates
                        .iter()
                        .map(|predicate| self.lower_predicate(predicate))
                        .collect::<Result<_>>()?,
                }
            }
            SqmPredicate::Not(predicate) => Predicate::Not(Box::new(self.lower_predicate(predicate)?)),
            SqmPredicate::Exists { query, negated } => Predicate::Exists {
                query: Box::new(self.lower_subquery(query)?),
                negated: *negated,
            },
            SqmPredicate::Boolean(expr) => Predicate::Boolean(self.lower_expr(expr)?),
        })
    }

    /// Columns a path resolves to. Navigating a to-one reference beyond its
    /// foreign key joins the target; reading only the target's identifier
    /// does not.
    pub(super) fn path_columns(&mut self, path: &SqmPath) -> Result<Vec<Expr>> {
        let schema = self.schema;
        let mut from = path.from;
        let mut segments = &path.segments[..];

        loop {
            let group = self.group(from)?.clone();
            let Some((segment, rest)) = segments.split_first() else {
                return group.identity_columns(schema, &self.ctes);
            };

            match (segment, &group) {
                (PathSegment::CteColumn(cte, index), Group::Cte { alias, .. }) => {
                    if !rest.is_empty() {
                        from = self.implicit_join(from, *segment)?;
                        segments = rest;
                        continue;
                    }
                    let Some((name, _)) = self.ctes.get(cte).and_then(|info| info.columns.get(*index))
                    else {
                        return Err(Error::sql_ast_syntax(format!("{cte:?} has no column {index}")));
                    };
                    return Ok(vec![qualify(alias, name)]);
                }
                (PathSegment::Attribute(attribute), Group::Entity(entity_group)) => {
                    let attr = schema.attribute(*attribute);
                    match schema.mapping_for(attribute.entity).attribute(attribute.index) {
                        ValueMapping::BasicColumn(column) => {
                            return Ok(vec![entity_group.column(schema, *column)?]);
                        }
                        ValueMapping::FormulaColumn(formula) => {
                            return Ok(vec![entity_group.formula(formula)]);
                        }
                        ValueMapping::EmbeddedColumns(columns) => {
                            let columns = match rest {
                                [] => &columns[..],
                                [PathSegment::Field(_, field)] => &columns[*field..*field + 1],
                                _ => {
                                    return Err(Error::sql_ast_syntax(format!(
                                        "invalid navigation below embedded `{}`",
                                        schema.role(*attribute)
                                    )))
                                }
                            };
                            return columns
                                .iter()
                                .map(|column| entity_group.column(schema, *column))
                                .collect();
                        }
                        ValueMapping::ToOneValue(ToOneMapping::ForeignKey(columns)) => {
                            let target_id = attr
                                .as_to_one()
                                .map(|to_one| schema.entity(to_one.target).identifier.attribute);
                            let key_only = match rest {
                                [] => true,
                                [PathSegment::Attribute(next)] => Some(next.index) == target_id,
                                _ => false,
                            };
                            if key_only {
                                return columns
                                    .iter()
                                    .map(|column| entity_group.column(schema, *column))
                                    .collect();
                            }
                            from = self.implicit_join(from, *segment)?;
                            segments = rest;
                        }
                        ValueMapping::ToOneValue(ToOneMapping::Inverse { .. }) => {
                            from = self.implicit_join(from, *segment)?;
                            segments = rest;
                        }
                        ValueMapping::CollectionValue(_) => {
                            return Err(Error::semantic(format!(
                                "plural attribute `{}` cannot be used as a value; join it instead",
                                schema.role(*attribute)
                            )));
                        }
                    }
                }
                _ => {
                    return Err(Error::sql_ast_syntax(format!(
                        "path segment {segment:?} does not apply to {from:?}"
                    )))
                }
            }
        }
    }

    /// A subquery over the rows of the collection `path` ends on, correlated
    /// to its owner.
    fn collection_subquery(&mut self, path: &SqmPath, select: Expr) -> Result<SelectStatement> {
        let Some((PathSegment::Attribute(attribute), owner)) = path.segments.split_last() else {
            return Err(Error::semantic("expected a collection-valued path"));
        };
        let owner = self.path_from(path.from, owner)?;

        let id = self.fresh_from();
        let lowered = self.attribute_join(id, owner, *attribute)?;

        let mut frame = Frame::default();
        frame.roots.push(lowered.group);
        frame.root_of.insert(id, 0);
        self.frames.push(frame);

        let restrictions = self.lower_restrictions(lowered.restrictions);
        let frame = self.frames.pop();
        let mut predicates: Vec<Predicate> = lowered.on.into_iter().collect();
        predicates.extend(restrictions?);

        Ok(SelectStatement::spec(QuerySpec {
            select: vec![SelectItem::new(select)],
            from: frame.map(|frame| frame.roots).unwrap_or_default(),
            where_: Predicate::and_all(predicates),
            ..Default::default()
        }))
    }
}

/// Comparisons of multi-column values compare column by column.
fn compare(lhs: Expr, op: ComparisonOp, rhs: Expr) -> Predicate {
    match (lhs, rhs) {
        (Expr::Tuple(lhs), Expr::Tuple(rhs))
            if lhs.len() == rhs.len() && matches!(op, ComparisonOp::Eq | ComparisonOp::Ne) =>
        {
            let predicates = lhs
                .into_iter()
                .zip(rhs)
                .map(|(lhs, rhs)| Predicate::Comparison { lhs, op, rhs })
                .collect();
            Predicate::Junction {
                kind: if op == ComparisonOp::Eq { JunctionKind::And } else { JunctionKind::Or },
                predicates,
            }
        }
        (lhs, rhs) => Predicate::Comparison { lhs, op, rhs },
    }
}
