use super::{SqmExpr, SqmParameters, SqmPath, SqmQuery};
use crate::{stmt::Type, Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SqmPredicate {
    Comparison {
        lhs: SqmExpr,
        op: ComparisonOp,
        rhs: SqmExpr,
    },
    Between {
        expr: SqmExpr,
        low: SqmExpr,
        high: SqmExpr,
        negated: bool,
    },
    InList {
        expr: SqmExpr,
        list: Vec<SqmExpr>,
        negated: bool,
    },
    InSubquery {
        expr: SqmExpr,
        query: Box<SqmQuery>,
        negated: bool,
    },
    Like {
        expr: SqmExpr,
        pattern: SqmExpr,
        escape: Option<char>,
        negated: bool,
    },
    IsNull {
        expr: SqmExpr,
        negated: bool,
    },

    /// `x.collection is [not] empty`
    IsEmpty {
        path: SqmPath,
        negated: bool,
    },
    Junction {
        kind: JunctionKind,
        predicates: Vec<SqmPredicate>,
    },
    Not(Box<SqmPredicate>),
    Exists {
        query: Box<SqmQuery>,
        negated: bool,
    },

    /// A boolean-typed expression used as a predicate
    Boolean(SqmExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JunctionKind {
    And,
    Or,
}

impl SqmPredicate {
    /// Builds a comparison, typing untyped parameters from the other side
    /// and rejecting operands that cannot be compared.
    pub fn comparison(
        lhs: SqmExpr,
        op: ComparisonOp,
        rhs: SqmExpr,
        params: &mut SqmParameters,
    ) -> Result<SqmPredicate> {
        let lhs_ty = operand_ty(&lhs, params);
        let rhs_ty = operand_ty(&rhs, params);
        check_comparable(&lhs_ty, &rhs_ty)?;
        infer(&lhs, &rhs_ty, params);
        infer(&rhs, &lhs_ty, params);
        Ok(SqmPredicate::Comparison { lhs, op, rhs })
    }

    pub fn between(
        expr: SqmExpr,
        low: SqmExpr,
        high: SqmExpr,
        negated: bool,
        params: &mut SqmParameters,
    ) -> Result<SqmPredicate> {
        let ty = operand_ty(&expr, params);
        for bound in [&low, &high] {
            check_comparable(&ty, &operand_ty(bound, params))?;
            infer(bound, &ty, params);
        }
        Ok(SqmPredicate::Between {
            expr,
            low,
            high,
            negated,
        })
    }

    /// `expr in (list)`. A single parameter as the list is multi-valued.
    pub fn in_list(
        expr: SqmExpr,
        list: Vec<SqmExpr>,
        negated: bool,
        params: &mut SqmParameters,
    ) -> Result<SqmPredicate> {
        let ty = operand_ty(&expr, params);
        if let [SqmExpr::Param(param)] = &list[..] {
            params.set_multi_valued(param.id);
        }
        for item in &list {
            check_comparable(&ty, &operand_ty(item, params))?;
            infer(item, &ty, params);
        }
        Ok(SqmPredicate::InList {
            expr,
            list,
            negated,
        })
    }

    pub fn like(
        expr: SqmExpr,
        pattern: SqmExpr,
        escape: Option<char>,
        negated: bool,
        params: &mut SqmParameters,
    ) -> Result<SqmPredicate> {
        let ty = operand_ty(&expr, params);
        if !ty.is_unknown() && !ty.is_string() {
            return Err(Error::semantic(format!(
                "`like` requires a string operand, found {ty:?}"
            )));
        }
        infer(&pattern, &Type::String, params);
        Ok(SqmPredicate::Like {
            expr,
            pattern,
            escape,
            negated,
        })
    }

    pub fn and(predicates: Vec<SqmPredicate>) -> SqmPredicate {
        SqmPredicate::Junction {
            kind: JunctionKind::And,
            predicates,
        }
    }

    pub fn or(predicates: Vec<SqmPredicate>) -> SqmPredicate {
        SqmPredicate::Junction {
            kind: JunctionKind::Or,
            predicates,
        }
    }

    /// Conjoins `other` onto an optional predicate.
    pub fn conjoin(lhs: Option<SqmPredicate>, rhs: SqmPredicate) -> SqmPredicate {
        match lhs {
            None => rhs,
            Some(SqmPredicate::Junction {
                kind: JunctionKind::And,
                mut predicates,
            }) => {
                predicates.push(rhs);
                SqmPredicate::and(predicates)
            }
            Some(lhs) => SqmPredicate::and(vec![lhs, rhs]),
        }
    }
}

impl ComparisonOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

fn operand_ty(expr: &SqmExpr, params: &SqmParameters) -> Type {
    match expr {
        SqmExpr::Param(param) => params.get(param.id).ty.clone(),
        expr => expr.ty(),
    }
}

fn infer(expr: &SqmExpr, ty: &Type, params: &mut SqmParameters) {
    if let SqmExpr::Param(param) = expr {
        params.infer(param.id, ty);
    }
}

fn check_comparable(lhs: &Type, rhs: &Type) -> Result<()> {
    if lhs.is_comparable_with(rhs) {
        Ok(())
    } else {
        Err(Error::semantic(format!(
            "cannot compare {lhs:?} with {rhs:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::Value;

    #[test]
    fn comparison_infers_parameter_type() {
        let mut params = SqmParameters::new();
        let id = params.named("n").unwrap();

        SqmPredicate::comparison(
            SqmExpr::Literal(Value::I64(3)),
            ComparisonOp::Lt,
            SqmExpr::Param(super::super::SqmParamRef { id }),
            &mut params,
        )
        .unwrap();

        assert_eq!(params.get(id).ty, Type::I64);
    }

    #[test]
    fn incompatible_comparison_is_semantic() {
        let mut params = SqmParameters::new();
        let err = SqmPredicate::comparison(
            SqmExpr::Literal(Value::from("a")),
            ComparisonOp::Eq,
            SqmExpr::Literal(Value::Bool(true)),
            &mut params,
        )
        .unwrap_err();
        assert!(err.is_semantic());
    }

    #[test]
    fn conjoin_flattens_and() {
        let t = || SqmPredicate::Boolean(SqmExpr::Literal(Value::Bool(true)));
        let p = SqmPredicate::conjoin(Some(SqmPredicate::and(vec![t(), t()])), t());
        match p {
            SqmPredicate::Junction { predicates, .. } => assert_eq!(predicates.len(), 3),
            _ => panic!("expected junction"),
        }
    }
}
