use super::{ComparisonOp, Expr, JunctionKind, SelectStatement};

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Comparison {
        lhs: Expr,
        op: ComparisonOp,
        rhs: Expr,
    },
    Between {
        expr: Expr,
        low: Expr,
        high: Expr,
        negated: bool,
    },

    /// An empty list is always false (always true when negated)
    InList {
        expr: Expr,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Expr,
        query: Box<SelectStatement>,
        negated: bool,
    },
    Like {
        expr: Expr,
        pattern: Expr,
        escape: Option<char>,
        negated: bool,
    },
    IsNull {
        expr: Expr,
        negated: bool,
    },

    /// Must hold at least one predicate
    Junction {
        kind: JunctionKind,
        predicates: Vec<Predicate>,
    },
    Not(Box<Predicate>),
    Exists {
        query: Box<SelectStatement>,
        negated: bool,
    },
    Boolean(Expr),
}

impl Predicate {
    pub fn eq(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Predicate {
        Predicate::Comparison {
            lhs: lhs.into(),
            op: ComparisonOp::Eq,
            rhs: rhs.into(),
        }
    }

    pub fn is_null(expr: impl Into<Expr>) -> Predicate {
        Predicate::IsNull {
            expr: expr.into(),
            negated: false,
        }
    }

    pub fn in_list(expr: impl Into<Expr>, list: Vec<Expr>) -> Predicate {
        Predicate::InList {
            expr: expr.into(),
            list,
            negated: false,
        }
    }

    /// Conjunction of `predicates`, `None` when there are none.
    pub fn and_all(predicates: Vec<Predicate>) -> Option<Predicate> {
        let mut flat = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match predicate {
                Predicate::Junction {
                    kind: JunctionKind::And,
                    predicates,
                } => flat.extend(predicates),
                predicate => flat.push(predicate),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Predicate::Junction {
                kind: JunctionKind::And,
                predicates: flat,
            }),
        }
    }

    /// `lhs and rhs`, where an absent `lhs` is true.
    pub fn conjoin(lhs: Option<Predicate>, rhs: Predicate) -> Predicate {
        match lhs {
            None => rhs,
            Some(Predicate::Junction {
                kind: JunctionKind::And,
                mut predicates,
            }) => {
                predicates.push(rhs);
                Predicate::Junction {
                    kind: JunctionKind::And,
                    predicates,
                }
            }
            Some(lhs) => Predicate::Junction {
                kind: JunctionKind::And,
                predicates: vec![lhs, rhs],
            },
        }
    }

    /// Pairwise equality of two column lists, as used for key joins.
    pub fn columns_eq(lhs: Vec<Expr>, rhs: Vec<Expr>) -> Option<Predicate> {
        Predicate::and_all(
            lhs.into_iter()
                .zip(rhs)
                .map(|(lhs, rhs)| Predicate::eq(lhs, rhs))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_all_flattens_nested_conjunctions() {
        let a = Predicate::is_null(Expr::unqualified("a"));
        let b = Predicate::is_null(Expr::unqualified("b"));
        let c = Predicate::is_null(Expr::unqualified("c"));

        let nested = Predicate::and_all(vec![a.clone(), b.clone()]).unwrap();
        let p = Predicate::conjoin(Some(nested), c.clone());

        assert_eq!(
            p,
            Predicate::Junction {
                kind: JunctionKind::And,
                predicates: vec![a, b, c],
            }
        );
        assert_eq!(Predicate::and_all(vec![]), None);
    }
}
