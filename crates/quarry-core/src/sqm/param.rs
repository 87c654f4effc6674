use crate::{
    stmt::{Type, Value},
    Error, Result,
};

use std::fmt;

/// Identifies a logical parameter. Every occurrence of `:name` (or `?1`) in
/// a statement shares one id, so they bind to the same value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct SqmParameter {
    pub id: ParamId,
    pub kind: ParamKind,

    /// Inferred from the first typed context the parameter appears in
    pub ty: Type,

    /// Set when the parameter is the right side of an `in` predicate
    pub multi_valued: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Named(String),
    Positional(usize),

    /// Created through the criteria API, optionally named
    Criteria(Option<String>),

    /// A literal value supplied when the tree was built (filter arguments,
    /// criteria literals rendered as parameters)
    Value(Value),
}

/// The parameter table of a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqmParameters {
    params: Vec<SqmParameter>,
}

impl SqmParameters {
    pub fn new() -> SqmParameters {
        SqmParameters::default()
    }

    /// Starts ids at `first` so the table can be merged into another
    /// statement's without renumbering.
    pub fn with_offset(first: usize) -> SqmParameters {
        SqmParameters {
            params: (0..first)
                .map(|i| SqmParameter {
                    id: ParamId(i),
                    kind: ParamKind::Criteria(None),
                    ty: Type::Unknown,
                    multi_valued: false,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SqmParameter> + '_ {
        self.params.iter()
    }

    pub fn get(&self, id: ParamId) -> &SqmParameter {
        &self.params[id.0]
    }

    /// Registers (or re-uses) the named parameter `:name`.
    pub fn named(&mut self, name: &str) -> Result<ParamId> {
        if self.has_positional() {
            return Err(Error::semantic(format!(
                "cannot mix named parameter `:{name}` with positional parameters"
            )));
        }

        if let Some(param) = self
            .params
            .iter()
            .find(|param| matches!(&param.kind, ParamKind::Named(n) if n == name))
        {
            return Ok(param.id);
        }

        Ok(self.push(ParamKind::Named(name.to_string()), Type::Unknown))
    }

    /// Registers (or re-uses) the positional parameter `?position`.
    pub fn positional(&mut self, position: usize) -> Result<ParamId> {
        if self.has_named() {
            return Err(Error::semantic(format!(
                "cannot mix positional parameter `?{position}` with named parameters"
            )));
        }

        if let Some(param) = self
            .params
            .iter()
            .find(|param| param.kind == ParamKind::Positional(position))
        {
            return Ok(param.id);
        }

        Ok(self.push(ParamKind::Positional(position), Type::Unknown))
    }

    pub fn criteria(&mut self, name: Option<&str>, ty: Type) -> ParamId {
        if let Some(name) = name {
            if let Some(param) = self.params.iter().find(
                |param| matches!(&param.kind, ParamKind::Criteria(Some(n)) if n == name),
            ) {
                return param.id;
            }
        }
        self.push(ParamKind::Criteria(name.map(str::to_string)), ty)
    }

    /// Registers a value-bound parameter.
    pub fn value(&mut self, value: Value, ty: Type) -> ParamId {
        self.push(ParamKind::Value(value), ty)
    }

    /// Records the type implied by the parameter's context. The first
    /// concrete type wins.
    pub fn infer(&mut self, id: ParamId, ty: &Type) {
        let param = &mut self.params[id.0];
        if param.ty.is_unknown() && !ty.is_unknown() {
            param.ty = ty.clone();
        }
    }

    pub fn set_multi_valued(&mut self, id: ParamId) {
        self.params[id.0].multi_valued = true;
    }

    /// Finds the parameter a caller-supplied name or position refers to.
    pub fn lookup(&self, name: &ParamName<'_>) -> Option<&SqmParameter> {
        self.params.iter().find(|param| match (&param.kind, name) {
            (ParamKind::Named(n), ParamName::Named(name)) => n == name,
            (ParamKind::Criteria(Some(n)), ParamName::Named(name)) => n == name,
            (ParamKind::Positional(p), ParamName::Positional(position)) => p == position,
            _ => false,
        })
    }

    fn has_named(&self) -> bool {
        self.params
            .iter()
            .any(|param| matches!(param.kind, ParamKind::Named(_)))
    }

    fn has_positional(&self) -> bool {
        self.params
            .iter()
            .any(|param| matches!(param.kind, ParamKind::Positional(_)))
    }

    fn push(&mut self, kind: ParamKind, ty: Type) -> ParamId {
        let id = ParamId(self.params.len());
        self.params.push(SqmParameter {
            id,
            kind,
            ty,
            multi_valued: false,
        });
        id
    }
}

/// How a caller addresses a parameter when binding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamName<'a> {
    Named(&'a str),
    Positional(usize),
}

impl<'a> From<&'a str> for ParamName<'a> {
    fn from(value: &'a str) -> Self {
        ParamName::Named(value)
    }
}

impl From<usize> for ParamName<'_> {
    fn from(value: usize) -> Self {
        ParamName::Positional(value)
    }
}

impl fmt::Display for ParamName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamName::Named(name) => write!(f, ":{name}"),
            ParamName::Positional(position) => write!(f, "?{position}"),
        }
    }
}

impl fmt::Debug for ParamId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "ParamId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_references_share_one_id() {
        let mut params = SqmParameters::new();
        let a = params.named("name").unwrap();
        let b = params.named("other").unwrap();
        let c = params.named("name").unwrap();

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn mixing_named_and_positional_fails() {
        let mut params = SqmParameters::new();
        params.positional(1).unwrap();
        assert!(params.named("x").unwrap_err().is_semantic());
    }

    #[test]
    fn first_concrete_type_wins() {
        let mut params = SqmParameters::new();
        let id = params.named("id").unwrap();
        params.infer(id, &Type::Unknown);
        params.infer(id, &Type::I64);
        params.infer(id, &Type::String);
        assert_eq!(params.get(id).ty, Type::I64);
    }
}
