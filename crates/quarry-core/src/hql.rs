//! The query language front end.
//!
//! Text is tokenized, parsed into an untyped syntax tree ([`ast`]), then
//! bound to the [`Schema`] to produce an [`SqmStatement`]. Syntax errors
//! carry the byte offset they were detected at; binding failures are
//! semantic errors.

pub mod ast;
mod lexer;
mod parser;
mod semantic;

use crate::{
    schema::app::{EntityFilter, EntityId},
    sqm::{
        FromId, FromSource, FromTy, FunctionRegistry, SqmFrom, SqmParameters, SqmPredicate,
        SqmStatement,
    },
    stmt::Value,
    Error, Result, Schema,
};
use parser::Parser;
use semantic::{FilterParams, SemanticBuilder};

use indexmap::IndexMap;

/// Parses a statement without binding it.
pub fn parse(src: &str) -> Result<ast::Statement> {
    Parser::new(src)?.parse_statement()
}

/// Parses and binds a statement.
pub fn interpret(schema: &Schema, functions: &FunctionRegistry, src: &str) -> Result<SqmStatement> {
    let stmt = parse(src)?;
    SemanticBuilder::new(schema, Some(functions)).statement(&stmt)
}

/// Checks that an entity's filter condition parses and binds against the
/// entity. Function calls are not resolved, since no dialect is known yet.
pub fn check_filter_condition(
    schema: &Schema,
    entity: EntityId,
    filter: &EntityFilter,
) -> Result<()> {
    let Some(def) = schema.app.filter(&filter.name) else {
        return Err(Error::mapping(format!("undefined filter `{}`", filter.name)));
    };

    let condition = Parser::new(&filter.condition)?.parse_condition()?;
    let from = SqmFrom {
        id: FromId(0),
        alias: None,
        source: FromSource::Entity(entity),
        ty: FromTy::Entity(entity),
    };

    SemanticBuilder::new(schema, None)
        .with_next_from(1)
        .with_filter(FilterParams { def, values: None })
        .condition(&from, &condition)?;
    Ok(())
}

/// Binds enabled filter conditions into a statement.
///
/// Filter arguments become value-bound parameters appended to the
/// statement's parameter table. From elements created by subqueries inside
/// a condition are numbered from `next_from` on.
pub struct FilterBinder<'a> {
    schema: &'a Schema,
    functions: &'a FunctionRegistry,
    params: &'a mut SqmParameters,
    next_from: usize,
}

impl<'a> FilterBinder<'a> {
    pub fn new(
        schema: &'a Schema,
        functions: &'a FunctionRegistry,
        params: &'a mut SqmParameters,
        next_from: usize,
    ) -> FilterBinder<'a> {
        FilterBinder {
            schema,
            functions,
            params,
            next_from,
        }
    }

    /// The restriction `filter` places on `from`.
    pub fn bind(
        &mut self,
        from: &SqmFrom,
        filter: &EntityFilter,
        values: &IndexMap<String, Value>,
    ) -> Result<SqmPredicate> {
        let Some(def) = self.schema.app.filter(&filter.name) else {
            return Err(Error::illegal_argument(format!(
                "no filter named `{}`",
                filter.name
            )));
        };
        let condition = Parser::new(&filter.condition)?.parse_condition()?;

        let mut builder = SemanticBuilder::new(self.schema, Some(self.functions))
            .with_params(std::mem::take(self.params))
            .with_next_from(self.next_from)
            .with_filter(FilterParams {
                def,
                values: Some(values),
            });
        let predicate = builder.condition(from, &condition);

        self.next_from = builder.next_from();
        *self.params = builder.into_params();
        predicate
    }

    pub fn next_from(&self) -> usize {
        self.next_from
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        driver::Dialect,
        schema::{app::TENANT_FILTER, AttributeDef, EntityDef, FilterDef},
        sqm::{ParamKind, SqmExpr},
        stmt::Type,
    };

    fn schema(condition: &str) -> Result<Schema> {
        let mut builder = Schema::builder();
        builder
            .filter(FilterDef::new("minAge").param("age", Type::I32))
            .entity(
                EntityDef::new("Person")
                    .id("id", Type::I64)
                    .basic("age", Type::I32)
                    .attribute(AttributeDef::basic("tenant", Type::String).tenant())
                    .filter("minAge", Some(condition)),
            );
        builder.build()
    }

    #[test]
    fn filter_condition_is_checked_at_build() {
        schema("age >= :age").unwrap();

        let err = schema("agee >= :age").unwrap_err();
        assert!(err.is_mapping());
        assert!(err.is_semantic());

        let err = schema("age >= :other").unwrap_err();
        assert!(err.is_semantic());

        let err = schema("age >=").unwrap_err();
        assert!(err.is_query_syntax());
    }

    #[test]
    fn binder_appends_value_parameters() {
        let schema = schema("age >= :age").unwrap();
        let functions = FunctionRegistry::new(Dialect::Sqlite);
        let person = schema.entity_by_name("Person").unwrap();
        let from = SqmFrom {
            id: FromId(0),
            alias: Some("p".into()),
            source: FromSource::Entity(person.id),
            ty: FromTy::Entity(person.id),
        };

        let mut params = SqmParameters::new();
        params.named("name").unwrap();

        let mut values = IndexMap::new();
        values.insert("age".to_string(), Value::I64(21));
        values.insert("tenantId".to_string(), Value::from("acme"));

        let mut binder = FilterBinder::new(&schema, &functions, &mut params, 1);
        for filter in &person.filters {
            binder.bind(&from, filter, &values).unwrap();
        }
        assert_eq!(binder.next_from(), 1);

        let kinds = params.iter().map(|p| p.kind.clone()).collect::<Vec<_>>();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[1], ParamKind::Value(Value::I32(21)));
        assert_eq!(kinds[2], ParamKind::Value(Value::from("acme")));
        assert!(person.filters.iter().any(|f| f.name == TENANT_FILTER));
    }

    #[test]
    fn missing_filter_argument() {
        let schema = schema("age >= :age").unwrap();
        let functions = FunctionRegistry::new(Dialect::Sqlite);
        let person = schema.entity_by_name("Person").unwrap();
        let from = SqmFrom {
            id: FromId(0),
            alias: None,
            source: FromSource::Entity(person.id),
            ty: FromTy::Entity(person.id),
        };
        let mut params = SqmParameters::new();
        let filter = person.filters.iter().find(|f| f.name == "minAge").unwrap();

        let err = FilterBinder::new(&schema, &functions, &mut params, 1)
            .bind(&from, filter, &IndexMap::new())
            .unwrap_err();
        assert!(err.is_illegal_argument());
    }

    #[test]
    fn interpret_select() {
        let schema = schema("age >= :age").unwrap();
        let functions = FunctionRegistry::new(Dialect::Sqlite);
        let stmt = interpret(&schema, &functions, "select count(*) from Person").unwrap();
        let select = stmt.into_select().unwrap();
        assert_eq!(select.query.first_spec().select[0].expr, SqmExpr::CountStar);
    }
}
