use pretty_assertions::assert_eq;

use quarry_core::{
    sqm::{function::FunctionRender, ParamId},
    stmt::{Type, Value},
};
use quarry_sql::{
    ast::{
        visit_mut, Expr, FunctionCall, JdbcParameter, JoinKind, JunctionKind, LockMode,
        Predicate, QueryGroup, QueryPart, QuerySpec, SelectItem, SelectStatement, SetOperator,
        SortSpec, TableGroup, TableGroupJoin, TableJoin, TableReference,
    },
    Serializer, Statement,
};

fn person() -> QuerySpec {
    QuerySpec {
        select: vec![
            SelectItem::new(Expr::column("p1_0", "id")),
            SelectItem::new(Expr::column("p1_0", "name")),
        ],
        from: vec![TableGroup::new(TableReference::table("person", "p1_0"))],
        ..QuerySpec::default()
    }
}

fn render(serializer: &Serializer, spec: QuerySpec) -> (String, Vec<JdbcParameter>) {
    render_stmt(serializer, SelectStatement::spec(spec).into())
}

fn render_stmt(serializer: &Serializer, stmt: Statement) -> (String, Vec<JdbcParameter>) {
    let mut params = vec![];
    let sql = serializer.serialize(&stmt, &mut params).unwrap();
    (sql, params)
}

fn values(params: &[JdbcParameter]) -> Vec<Value> {
    params
        .iter()
        .map(|param| match param {
            JdbcParameter::Value(value) => value.clone(),
            JdbcParameter::Query { .. } => panic!("unexpected query parameter"),
        })
        .collect()
}

fn paged(order: bool) -> QuerySpec {
    let mut spec = person();
    spec.offset = Some(Expr::value_param(20i64));
    spec.fetch = Some(Expr::value_param(10i64));
    if order {
        spec.order_by = vec![SortSpec::asc(Expr::column("p1_0", "name"))];
    }
    spec
}

#[test]
fn limit_and_offset_per_dialect() {
    let (sql, params) = render(&Serializer::sqlite(), paged(false));
    assert_eq!(sql, "SELECT p1_0.id, p1_0.name FROM person p1_0 LIMIT ?1 OFFSET ?2;");
    assert_eq!(values(&params), [Value::I64(10), Value::I64(20)]);

    let (sql, params) = render(&Serializer::postgresql(), paged(false));
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 OFFSET $1 ROWS FETCH FIRST $2 ROWS ONLY;"
    );
    assert_eq!(values(&params), [Value::I64(20), Value::I64(10)]);

    let (sql, _) = render(&Serializer::mysql(), paged(false));
    assert_eq!(sql, "SELECT p1_0.id, p1_0.name FROM person p1_0 LIMIT ? OFFSET ?;");

    let (sql, params) = render(&Serializer::sqlserver(), paged(true));
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 ORDER BY p1_0.name \
         OFFSET @p1 ROWS FETCH NEXT @p2 ROWS ONLY;"
    );
    assert_eq!(values(&params), [Value::I64(20), Value::I64(10)]);
}

#[test]
fn offset_only() {
    let mut spec = person();
    spec.offset = Some(Expr::literal(5i64));

    let (sql, _) = render(&Serializer::sqlite(), spec.clone());
    assert_eq!(sql, "SELECT p1_0.id, p1_0.name FROM person p1_0 LIMIT -1 OFFSET 5;");

    let (sql, _) = render(&Serializer::mysql(), spec);
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 LIMIT 18446744073709551615 OFFSET 5;"
    );
}

#[test]
fn sqlserver_fetch_only_uses_top() {
    let mut spec = person();
    spec.fetch = Some(Expr::value_param(3i64));

    let (sql, _) = render(&Serializer::sqlserver(), spec);
    assert_eq!(sql, "SELECT TOP(@p1) p1_0.id, p1_0.name FROM person p1_0;");
}

#[test]
fn sqlserver_offset_without_ordering_numbers_rows() {
    let (sql, params) = render(&Serializer::sqlserver(), paged(false));
    assert_eq!(
        sql,
        "SELECT r_.c0, r_.c1 FROM (SELECT p1_0.id AS c0, p1_0.name AS c1, \
         ROW_NUMBER() OVER (ORDER BY (SELECT 0)) AS rn_ FROM person p1_0) r_ \
         WHERE r_.rn_ > @p1 AND r_.rn_ <= @p2 + @p3;"
    );
    assert_eq!(
        values(&params),
        [Value::I64(20), Value::I64(20), Value::I64(10)]
    );
}

#[test]
fn boolean_literals() {
    let mut spec = person();
    spec.where_ = Some(Predicate::eq(
        Expr::column("p1_0", "active"),
        Expr::literal(true),
    ));

    let (sql, _) = render(&Serializer::sqlite(), spec.clone());
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 WHERE p1_0.active = 1;"
    );

    let (sql, _) = render(&Serializer::postgresql(), spec);
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 WHERE p1_0.active = TRUE;"
    );
}

#[test]
fn boolean_predicate_on_sqlserver_compares_with_one() {
    let mut spec = person();
    spec.where_ = Some(Predicate::Boolean(Expr::column("p1_0", "active")));

    let (sql, _) = render(&Serializer::sqlserver(), spec.clone());
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 WHERE p1_0.active = 1;"
    );

    let (sql, _) = render(&Serializer::postgresql(), spec);
    assert_eq!(sql, "SELECT p1_0.id, p1_0.name FROM person p1_0 WHERE p1_0.active;");
}

#[test]
fn empty_in_list_is_constant() {
    let mut spec = person();
    spec.where_ = Some(Predicate::in_list(Expr::column("p1_0", "id"), vec![]));

    let (sql, params) = render(&Serializer::sqlite(), spec);
    assert_eq!(sql, "SELECT p1_0.id, p1_0.name FROM person p1_0 WHERE 1=0;");
    assert!(params.is_empty());
}

#[test]
fn empty_junction_is_malformed() {
    let mut spec = person();
    spec.where_ = Some(Predicate::Junction {
        kind: JunctionKind::Or,
        predicates: vec![],
    });

    let stmt: Statement = SelectStatement::spec(spec).into();
    let err = Serializer::sqlite()
        .serialize(&stmt, &mut Vec::<JdbcParameter>::new())
        .unwrap_err();
    assert!(err.is_sql_ast_syntax(), "{err}");
}

#[test]
fn nested_junctions_are_parenthesized() {
    let mut spec = person();
    spec.where_ = Some(Predicate::Junction {
        kind: JunctionKind::And,
        predicates: vec![
            Predicate::is_null(Expr::column("p1_0", "deleted")),
            Predicate::Junction {
                kind: JunctionKind::Or,
                predicates: vec![
                    Predicate::eq(Expr::column("p1_0", "id"), Expr::literal(1i64)),
                    Predicate::eq(Expr::column("p1_0", "id"), Expr::literal(2i64)),
                ],
            },
        ],
    });

    let (sql, _) = render(&Serializer::sqlite(), spec);
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 \
         WHERE p1_0.deleted IS NULL AND (p1_0.id = 1 OR p1_0.id = 2);"
    );
}

#[test]
fn row_locks() {
    let mut select = SelectStatement::spec(person());
    select.lock = Some(LockMode::Update);
    let stmt: Statement = select.into();

    let (sql, _) = render_stmt(&Serializer::postgresql(), stmt.clone());
    assert_eq!(sql, "SELECT p1_0.id, p1_0.name FROM person p1_0 FOR UPDATE;");

    let (sql, _) = render_stmt(&Serializer::sqlserver(), stmt.clone());
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 WITH (UPDLOCK, ROWLOCK);"
    );

    let (sql, _) = render_stmt(&Serializer::sqlite(), stmt);
    assert_eq!(sql, "SELECT p1_0.id, p1_0.name FROM person p1_0;");
}

#[test]
fn function_patterns_bind_in_text_order() {
    let locate = Expr::Function(FunctionCall {
        render: FunctionRender::Pattern("instr(?2, ?1)".into()),
        args: vec![Expr::value_param("a"), Expr::column("p1_0", "name")],
        distinct: false,
    });
    let mut spec = person();
    spec.select = vec![SelectItem::new(locate)];

    let (sql, params) = render(&Serializer::sqlite(), spec);
    assert_eq!(sql, "SELECT instr(p1_0.name, ?1) FROM person p1_0;");
    assert_eq!(values(&params), [Value::from("a")]);
}

#[test]
fn concat_per_dialect() {
    let concat = Expr::concat(vec![Expr::column("p1_0", "name"), Expr::literal("!")]);
    let mut spec = person();
    spec.select = vec![SelectItem::new(concat)];

    let (sql, _) = render(&Serializer::sqlite(), spec.clone());
    assert_eq!(sql, "SELECT (p1_0.name || '!') FROM person p1_0;");

    let (sql, _) = render(&Serializer::mysql(), spec.clone());
    assert_eq!(sql, "SELECT concat(p1_0.name, '!') FROM person p1_0;");

    let (sql, _) = render(&Serializer::sqlserver(), spec);
    assert_eq!(sql, "SELECT (p1_0.name + N'!') FROM person p1_0;");
}

#[test]
fn union_member_with_limit_is_isolated() {
    let mut limited = person();
    limited.fetch = Some(Expr::literal(1i64));

    let group = QueryGroup {
        op: SetOperator::Union,
        parts: vec![
            QueryPart::Spec(Box::new(person())),
            QueryPart::Spec(Box::new(limited)),
        ],
        order_by: vec![],
        offset: None,
        fetch: None,
    };
    let stmt: Statement = SelectStatement::new(QueryPart::Group(Box::new(group))).into();

    let (sql, _) = render_stmt(&Serializer::sqlite(), stmt.clone());
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 UNION \
         SELECT * FROM (SELECT p1_0.id, p1_0.name FROM person p1_0 LIMIT 1);"
    );

    let (sql, _) = render_stmt(&Serializer::postgresql(), stmt);
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 UNION \
         (SELECT p1_0.id, p1_0.name FROM person p1_0 FETCH FIRST 1 ROWS ONLY);"
    );
}

#[test]
fn outer_join_onto_inner_joined_group_is_nested() {
    let employee = |kind| TableGroup {
        primary: TableReference::table("employee", "e1_0"),
        table_joins: vec![TableJoin {
            kind,
            table: TableReference::table("person", "e1_1"),
            on: Predicate::eq(Expr::column("e1_1", "id"), Expr::column("e1_0", "id")),
        }],
        group_joins: vec![],
    };
    let spec = |kind| QuerySpec {
        select: vec![SelectItem::new(Expr::column("p1_0", "id"))],
        from: vec![TableGroup {
            primary: TableReference::table("person", "p1_0"),
            table_joins: vec![],
            group_joins: vec![TableGroupJoin {
                kind: JoinKind::Left,
                group: employee(kind),
                on: Some(Predicate::eq(
                    Expr::column("e1_0", "id"),
                    Expr::column("p1_0", "employee_id"),
                )),
            }],
        }],
        ..QuerySpec::default()
    };

    let (sql, _) = render(&Serializer::sqlite(), spec(JoinKind::Inner));
    assert_eq!(
        sql,
        "SELECT p1_0.id FROM person p1_0 LEFT JOIN \
         (employee e1_0 INNER JOIN person e1_1 ON e1_1.id = e1_0.id) \
         ON e1_0.id = p1_0.employee_id;"
    );

    let (sql, _) = render(&Serializer::sqlite(), spec(JoinKind::Left));
    assert_eq!(
        sql,
        "SELECT p1_0.id FROM person p1_0 LEFT JOIN employee e1_0 \
         ON e1_0.id = p1_0.employee_id LEFT JOIN person e1_1 ON e1_1.id = e1_0.id;"
    );
}

#[test]
fn reserved_names_are_quoted() {
    let spec = QuerySpec {
        select: vec![SelectItem::new(Expr::column("o1_0", "user"))],
        from: vec![TableGroup::new(TableReference::table("order", "o1_0"))],
        ..QuerySpec::default()
    };

    let (sql, _) = render(&Serializer::sqlite(), spec.clone());
    assert_eq!(sql, r#"SELECT o1_0."user" FROM "order" o1_0;"#);

    let (sql, _) = render(&Serializer::mysql(), spec.clone());
    assert_eq!(sql, "SELECT o1_0.`user` FROM `order` o1_0;");

    let (sql, _) = render(&Serializer::sqlserver(), spec);
    assert_eq!(sql, "SELECT o1_0.[user] FROM [order] o1_0;");
}

#[test]
fn multi_valued_parameter_expands_before_rendering() {
    let mut spec = person();
    spec.where_ = Some(Predicate::in_list(
        Expr::column("p1_0", "id"),
        vec![Expr::Param(JdbcParameter::query(ParamId(0), Type::I64))],
    ));
    let mut stmt: Statement = SelectStatement::spec(spec).into();

    visit_mut::expand_list_params(&mut stmt, |_| Some(3));

    let (sql, params) = render_stmt(&Serializer::sqlite(), stmt);
    assert_eq!(
        sql,
        "SELECT p1_0.id, p1_0.name FROM person p1_0 WHERE p1_0.id IN (?1, ?2, ?3);"
    );
    assert_eq!(params.len(), 3);
}
