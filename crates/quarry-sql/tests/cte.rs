use pretty_assertions::assert_eq;

use quarry_core::stmt::Value;
use quarry_sql::{
    ast::{
        Cte, CycleClause, Expr, JdbcParameter, Materialization, QuerySpec, SearchClause,
        SearchKind, SelectItem, SelectStatement, TableGroup, TableReference, With,
    },
    Serializer, Statement,
};

fn tree(search: Option<SearchClause>, cycle: Option<CycleClause>) -> Statement {
    let definition = QuerySpec {
        select: vec![
            SelectItem::new(Expr::column("n1_0", "id")),
            SelectItem::new(Expr::column("n1_0", "parent_id")),
        ],
        from: vec![TableGroup::new(TableReference::table("node", "n1_0"))],
        ..QuerySpec::default()
    };

    let body = QuerySpec {
        select: vec![SelectItem::new(Expr::column("t1_0", "id"))],
        from: vec![TableGroup::new(TableReference::table("tree", "t1_0"))],
        ..QuerySpec::default()
    };

    let mut select = SelectStatement::spec(body);
    select.with = Some(With {
        recursive: true,
        ctes: vec![Cte {
            name: "tree".into(),
            columns: vec!["id".into(), "parent_id".into()],
            query: Box::new(SelectStatement::spec(definition)),
            materialization: Materialization::Undefined,
            search,
            cycle,
        }],
    });
    select.into()
}

fn depth_first(desc: bool) -> SearchClause {
    SearchClause {
        kind: SearchKind::DepthFirst,
        columns: vec![("id".into(), desc, None)],
        set_column: "ord".into(),
    }
}

fn cycle() -> CycleClause {
    CycleClause {
        columns: vec!["id".into()],
        mark_column: "is_cycle".into(),
        cycle_value: Value::Bool(true),
        no_cycle_value: Value::Bool(false),
        path_column: "path".into(),
    }
}

fn serialize(serializer: &Serializer, stmt: &Statement) -> quarry_core::Result<String> {
    serializer.serialize(stmt, &mut Vec::<JdbcParameter>::new())
}

#[test]
fn recursive_cte_keyword_per_dialect() {
    let stmt = tree(None, None);

    assert_eq!(
        serialize(&Serializer::sqlite(), &stmt).unwrap(),
        "WITH RECURSIVE tree(id, parent_id) AS (SELECT n1_0.id, n1_0.parent_id FROM node n1_0) \
         SELECT t1_0.id FROM tree t1_0;"
    );

    assert_eq!(
        serialize(&Serializer::sqlserver(), &stmt).unwrap(),
        "WITH tree(id, parent_id) AS (SELECT n1_0.id, n1_0.parent_id FROM node n1_0) \
         SELECT t1_0.id FROM tree t1_0;"
    );
}

#[test]
fn native_search_and_cycle() {
    let stmt = tree(Some(depth_first(false)), Some(cycle()));

    assert_eq!(
        serialize(&Serializer::postgresql(), &stmt).unwrap(),
        "WITH RECURSIVE tree(id, parent_id) AS (SELECT n1_0.id, n1_0.parent_id FROM node n1_0) \
         SEARCH DEPTH FIRST BY id SET ord \
         CYCLE id SET is_cycle TO TRUE DEFAULT FALSE USING path \
         SELECT t1_0.id FROM tree t1_0;"
    );
}

#[test]
fn search_without_native_support_is_not_yet_implemented() {
    let stmt = tree(Some(depth_first(false)), None);

    for serializer in [Serializer::mysql(), Serializer::sqlserver(), Serializer::sqlite()] {
        let err = serialize(&serializer, &stmt).unwrap_err();
        assert!(err.is_not_yet_implemented(), "{err}");
    }
}

#[test]
fn descending_native_search_is_not_yet_implemented() {
    let stmt = tree(Some(depth_first(true)), None);

    let err = serialize(&Serializer::postgresql(), &stmt).unwrap_err();
    assert!(err.is_not_yet_implemented(), "{err}");
}

#[test]
fn materialization_hint_only_on_postgresql() {
    let Statement::Select(mut select) = tree(None, None) else {
        unreachable!()
    };
    if let Some(with) = &mut select.with {
        with.ctes[0].materialization = Materialization::Materialized;
    }
    let stmt: Statement = select.into();

    assert!(serialize(&Serializer::postgresql(), &stmt)
        .unwrap()
        .starts_with("WITH RECURSIVE tree(id, parent_id) AS MATERIALIZED (SELECT"));
    assert!(serialize(&Serializer::sqlite(), &stmt)
        .unwrap()
        .starts_with("WITH RECURSIVE tree(id, parent_id) AS (SELECT"));
}
