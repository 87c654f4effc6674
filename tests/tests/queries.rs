use pretty_assertions::assert_eq;
use quarry::{
    driver::{Capability, Connection, Driver},
    sqm::ArithmeticOp,
    EntityRef, LockMode, SessionFactory, Type, Value,
};
use quarry_driver_sqlite::Sqlite;
use tests::{models, Fixture};

use std::{borrow::Cow, time::Duration};

async fn seed_people(factory: &SessionFactory, people: &[(i64, &str, i32)]) {
    let mut session = factory.open_session();
    for (id, name, age) in people {
        let person = EntityRef::new(factory.schema(), "Person").unwrap();
        person.set("id", *id).unwrap();
        person.set("name", *name).unwrap();
        person.set("age", *age).unwrap();
        session.persist(&person).await.unwrap();
    }
    session.flush().await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn hql_and_criteria_render_the_same_sql() {
    let fx = Fixture::new(models::people()).await;
    seed_people(&fx.factory, &[(1, "Ann", 30), (2, "Bea", 17)]).await;
    let mut session = fx.factory.open_session();

    fx.sql.clear();
    let by_hql = session
        .create_query("select p from Person p where p.name = :name")
        .unwrap()
        .set_parameter("name", "Ann")
        .unwrap()
        .entity_list()
        .await
        .unwrap();
    let hql_sql = fx.sql.take();

    let cb = fx.factory.criteria_builder();
    let query = cb.create_query();
    let p = query.from("Person").unwrap();
    query.select(&p).where_(
        cb.equal(p.get("name").unwrap(), cb.parameter(Type::String, Some("name")))
            .unwrap(),
    );
    let by_criteria = session
        .create_criteria_query(&query)
        .unwrap()
        .set_parameter("name", "Ann")
        .unwrap()
        .entity_list()
        .await
        .unwrap();
    let criteria_sql = fx.sql.take();

    assert_eq!(hql_sql, criteria_sql);
    assert_eq!(by_hql.len(), 1);
    assert!(by_hql[0].ptr_eq(&by_criteria[0]));
}

#[tokio::test]
async fn sqlite_renders_limit_and_offset() {
    let fx = Fixture::new(models::people()).await;
    seed_people(&fx.factory, &[(1, "Ann", 30), (2, "Bea", 17), (3, "Cid", 52)]).await;
    let mut session = fx.factory.open_session();

    fx.sql.clear();
    let rows = session
        .create_query("select p.name from Person p order by p.id")
        .unwrap()
        .set_first_result(1)
        .set_max_results(1)
        .list()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value(0).unwrap(), Value::from("Bea"));

    let sql = fx.sql.last().unwrap();
    assert!(sql.ends_with(" LIMIT ? OFFSET ?"), "{sql}");
}

#[tokio::test]
async fn sqlite_renders_boolean_literals_as_integers() {
    let fx = Fixture::new(models::library()).await;
    models::seed_library(&fx.factory, 4).await;
    let mut session = fx.factory.open_session();

    fx.sql.clear();
    let books = session
        .create_query("from Book b where b.available = true")
        .unwrap()
        .entity_list()
        .await
        .unwrap();
    assert_eq!(books.len(), 2);

    let sql = fx.sql.last().unwrap();
    assert!(sql.contains(" = 1"), "{sql}");
    assert!(!sql.contains("TRUE"), "{sql}");
}

#[tokio::test]
async fn unknown_function_is_a_semantic_error() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();

    let err = session
        .create_query("select soundex(p.name) from Person p")
        .err()
        .unwrap();
    assert!(err.is_semantic());
    assert!(err.to_string().contains("function not found"), "{err}");
}

#[tokio::test]
async fn registered_function_is_rendered_from_its_pattern() {
    let fx = Fixture::with(models::people(), |builder| {
        builder.register_function("shout", "upper(?1) || '!'", 1, Type::String);
    })
    .await;
    seed_people(&fx.factory, &[(1, "Ann", 30)]).await;
    let mut session = fx.factory.open_session();

    let row = session
        .create_query("select shout(p.name) from Person p")
        .unwrap()
        .single_result()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.value(0).unwrap(), Value::from("ANN!"));
}

#[tokio::test]
async fn enabled_filter_restricts_queries() {
    let fx = Fixture::new(models::people()).await;
    seed_people(&fx.factory, &[(1, "Ann", 30), (2, "Bea", 17)]).await;
    let mut session = fx.factory.open_session();

    let err = session.enable_filter("minAge", []).unwrap_err();
    assert!(err.is_illegal_argument());

    session
        .enable_filter("minAge", [("age", Value::I64(18))])
        .unwrap();
    assert!(session.is_filter_enabled("minAge"));

    fx.sql.clear();
    let people = session.create_query("from Person").unwrap().entity_list().await.unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].get("name").unwrap(), Value::from("Ann"));
    assert!(fx.sql.last().unwrap().contains(">="));

    session.disable_filter("minAge");
    let people = session.create_query("from Person").unwrap().entity_list().await.unwrap();
    assert_eq!(people.len(), 2);
}

#[tokio::test]
async fn tenant_sessions_see_their_own_rows() {
    let fx = Fixture::new(models::accounts()).await;

    for (tenant, name) in [("acme", "Road Runner"), ("globex", "Hank")] {
        let mut session = fx.factory.open_session_for_tenant(tenant).unwrap();
        let account = EntityRef::new(fx.factory.schema(), "Account").unwrap();
        account.set("name", name).unwrap();
        session.persist(&account).await.unwrap();
        assert_eq!(account.get("tenantId").unwrap(), Value::from(tenant));
        session.flush().await.unwrap();
        session.close().await.unwrap();
    }

    let mut session = fx.factory.open_session_for_tenant("acme").unwrap();
    fx.sql.clear();
    let accounts = session.create_query("from Account").unwrap().entity_list().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].get("name").unwrap(), Value::from("Road Runner"));
    assert!(fx.sql.last().unwrap().contains("tenant_id"));

    let err = session.enable_filter(quarry::schema::app::TENANT_FILTER, []).unwrap_err();
    assert!(err.is_illegal_argument());
}

#[tokio::test]
async fn bulk_update_counts_affected_rows() {
    let fx = Fixture::new(models::people()).await;
    seed_people(&fx.factory, &[(1, "Ann", 30), (2, "Bea", 17), (3, "Cid", 52)]).await;
    let mut session = fx.factory.open_session();

    let count = session
        .create_mutation_query("update Person p set p.age = p.age + 1 where p.age > :age")
        .unwrap()
        .set_parameter("age", 20i32)
        .unwrap()
        .execute_update()
        .await
        .unwrap();
    assert_eq!(count, 2);

    let count = session
        .create_mutation_query("delete from Person p where p.name = :name")
        .unwrap()
        .set_parameter("name", "Bea")
        .unwrap()
        .execute_update()
        .await
        .unwrap();
    assert_eq!(count, 1);

    let ann = session.find("Person", 1i64).await.unwrap().unwrap();
    assert_eq!(ann.get("age").unwrap(), Value::I32(31));

    let err = session.create_mutation_query("from Person").err().unwrap();
    assert!(err.is_illegal_argument());
}

#[tokio::test]
async fn recursive_cte_cycle_clause_is_checked() {
    let fx = Fixture::new(models::people()).await;
    let cb = fx.factory.criteria_builder();
    let query = cb.create_query();

    let base = query.subquery();
    let p = base.from("Person").unwrap();
    base.select_as(p.get("id").unwrap(), "id");

    let ids = query
        .with_recursive_union_all("ids", &base, |this| {
            let next = query.subquery();
            let prev = next.from_cte(this);
            next.select_as(prev.get("id")?, "id");
            Ok(next)
        })
        .unwrap();

    let id = ids.get("id").unwrap();
    let err = ids.cycle("looped", "yes", 0i32, vec![id.clone()]).unwrap_err();
    assert!(err.is_illegal_argument(), "{err}");

    let other = query.with("other", &base).unwrap();
    let foreign = other.get("id").unwrap();
    let err = ids.cycle("looped", true, false, vec![foreign]).unwrap_err();
    assert!(err.is_illegal_argument(), "{err}");

    ids.cycle("looped", true, false, vec![id]).unwrap();
}

#[tokio::test]
async fn recursive_cte_stops_at_the_first_repeated_row() {
    let fx = Fixture::new(models::people()).await;
    seed_people(&fx.factory, &[(1, "Ann", 30)]).await;
    let mut session = fx.factory.open_session();

    let cb = fx.factory.criteria_builder();
    let query = cb.create_query();
    let base = query.subquery();
    let p = base.from("Person").unwrap();
    base.select_as(p.get("id").unwrap(), "id");

    // 1, 2, 3, 1, ...
    let ring = query
        .with_recursive_union_all("ring", &base, |this| {
            let step = query.subquery();
            let prev = step.from_cte(this);
            let rem = cb.arithmetic(prev.get("id")?, ArithmeticOp::Mod, cb.literal(3i64));
            step.select_as(cb.arithmetic(rem, ArithmeticOp::Add, cb.literal(1i64)), "id");
            Ok(step)
        })
        .unwrap();
    ring.cycle("looped", "Y", "N", vec![ring.get("id").unwrap()])
        .unwrap();

    let r = query.from_cte(&ring);
    query
        .select(r.get("id").unwrap())
        .select(r.get("looped").unwrap());

    let rows = session
        .create_criteria_query(&query)
        .unwrap()
        .list()
        .await
        .unwrap();
    let mut rows: Vec<(Value, Value)> = rows
        .iter()
        .map(|row| (row.value(0).unwrap(), row.value(1).unwrap()))
        .collect();
    rows.sort_by_key(|(id, looped)| (id.to_string(), looped.to_string()));
    assert_eq!(
        rows,
        vec![
            (Value::I64(1), Value::from("N")),
            (Value::I64(1), Value::from("Y")),
            (Value::I64(2), Value::from("N")),
            (Value::I64(3), Value::from("N")),
        ]
    );
    assert!(fx.sql.last().unwrap().starts_with("WITH RECURSIVE"));
}

#[tokio::test]
async fn query_timeout_interrupts_a_long_statement() {
    let fx = Fixture::new(models::people()).await;
    seed_people(&fx.factory, &[(1, "Ann", 30)]).await;
    let mut session = fx.factory.open_session();

    let cb = fx.factory.criteria_builder();
    let query = cb.create_query();
    let base = query.subquery();
    let p = base.from("Person").unwrap();
    base.select_as(p.get("id").unwrap(), "id");

    let counter = query
        .with_recursive_union_all("counter", &base, |this| {
            let step = query.subquery();
            let prev = step.from_cte(this);
            step.select_as(cb.arithmetic(prev.get("id")?, ArithmeticOp::Add, cb.literal(1i64)), "id");
            step.where_(cb.lt(prev.get("id")?, cb.literal(50_000_000i64))?);
            Ok(step)
        })
        .unwrap();
    let c = query.from_cte(&counter);
    query.select(c.get("id").unwrap());

    let err = session
        .create_criteria_query(&query)
        .unwrap()
        .set_timeout(Duration::from_millis(1))
        .list()
        .await
        .unwrap_err();
    assert!(err.is_jdbc_execution(), "{err}");

    // The connection is usable again without the deadline.
    let rows = session.create_query("from Person").unwrap().list().await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn mutation_timeout_leaves_quick_statements_alone() {
    let fx = Fixture::new(models::people()).await;
    seed_people(&fx.factory, &[(1, "Ann", 30), (2, "Bea", 40)]).await;
    let mut session = fx.factory.open_session();

    let updated = session
        .create_mutation_query("update Person p set p.age = p.age + 1")
        .unwrap()
        .set_timeout(Duration::from_secs(30))
        .execute_update()
        .await
        .unwrap();
    assert_eq!(updated, 2);
}

/// SQLite underneath, PostgreSQL as far as rendering goes.
#[derive(Debug)]
struct RendersForPostgres(Sqlite);

#[async_trait::async_trait]
impl Driver for RendersForPostgres {
    fn url(&self) -> Cow<'_, str> {
        self.0.url()
    }

    fn capability(&self) -> &'static Capability {
        &Capability::POSTGRESQL
    }

    async fn connect(&self) -> quarry::Result<Box<dyn Connection>> {
        self.0.connect().await
    }
}

#[tokio::test]
async fn lock_mode_renders_a_locking_clause() {
    let driver = RendersForPostgres(Sqlite::in_memory().unwrap());
    let fx = Fixture::with_driver(models::people(), driver, |_| {}).await;
    let mut session = fx.factory.open_session();

    // SQLite rejects the clause, which is as far as this goes.
    let result = session
        .create_query("from Person p where p.age > 18")
        .unwrap()
        .set_lock_mode(LockMode::PessimisticWrite)
        .list()
        .await;
    assert!(result.is_err());
    let sql = fx.sql.last().unwrap();
    assert!(sql.ends_with(" FOR UPDATE"), "{sql}");

    let _ = session
        .create_query("from Person p")
        .unwrap()
        .set_lock_mode(LockMode::PessimisticRead)
        .list()
        .await;
    let sql = fx.sql.last().unwrap();
    assert!(sql.ends_with(" FOR SHARE"), "{sql}");
}

#[tokio::test]
async fn lock_mode_is_dropped_where_rows_cannot_be_locked() {
    let fx = Fixture::new(models::people()).await;
    seed_people(&fx.factory, &[(1, "Ann", 30)]).await;
    let mut session = fx.factory.open_session();

    let rows = session
        .create_query("from Person p where p.age > 18")
        .unwrap()
        .set_lock_mode(LockMode::PessimisticWrite)
        .list()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!fx.sql.last().unwrap().contains(" FOR "));
}
