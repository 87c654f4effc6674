use pretty_assertions::assert_eq;
use quarry::{EntityRef, Session, SessionFactory, Value};
use tests::{models, Fixture};

async fn persist_person(
    factory: &SessionFactory,
    session: &mut Session,
    id: i64,
    name: &str,
    phones: &[&str],
) -> EntityRef {
    let schema = factory.schema();
    let person = EntityRef::new(schema, "Person").unwrap();
    person.set("id", id).unwrap();
    person.set("name", name).unwrap();
    person.set("age", 30i32).unwrap();

    for (i, number) in phones.iter().enumerate() {
        let phone = EntityRef::new(schema, "Phone").unwrap();
        phone.set("id", id * 100 + i as i64).unwrap();
        phone.set("number", *number).unwrap();
        phone.set_ref("person", Some(&person)).unwrap();
        person.add_element("phones", &phone).unwrap();
    }

    session.persist(&person).await.unwrap();
    person
}

#[tokio::test]
async fn find_returns_the_managed_instance() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    let created = persist_person(&fx.factory, &mut session, 1, "Ann", &[]).await;

    let found = session.find("Person", 1i64).await.unwrap().unwrap();
    assert!(found.ptr_eq(&created));

    session.flush().await.unwrap();
    session.clear();
    fx.sql.clear();

    let first = session.find("Person", 1i64).await.unwrap().unwrap();
    let second = session.find("Person", 1i64).await.unwrap().unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(fx.sql.count(), 1);

    let queried = session
        .create_query("from Person p where p.name = :name")
        .unwrap()
        .set_parameter("name", "Ann")
        .unwrap()
        .entity_list()
        .await
        .unwrap();
    assert_eq!(queried.len(), 1);
    assert!(queried[0].ptr_eq(&first));
}

#[tokio::test]
async fn state_survives_a_round_trip() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    persist_person(&fx.factory, &mut session, 7, "Bea", &["555-0100", "555-0101"]).await;
    session.flush().await.unwrap();
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let person = session.find("Person", 7i64).await.unwrap().unwrap();
    assert_eq!(person.get("name").unwrap(), Value::from("Bea"));
    assert_eq!(person.get("age").unwrap(), Value::I32(30));
    assert_eq!(person.get("version").unwrap(), Value::I32(0));

    let phones = session.collection(&person, "phones").await.unwrap();
    let mut numbers: Vec<_> = phones
        .iter()
        .map(|phone| phone.as_entity().unwrap().get("number").unwrap())
        .collect();
    numbers.sort_by_key(|number| number.to_string());
    assert_eq!(numbers, vec![Value::from("555-0100"), Value::from("555-0101")]);

    let owner = session
        .to_one(phones[0].as_entity().unwrap(), "person")
        .await
        .unwrap()
        .unwrap();
    assert!(owner.ptr_eq(&person));
}

#[tokio::test]
async fn find_of_a_missing_row_is_none() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    assert!(session.find("Person", 404i64).await.unwrap().is_none());

    let err = session.find("Nobody", 1i64).await.unwrap_err();
    assert!(err.is_illegal_argument());
}

#[tokio::test]
async fn dirty_instances_are_updated_on_flush() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    persist_person(&fx.factory, &mut session, 1, "Ann", &[]).await;
    session.flush().await.unwrap();
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let person = session.find("Person", 1i64).await.unwrap().unwrap();
    person.set("name", "Anne").unwrap();
    fx.sql.clear();
    session.flush().await.unwrap();

    let statements = fx.sql.take();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("UPDATE"));
    assert_eq!(person.get("version").unwrap(), Value::I32(1));

    // Nothing changed since the last flush.
    session.flush().await.unwrap();
    assert_eq!(fx.sql.count(), 0);
}

#[tokio::test]
async fn concurrent_update_is_stale() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    persist_person(&fx.factory, &mut session, 1, "Ann", &[]).await;
    session.flush().await.unwrap();
    session.close().await.unwrap();

    let mut first = fx.factory.open_session();
    let mut second = fx.factory.open_session();
    let a = first.find("Person", 1i64).await.unwrap().unwrap();
    let b = second.find("Person", 1i64).await.unwrap().unwrap();

    a.set("name", "first").unwrap();
    first.flush().await.unwrap();

    b.set("name", "second").unwrap();
    let err = second.flush().await.unwrap_err();
    assert!(err.is_stale_state(), "{err}");
}

#[tokio::test]
async fn remove_deletes_on_flush() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    persist_person(&fx.factory, &mut session, 1, "Ann", &["555-0100"]).await;
    session.flush().await.unwrap();
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let person = session.find("Person", 1i64).await.unwrap().unwrap();
    session.remove(&person).await.unwrap();
    assert!(!session.contains(&person));
    session.flush().await.unwrap();
    session.clear();

    assert!(session.find("Person", 1i64).await.unwrap().is_none());
    assert!(session.find("Phone", 100i64).await.unwrap().is_none());
}

#[tokio::test]
async fn merge_copies_detached_state() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    let detached = persist_person(&fx.factory, &mut session, 1, "Ann", &[]).await;
    session.flush().await.unwrap();
    session.close().await.unwrap();

    detached.set("name", "Merged").unwrap();

    let mut session = fx.factory.open_session();
    let managed = session.merge(&detached).await.unwrap();
    assert!(!managed.ptr_eq(&detached));
    assert!(session.contains(&managed));
    assert_eq!(managed.get("name").unwrap(), Value::from("Merged"));
    session.flush().await.unwrap();
    session.clear();

    let reloaded = session.find("Person", 1i64).await.unwrap().unwrap();
    assert_eq!(reloaded.get("name").unwrap(), Value::from("Merged"));
}

#[tokio::test]
async fn rollback_discards_changes() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    session.begin().await.unwrap();
    persist_person(&fx.factory, &mut session, 1, "Ann", &[]).await;
    session.flush().await.unwrap();
    session.rollback().await.unwrap();
    assert!(!session.is_transaction_active());

    assert!(session.find("Person", 1i64).await.unwrap().is_none());
}

#[tokio::test]
async fn open_results_block_close() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();

    let results = session.create_query("from Person").unwrap().stream().await.unwrap();
    // Never dropped, so never unregistered
    std::mem::forget(results);
    assert!(session.has_registered_resources());

    let err = session.close().await.unwrap_err();
    assert!(err.is_resource_leak(), "{err}");
    assert!(session.is_open());
}

#[tokio::test]
async fn closed_results_hand_out_no_more_rows() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    persist_person(&fx.factory, &mut session, 1, "Ann", &[]).await;
    persist_person(&fx.factory, &mut session, 2, "Bea", &[]).await;
    session.flush().await.unwrap();

    let mut results = session
        .create_query("from Person p order by p.id")
        .unwrap()
        .stream()
        .await
        .unwrap();
    let row = results.next().await.unwrap().unwrap();
    assert_eq!(row.entity(0).unwrap().unwrap().id(), Value::I64(1));

    results.close();
    assert!(results.is_closed());
    assert!(results.next().await.is_none());
    drop(results);

    assert!(!session.has_registered_resources());
    session.close().await.unwrap();
    assert!(!session.is_open());
}

#[tokio::test]
async fn dropped_stream_releases_its_registration() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    session.begin().await.unwrap();
    persist_person(&fx.factory, &mut session, 1, "Ann", &[]).await;
    persist_person(&fx.factory, &mut session, 2, "Bea", &[]).await;

    let mut results = session.create_query("from Person").unwrap().stream().await.unwrap();
    results.next().await.unwrap().unwrap();
    drop(results);

    assert!(!session.has_registered_resources());
    session.commit().await.unwrap();
}

#[tokio::test]
async fn streamed_rows_are_loaded_as_they_are_read() {
    let fx = Fixture::new(models::people()).await;
    let mut session = fx.factory.open_session();
    for id in 1..=3 {
        persist_person(&fx.factory, &mut session, id, "Ann", &[]).await;
    }
    session.flush().await.unwrap();
    session.close().await.unwrap();

    let stats = fx.factory.statistics();
    let mut session = fx.factory.open_session();
    let before = stats.entity_load_count();
    let mut results = session
        .create_query("from Person p order by p.id")
        .unwrap()
        .stream()
        .await
        .unwrap();
    assert_eq!(stats.entity_load_count(), before);

    let row = results.next().await.unwrap().unwrap();
    assert_eq!(row.entity(0).unwrap().unwrap().id(), Value::I64(1));
    assert_eq!(stats.entity_load_count(), before + 1);

    let rest = results.collect().await.unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(stats.entity_load_count(), before + 3);
}

#[tokio::test]
async fn streaming_initializes_eager_collections() {
    let fx = Fixture::new(models::companies()).await;
    let schema = fx.factory.schema();
    let mut session = fx.factory.open_session();
    for id in 1..=3i64 {
        let company = EntityRef::new(schema, "Company").unwrap();
        company.set("id", id).unwrap();
        company.set("name", format!("company {id}")).unwrap();
        company.add_element("phoneNumbers", Value::from(format!("555-010{id}"))).unwrap();
        session.persist(&company).await.unwrap();
    }
    session.flush().await.unwrap();
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let rows = session
        .create_query("from Company c order by c.id")
        .unwrap()
        .stream()
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);

    for (row, id) in rows.iter().zip(1..) {
        let company = row.entity(0).unwrap().unwrap();
        assert_eq!(company.id(), Value::I64(id));
        assert!(session.is_initialized(&company, Some("phoneNumbers")).unwrap());
        assert_eq!(
            company.values("phoneNumbers").unwrap(),
            vec![Value::from(format!("555-010{id}"))]
        );
    }
}

#[tokio::test]
async fn inserts_follow_foreign_keys() {
    let fx = Fixture::new(models::projects()).await;
    let schema = fx.factory.schema();
    let mut session = fx.factory.open_session();

    let project = EntityRef::new(schema, "Project").unwrap();
    project.set("id", 1i64).unwrap();
    project.set("name", "Apollo").unwrap();
    let task = EntityRef::new(schema, "Task").unwrap();
    task.set("id", 10i64).unwrap();
    task.set("title", "launch").unwrap();
    task.set_ref("project", Some(&project)).unwrap();

    // The referencing task is made managed first.
    session.persist(&task).await.unwrap();
    session.persist(&project).await.unwrap();

    fx.sql.clear();
    session.flush().await.unwrap();

    let inserts: Vec<_> = fx
        .sql
        .take()
        .into_iter()
        .filter(|sql| sql.starts_with("INSERT"))
        .collect();
    assert_eq!(inserts.len(), 2, "{inserts:#?}");
    assert!(inserts[0].contains("Project") && !inserts[0].contains("Task"), "{}", inserts[0]);
    assert!(inserts[1].contains("Task"), "{}", inserts[1]);
}
