use pretty_assertions::assert_eq;
use quarry::{EntityGraph, EntityRef, GraphSemantic, InMemoryRegionFactory, SessionFactory, Value};
use tests::{models, Fixture};

async fn seed_company(factory: &SessionFactory) {
    let schema = factory.schema();
    let mut session = factory.open_session();

    let location = EntityRef::new(schema, "Location").unwrap();
    location.set("id", 1i64).unwrap();
    location.set("address", "1 Main St").unwrap();

    let company = EntityRef::new(schema, "Company").unwrap();
    company.set("id", 1i64).unwrap();
    company.set("name", "Acme").unwrap();
    company.set_ref("location", Some(&location)).unwrap();
    company.add_element("markets", "EU").unwrap();
    company.add_element("markets", "US").unwrap();
    company.add_element("phoneNumbers", "555-0100").unwrap();

    let employee = EntityRef::new(schema, "Employee").unwrap();
    employee.set("id", 1i64).unwrap();
    employee.set("name", "Wile").unwrap();
    employee.set_ref("company", Some(&company)).unwrap();
    company.add_element("employees", &employee).unwrap();

    session.persist(&location).await.unwrap();
    session.persist(&company).await.unwrap();
    session.persist(&employee).await.unwrap();
    session.flush().await.unwrap();
    session.close().await.unwrap();
}

fn location_and_markets() -> EntityGraph {
    EntityGraph::new("Company").add_attributes(["location", "markets"])
}

#[tokio::test]
async fn load_graph_keeps_mapped_eager_attributes() {
    let fx = Fixture::new(models::companies()).await;
    seed_company(&fx.factory).await;

    let mut session = fx.factory.open_session();
    let company = session
        .find_with("Company", 1i64, &location_and_markets(), GraphSemantic::Load)
        .await
        .unwrap()
        .unwrap();

    assert!(session.is_initialized(&company, Some("location")).unwrap());
    assert!(session.is_initialized(&company, Some("markets")).unwrap());
    assert!(session.is_initialized(&company, Some("phoneNumbers")).unwrap());
    assert!(!session.is_initialized(&company, Some("employees")).unwrap());

    let location = company.to_one("location").unwrap().unwrap();
    assert!(location.is_loaded());
    assert_eq!(company.values("markets").unwrap().len(), 2);
}

#[tokio::test]
async fn fetch_graph_makes_unnamed_attributes_lazy() {
    let fx = Fixture::new(models::companies()).await;
    seed_company(&fx.factory).await;

    let mut session = fx.factory.open_session();
    let company = session
        .find_with("Company", 1i64, &location_and_markets(), GraphSemantic::Fetch)
        .await
        .unwrap()
        .unwrap();

    assert!(session.is_initialized(&company, Some("location")).unwrap());
    assert!(session.is_initialized(&company, Some("markets")).unwrap());
    assert!(!session.is_initialized(&company, Some("phoneNumbers")).unwrap());
    assert!(!session.is_initialized(&company, Some("employees")).unwrap());

    // Still loadable on access.
    let numbers = session.collection(&company, "phoneNumbers").await.unwrap();
    assert_eq!(numbers.len(), 1);
}

#[tokio::test]
async fn without_a_graph_the_mapping_decides() {
    let fx = Fixture::new(models::companies()).await;
    seed_company(&fx.factory).await;

    let mut session = fx.factory.open_session();
    let company = session.find("Company", 1i64).await.unwrap().unwrap();

    assert!(session.is_initialized(&company, Some("phoneNumbers")).unwrap());
    assert!(!session.is_initialized(&company, Some("markets")).unwrap());
    assert!(!session.is_initialized(&company, Some("employees")).unwrap());
}

#[tokio::test]
async fn graph_for_another_entity_is_rejected() {
    let fx = Fixture::new(models::companies()).await;
    let mut session = fx.factory.open_session();

    let graph = EntityGraph::new("Employee").add_attribute("company");
    let err = session
        .find_with("Company", 1i64, &graph, GraphSemantic::Load)
        .await
        .unwrap_err();
    assert!(err.is_illegal_argument());

    let graph = EntityGraph::new("Company").add_attribute("headquarters");
    let err = session
        .find_with("Company", 1i64, &graph, GraphSemantic::Load)
        .await
        .unwrap_err();
    assert!(err.is_illegal_argument());
}

#[tokio::test]
async fn lazy_references_load_in_one_batch() {
    let fx = Fixture::new(models::library()).await;
    models::seed_library(&fx.factory, 5).await;

    let mut session = fx.factory.open_session();
    let books = session
        .create_query("from Book b order by b.id")
        .unwrap()
        .entity_list()
        .await
        .unwrap();
    assert_eq!(books.len(), 5);

    fx.sql.clear();
    for book in &books {
        let author = session.to_one(book, "author").await.unwrap().unwrap();
        assert!(author.is_loaded());
    }

    let statements = fx.sql.take();
    assert_eq!(statements.len(), 1, "{statements:#?}");
    assert!(statements[0].contains(" IN "));
}

#[tokio::test]
async fn uninitialized_references_fail_outside_the_session() {
    let fx = Fixture::new(models::library()).await;
    models::seed_library(&fx.factory, 1).await;

    let mut session = fx.factory.open_session();
    let book = session.find("Book", 1i64).await.unwrap().unwrap();
    session.close().await.unwrap();

    assert!(!book.is_initialized("author").unwrap());
    let err = session.to_one(&book, "author").await.unwrap_err();
    assert!(err.is_illegal_argument());

    let mut other = fx.factory.open_session();
    let err = other.to_one(&book, "author").await.unwrap_err();
    assert!(err.is_lazy_initialization(), "{err}");
}

#[tokio::test]
async fn cached_collection_is_read_without_sql() {
    let fx = Fixture::with(models::people(), |builder| {
        builder.second_level_cache(InMemoryRegionFactory::new());
    })
    .await;

    {
        let schema = fx.factory.schema();
        let mut session = fx.factory.open_session();
        let person = EntityRef::new(schema, "Person").unwrap();
        person.set("id", 1i64).unwrap();
        person.set("name", "Ann").unwrap();
        person.set("age", 41i32).unwrap();
        for id in 1..=2i64 {
            let phone = EntityRef::new(schema, "Phone").unwrap();
            phone.set("id", id).unwrap();
            phone.set("number", format!("555-010{id}")).unwrap();
            phone.set_ref("person", Some(&person)).unwrap();
            person.add_element("phones", &phone).unwrap();
        }
        session.persist(&person).await.unwrap();
        session.flush().await.unwrap();
        session.close().await.unwrap();
    }

    let mut session = fx.factory.open_session();
    let person = session.find("Person", 1i64).await.unwrap().unwrap();
    assert_eq!(session.collection(&person, "phones").await.unwrap().len(), 2);
    session.close().await.unwrap();

    fx.sql.clear();
    let mut session = fx.factory.open_session();
    let person = session.find("Person", 1i64).await.unwrap().unwrap();
    assert_eq!(session.collection(&person, "phones").await.unwrap().len(), 2);
    assert!(fx.sql.count() <= 1, "{:#?}", fx.sql.statements());
    assert!(fx.factory.statistics().second_level_cache_hit_count() > 0);
}

/// Projects 1..=n, each with two tasks and one member.
async fn seed_projects(factory: &SessionFactory, n: i64) {
    let schema = factory.schema();
    let mut session = factory.open_session();
    for id in 1..=n {
        let project = EntityRef::new(schema, "Project").unwrap();
        project.set("id", id).unwrap();
        project.set("name", format!("project {id}")).unwrap();
        session.persist(&project).await.unwrap();

        for i in 0..2 {
            let task = EntityRef::new(schema, "Task").unwrap();
            task.set("id", id * 10 + i).unwrap();
            task.set("title", format!("task {id}.{i}")).unwrap();
            task.set_ref("project", Some(&project)).unwrap();
            session.persist(&task).await.unwrap();
        }

        let member = EntityRef::new(schema, "Member").unwrap();
        member.set("id", id).unwrap();
        member.set("name", format!("member {id}")).unwrap();
        member.set_ref("project", Some(&project)).unwrap();
        session.persist(&member).await.unwrap();
    }
    session.flush().await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn subselect_fetch_initializes_every_owner_at_once() {
    let fx = Fixture::new(models::projects()).await;
    seed_projects(&fx.factory, 3).await;

    let mut session = fx.factory.open_session();
    let projects = session
        .create_query("from Project p where p.id <= 3 order by p.id")
        .unwrap()
        .entity_list()
        .await
        .unwrap();
    assert_eq!(projects.len(), 3);
    assert!(!session.is_initialized(&projects[0], Some("tasks")).unwrap());

    fx.sql.clear();
    let tasks = session.collection(&projects[0], "tasks").await.unwrap();
    assert_eq!(tasks.len(), 2);

    // The owning query is repeated as the restriction of the one load.
    let statements = fx.sql.take();
    assert_eq!(statements.len(), 1, "{statements:#?}");
    assert!(statements[0].matches("SELECT").count() >= 2, "{}", statements[0]);

    for project in &projects[1..] {
        assert!(session.is_initialized(project, Some("tasks")).unwrap());
        assert_eq!(session.collection(project, "tasks").await.unwrap().len(), 2);
    }
    assert_eq!(fx.sql.count(), 0);
}

#[tokio::test]
async fn join_fetched_collection_loads_with_its_owner() {
    let fx = Fixture::new(models::projects()).await;
    seed_projects(&fx.factory, 2).await;

    let mut session = fx.factory.open_session();
    fx.sql.clear();
    let project = session.find("Project", 1i64).await.unwrap().unwrap();

    let statements = fx.sql.take();
    assert_eq!(statements.len(), 1, "{statements:#?}");
    assert!(statements[0].contains("JOIN"), "{}", statements[0]);
    assert!(session.is_initialized(&project, Some("members")).unwrap());

    let members = session.collection(&project, "members").await.unwrap();
    assert_eq!(members.len(), 1);
    let member = members[0].as_entity().unwrap();
    assert_eq!(member.get("name").unwrap(), Value::from("member 1"));
    assert_eq!(fx.sql.count(), 0);
}
