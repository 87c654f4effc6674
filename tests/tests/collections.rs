use pretty_assertions::assert_eq;
use quarry::{EntityRef, SessionFactory, Value};
use tests::{models, Fixture};

async fn seed_document(factory: &SessionFactory, tags: &[&str]) -> Value {
    let mut session = factory.open_session();
    let document = EntityRef::new(factory.schema(), "Document").unwrap();
    document.set("title", "Release notes").unwrap();
    for tag in tags {
        document.add_element("tags", *tag).unwrap();
    }
    session.persist(&document).await.unwrap();

    // Identity keys are assigned by the insert.
    let id = document.id();
    assert!(!id.is_null());

    session.flush().await.unwrap();
    session.close().await.unwrap();
    id
}

#[tokio::test]
async fn removing_from_an_ordered_soft_deleted_collection() {
    let fx = Fixture::new(models::documents()).await;
    let id = seed_document(&fx.factory, &["a", "b", "c"]).await;

    let mut session = fx.factory.open_session();
    let document = session.find("Document", id.clone()).await.unwrap().unwrap();
    assert!(session.remove_element(&document, "tags", "b").await.unwrap());

    fx.sql.clear();
    session.flush().await.unwrap();

    let statements = fx.sql.take();
    assert_eq!(statements.len(), 2, "{statements:#?}");
    assert!(statements[0].starts_with("UPDATE"), "{}", statements[0]);
    assert!(statements[1].starts_with("INSERT"), "{}", statements[1]);
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let document = session.find("Document", id).await.unwrap().unwrap();
    let tags = session.collection(&document, "tags").await.unwrap();
    let tags: Vec<_> = tags.iter().map(|tag| tag.as_value().unwrap().clone()).collect();
    assert_eq!(tags, vec![Value::from("a"), Value::from("c")]);
}

#[tokio::test]
async fn soft_deleted_rows_are_hidden() {
    let fx = Fixture::new(models::documents()).await;
    let id = seed_document(&fx.factory, &["draft"]).await;

    let mut session = fx.factory.open_session();
    let document = session.find("Document", id.clone()).await.unwrap().unwrap();
    session.remove(&document).await.unwrap();

    fx.sql.clear();
    session.flush().await.unwrap();
    let statements = fx.sql.take();
    assert!(statements.iter().all(|sql| !sql.starts_with("DELETE")), "{statements:#?}");
    session.clear();

    assert!(session.find("Document", id).await.unwrap().is_none());
    let rows = session.create_query("from Document").unwrap().list().await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn appended_elements_keep_their_position() {
    let fx = Fixture::new(models::documents()).await;
    let id = seed_document(&fx.factory, &["x"]).await;

    let mut session = fx.factory.open_session();
    let document = session.find("Document", id.clone()).await.unwrap().unwrap();
    session.add_element(&document, "tags", "y").await.unwrap();
    session.add_element(&document, "tags", "z").await.unwrap();
    session.flush().await.unwrap();
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let document = session.find("Document", id).await.unwrap().unwrap();
    let tags = session.collection(&document, "tags").await.unwrap();
    let tags: Vec<_> = tags.iter().map(|tag| tag.as_value().unwrap().clone()).collect();
    assert_eq!(tags, vec![Value::from("x"), Value::from("y"), Value::from("z")]);
}

#[tokio::test]
async fn removing_one_duplicate_from_a_bag_keeps_the_other() {
    let fx = Fixture::new(models::companies()).await;
    let mut session = fx.factory.open_session();
    let company = EntityRef::new(fx.factory.schema(), "Company").unwrap();
    company.set("id", 1i64).unwrap();
    company.set("name", "Acme").unwrap();
    for market in ["eu", "eu", "us"] {
        company.add_element("markets", market).unwrap();
    }
    session.persist(&company).await.unwrap();
    session.flush().await.unwrap();
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let company = session.find("Company", 1i64).await.unwrap().unwrap();
    assert!(session.remove_element(&company, "markets", "eu").await.unwrap());

    fx.sql.clear();
    session.flush().await.unwrap();

    // The bag is rewritten: one delete, then the remaining rows.
    let statements = fx.sql.take();
    assert_eq!(statements.len(), 2, "{statements:#?}");
    assert!(statements[0].starts_with("DELETE"), "{}", statements[0]);
    assert!(statements[1].starts_with("INSERT"), "{}", statements[1]);
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let company = session.find("Company", 1i64).await.unwrap().unwrap();
    let markets = session.collection(&company, "markets").await.unwrap();
    let markets: Vec<_> = markets.iter().map(|market| market.as_value().unwrap().clone()).collect();
    assert_eq!(markets.len(), 2, "{markets:?}");
    assert_eq!(markets.iter().filter(|market| **market == Value::from("eu")).count(), 1);
    assert!(markets.contains(&Value::from("us")));
}

#[tokio::test]
async fn removing_from_an_unordered_soft_deleted_collection() {
    let fx = Fixture::new(models::projects()).await;
    let mut session = fx.factory.open_session();
    let project = EntityRef::new(fx.factory.schema(), "Project").unwrap();
    project.set("id", 1i64).unwrap();
    project.set("name", "Apollo").unwrap();
    project.add_element("labels", "alpha").unwrap();
    project.add_element("labels", "beta").unwrap();
    session.persist(&project).await.unwrap();
    session.flush().await.unwrap();
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let project = session.find("Project", 1i64).await.unwrap().unwrap();
    assert!(session.remove_element(&project, "labels", "alpha").await.unwrap());

    fx.sql.clear();
    session.flush().await.unwrap();

    let statements = fx.sql.take();
    assert_eq!(statements.len(), 1, "{statements:#?}");
    assert!(statements[0].starts_with("UPDATE"), "{}", statements[0]);
    assert!(statements[0].contains("deleted"), "{}", statements[0]);
    session.close().await.unwrap();

    let mut session = fx.factory.open_session();
    let project = session.find("Project", 1i64).await.unwrap().unwrap();
    let labels = session.collection(&project, "labels").await.unwrap();
    let labels: Vec<_> = labels.iter().map(|label| label.as_value().unwrap().clone()).collect();
    assert_eq!(labels, vec![Value::from("beta")]);
}
