//! Schemas mapped by the integration tests.

use quarry::{
    schema::{
        app::{AccessType, Cascade, FetchStyle, IdStrategy, SoftDelete},
        AttributeDef, EntityDef, FilterDef,
    },
    EntityRef, Schema, SessionFactory, Type,
};

/// `Person` owns a cached, lazily loaded bag of `Phone`s and carries a
/// version for optimistic locking.
pub fn people() -> Schema {
    let mut builder = Schema::builder();
    builder
        .filter(FilterDef::new("minAge").param("age", Type::I32))
        .entity(
            EntityDef::new("Person")
                .id("id", Type::I64)
                .basic("name", Type::String)
                .basic("age", Type::I32)
                .attribute(AttributeDef::basic("version", Type::I32).version())
                .attribute(
                    AttributeDef::one_to_many("phones", "Phone")
                        .mapped_by("person")
                        .cascade(Cascade::ALL)
                        .cache(AccessType::ReadWrite),
                )
                .cache(AccessType::ReadWrite)
                .filter("minAge", Some("age >= :age")),
        )
        .entity(
            EntityDef::new("Phone")
                .id("id", Type::I64)
                .basic("number", Type::String)
                .attribute(AttributeDef::many_to_one("person", "Person").lazy())
                .cache(AccessType::ReadWrite),
        );
    builder.build().unwrap()
}

/// `Company` with an eager element collection (`phoneNumbers`), a lazy one
/// (`markets`), a lazy reference (`location`), and lazy `employees`.
pub fn companies() -> Schema {
    let mut builder = Schema::builder();
    builder
        .entity(
            EntityDef::new("Location")
                .id("id", Type::I64)
                .basic("address", Type::String),
        )
        .entity(
            EntityDef::new("Company")
                .id("id", Type::I64)
                .basic("name", Type::String)
                .attribute(AttributeDef::many_to_one("location", "Location").lazy())
                .attribute(AttributeDef::element_collection("markets", Type::String))
                .attribute(AttributeDef::element_collection("phoneNumbers", Type::String).eager())
                .attribute(AttributeDef::one_to_many("employees", "Employee").mapped_by("company")),
        )
        .entity(
            EntityDef::new("Employee")
                .id("id", Type::I64)
                .basic("name", Type::String)
                .attribute(AttributeDef::many_to_one("company", "Company").lazy()),
        );
    builder.build().unwrap()
}

/// `Book`s referencing `Author`s, which are batch fetched ten at a time.
pub fn library() -> Schema {
    let mut builder = Schema::builder();
    builder
        .entity(
            EntityDef::new("Author")
                .id("id", Type::I64)
                .basic("name", Type::String)
                .batch_size(10),
        )
        .entity(
            EntityDef::new("Book")
                .id("id", Type::I64)
                .basic("title", Type::String)
                .basic("available", Type::Bool)
                .attribute(AttributeDef::many_to_one("author", "Author").lazy()),
        );
    builder.build().unwrap()
}

/// `Document` keeps its `tags` in order; removed tags are marked deleted,
/// as are removed documents.
pub fn documents() -> Schema {
    let mut builder = Schema::builder();
    builder.entity(
        EntityDef::new("Document")
            .id_generated("id", Type::I64, IdStrategy::Identity)
            .basic("title", Type::String)
            .attribute(
                AttributeDef::element_collection("tags", Type::String)
                    .order_column("position")
                    .soft_delete(SoftDelete::default()),
            )
            .soft_delete(SoftDelete::default()),
    );
    builder.build().unwrap()
}

/// `Project` keeps unordered `labels` that are marked deleted on removal,
/// loads its `tasks` by subselect, and joins its `members` into its own
/// load.
pub fn projects() -> Schema {
    let mut builder = Schema::builder();
    builder
        .entity(
            EntityDef::new("Project")
                .id("id", Type::I64)
                .basic("name", Type::String)
                .attribute(
                    AttributeDef::element_collection("labels", Type::String)
                        .soft_delete(SoftDelete::default()),
                )
                .attribute(
                    AttributeDef::one_to_many("tasks", "Task")
                        .mapped_by("project")
                        .fetch_style(FetchStyle::Subselect),
                )
                .attribute(
                    AttributeDef::one_to_many("members", "Member")
                        .mapped_by("project")
                        .fetch_style(FetchStyle::Join),
                ),
        )
        .entity(
            EntityDef::new("Task")
                .id("id", Type::I64)
                .basic("title", Type::String)
                .attribute(AttributeDef::many_to_one("project", "Project").lazy()),
        )
        .entity(
            EntityDef::new("Member")
                .id("id", Type::I64)
                .basic("name", Type::String)
                .attribute(AttributeDef::many_to_one("project", "Project").lazy()),
        );
    builder.build().unwrap()
}

/// `Account` rows belong to a tenant.
pub fn accounts() -> Schema {
    let mut builder = Schema::builder();
    builder.entity(
        EntityDef::new("Account")
            .id_generated("id", Type::Uuid, IdStrategy::Uuid)
            .basic("name", Type::String)
            .attribute(AttributeDef::basic("tenantId", Type::String).column("tenant_id").tenant()),
    );
    builder.build().unwrap()
}

/// Persists `Author`s 1..=n, each with one `Book` of the same id.
pub async fn seed_library(factory: &SessionFactory, n: i64) {
    let schema = factory.schema();
    let mut session = factory.open_session();
    for id in 1..=n {
        let author = EntityRef::new(schema, "Author").unwrap();
        author.set("id", id).unwrap();
        author.set("name", format!("author {id}")).unwrap();

        let book = EntityRef::new(schema, "Book").unwrap();
        book.set("id", id).unwrap();
        book.set("title", format!("book {id}")).unwrap();
        book.set("available", id % 2 == 0).unwrap();
        book.set_ref("author", Some(&author)).unwrap();

        session.persist(&author).await.unwrap();
        session.persist(&book).await.unwrap();
    }
    session.flush().await.unwrap();
    session.close().await.unwrap();
}
