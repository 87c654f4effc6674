use pretty_assertions::assert_eq;

use quarry_core::{driver::operation::Transaction, stmt::Type};
use quarry_sql::{
    ast::{
        Assignment, ColumnDef, CreateTable, DeleteStatement, Expr, InsertSource,
        InsertStatement, JdbcParameter, Predicate, UpdateStatement,
    },
    Serializer, Statement,
};

fn serialize(serializer: &Serializer, stmt: impl Into<Statement>) -> quarry_core::Result<String> {
    serializer.serialize(&stmt.into(), &mut Vec::<JdbcParameter>::new())
}

fn insert_person() -> InsertStatement {
    InsertStatement {
        table: "person".into(),
        columns: vec!["name".into()],
        source: InsertSource::Values(vec![vec![Expr::value_param("Ada")]]),
        returning: vec!["id".into()],
    }
}

#[test]
fn insert_reads_back_generated_id() {
    assert_eq!(
        serialize(&Serializer::sqlite(), insert_person()).unwrap(),
        "INSERT INTO person (name) VALUES (?1) RETURNING id;"
    );
    assert_eq!(
        serialize(&Serializer::postgresql(), insert_person()).unwrap(),
        "INSERT INTO person (name) VALUES ($1) RETURNING id;"
    );
    assert_eq!(
        serialize(&Serializer::sqlserver(), insert_person()).unwrap(),
        "INSERT INTO person (name) OUTPUT INSERTED.id VALUES (@p1);"
    );

    let err = serialize(&Serializer::mysql(), insert_person()).unwrap_err();
    assert!(err.is_not_yet_implemented(), "{err}");
}

#[test]
fn insert_multiple_rows() {
    let insert = InsertStatement {
        table: "tag".into(),
        columns: vec!["id".into(), "label".into()],
        source: InsertSource::Values(vec![
            vec![Expr::value_param(1i64), Expr::value_param("a")],
            vec![Expr::value_param(2i64), Expr::value_param("b")],
        ]),
        returning: vec![],
    };

    assert_eq!(
        serialize(&Serializer::mysql(), insert).unwrap(),
        "INSERT INTO tag (id, label) VALUES (?, ?), (?, ?);"
    );
}

#[test]
fn soft_delete_style_update() {
    let update = UpdateStatement {
        table: "person".into(),
        assignments: vec![Assignment::new("deleted", Expr::literal(true))],
        where_: Some(Predicate::eq(
            Expr::unqualified("id"),
            Expr::value_param(7i64),
        )),
    };

    assert_eq!(
        serialize(&Serializer::sqlite(), update).unwrap(),
        "UPDATE person SET deleted = 1 WHERE id = ?1;"
    );
}

#[test]
fn delete_by_id() {
    let delete = DeleteStatement {
        table: "person".into(),
        where_: Some(Predicate::eq(
            Expr::unqualified("id"),
            Expr::value_param(7i64),
        )),
    };

    assert_eq!(
        serialize(&Serializer::postgresql(), delete).unwrap(),
        "DELETE FROM person WHERE id = $1;"
    );
}

fn person_table() -> CreateTable {
    CreateTable {
        name: "person".into(),
        columns: vec![
            ColumnDef {
                name: "id".into(),
                ty: Type::I64,
                not_null: true,
                auto_increment: true,
            },
            ColumnDef {
                name: "name".into(),
                ty: Type::String,
                not_null: false,
                auto_increment: false,
            },
        ],
        primary_key: vec!["id".into()],
        if_not_exists: false,
    }
}

#[test]
fn create_table_per_dialect() {
    assert_eq!(
        serialize(&Serializer::sqlite(), person_table()).unwrap(),
        "CREATE TABLE person (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    name TEXT\n);"
    );
    assert_eq!(
        serialize(&Serializer::postgresql(), person_table()).unwrap(),
        "CREATE TABLE person (\n    id BIGINT GENERATED BY DEFAULT AS IDENTITY,\n    \
         name TEXT,\n    PRIMARY KEY (id)\n);"
    );
    assert_eq!(
        serialize(&Serializer::mysql(), person_table()).unwrap(),
        "CREATE TABLE person (\n    id BIGINT NOT NULL AUTO_INCREMENT,\n    \
         name VARCHAR(255),\n    PRIMARY KEY (id)\n);"
    );
}

#[test]
fn create_table_with_composite_key() {
    let table = CreateTable {
        name: "person_tag".into(),
        columns: vec![
            ColumnDef {
                name: "person_id".into(),
                ty: Type::I64,
                not_null: true,
                auto_increment: false,
            },
            ColumnDef {
                name: "tag".into(),
                ty: Type::String,
                not_null: true,
                auto_increment: false,
            },
        ],
        primary_key: vec!["person_id".into(), "tag".into()],
        if_not_exists: true,
    };

    assert_eq!(
        serialize(&Serializer::sqlite(), table).unwrap(),
        "CREATE TABLE IF NOT EXISTS person_tag (\n    person_id INTEGER NOT NULL,\n    \
         tag TEXT NOT NULL,\n    PRIMARY KEY (person_id, tag)\n);"
    );
}

#[test]
fn transaction_control() {
    let sqlite = Serializer::sqlite();
    assert_eq!(sqlite.serialize_transaction(&Transaction::Start), "BEGIN");
    assert_eq!(sqlite.serialize_transaction(&Transaction::Commit), "COMMIT");
    assert_eq!(
        Serializer::mysql().serialize_transaction(&Transaction::Start),
        "START TRANSACTION"
    );
    assert_eq!(
        Serializer::sqlserver().serialize_transaction(&Transaction::Rollback),
        "ROLLBACK"
    );
}
