/// Nullable secondary-table tests: all-null rows are never inserted, updates
/// that introduce values become inserts, updates that null everything out
/// become deletes, and absent rows never hide the entity on load.
///
/// Run with: cargo test --test secondary_table_tests
mod common;

use std::sync::Arc;

use common::SharedDb;
use relmap::prelude::*;

fn mapping() -> EntityMapping {
    EntityMapping::new(
        "Account",
        TableMapping::new("account", vec!["id".into()]),
        IdentifierMapping::new("id", "id", DataType::Integer),
    )
    .secondary_table(TableMapping::new("account_details", vec!["account_id".into()]).optional())
    .property(PropertyMapping::new("balance", DataType::Integer).not_null())
    .property(PropertyMapping::new("nickname", DataType::Text).in_table("account_details"))
}

fn setup() -> (SharedDb, Arc<EntityPersister>, Session) {
    let db = SharedDb::new();
    let mut factory = PersisterFactory::new();
    let persister = factory.register(mapping()).unwrap();
    let session = Session::new(db.executor());
    (db, persister, session)
}

#[test]
fn test_insert_skips_all_null_secondary_table() {
    let (db, persister, mut session) = setup();

    let mut state = vec![Value::Integer(100), Value::Null];
    persister
        .insert(Some(Value::Integer(1)), &mut state, "Account", &mut session)
        .unwrap();

    assert_eq!(db.rows("account").len(), 1);
    assert!(db.rows("account_details").is_empty());
    assert!(db.statements_matching("insert into account_details").is_empty());
}

#[test]
fn test_insert_writes_populated_secondary_table() {
    let (db, persister, mut session) = setup();

    let mut state = vec![Value::Integer(100), Value::Text("al".into())];
    persister
        .insert(Some(Value::Integer(1)), &mut state, "Account", &mut session)
        .unwrap();

    let details = db.rows("account_details");
    assert_eq!(details.len(), 1);
    assert_eq!(details[0]["nickname"], Value::Text("al".into()));
    assert_eq!(details[0]["account_id"], Value::Integer(1));
}

#[test]
fn test_update_inserts_secondary_row_that_never_existed() {
    let (db, persister, mut session) = setup();

    let mut state = vec![Value::Integer(100), Value::Null];
    let id = persister
        .insert(Some(Value::Integer(1)), &mut state, "Account", &mut session)
        .unwrap();

    let old = state.clone();
    let mut new_state = vec![Value::Integer(100), Value::Text("al".into())];
    persister
        .update(&id, &mut new_state, Some(&[1]), false, Some(&old), None, "Account", None, &mut session)
        .unwrap();

    // the secondary row did not exist, so an INSERT ran instead of an UPDATE
    assert_eq!(db.statements_matching("insert into account_details").len(), 1);
    assert!(db.statements_matching("update account_details").is_empty());
    assert_eq!(db.rows("account_details")[0]["nickname"], Value::Text("al".into()));
}

#[test]
fn test_update_to_all_null_deletes_secondary_row() {
    let (db, persister, mut session) = setup();

    let mut state = vec![Value::Integer(100), Value::Text("al".into())];
    let id = persister
        .insert(Some(Value::Integer(1)), &mut state, "Account", &mut session)
        .unwrap();
    assert_eq!(db.rows("account_details").len(), 1);

    let old = state.clone();
    let mut new_state = vec![Value::Integer(100), Value::Null];
    persister
        .update(&id, &mut new_state, Some(&[1]), false, Some(&old), None, "Account", None, &mut session)
        .unwrap();

    assert_eq!(db.statements_matching("delete from account_details").len(), 1);
    assert!(db.rows("account_details").is_empty());
}

#[test]
fn test_plain_update_of_existing_secondary_row() {
    let (db, persister, mut session) = setup();

    let mut state = vec![Value::Integer(100), Value::Text("al".into())];
    let id = persister
        .insert(Some(Value::Integer(1)), &mut state, "Account", &mut session)
        .unwrap();

    let old = state.clone();
    let mut new_state = vec![Value::Integer(100), Value::Text("big al".into())];
    persister
        .update(&id, &mut new_state, Some(&[1]), false, Some(&old), None, "Account", None, &mut session)
        .unwrap();

    assert_eq!(db.statements_matching("update account_details").len(), 1);
    assert_eq!(db.rows("account_details")[0]["nickname"], Value::Text("big al".into()));
}

#[test]
fn test_load_outer_joins_absent_secondary_row() {
    let (db, persister, mut session) = setup();

    let mut state = vec![Value::Integer(100), Value::Null];
    let id = persister
        .insert(Some(Value::Integer(1)), &mut state, "Account", &mut session)
        .unwrap();

    let loaded = persister.load(&id, LockOptions::NONE, &mut session).unwrap().unwrap();
    assert_eq!(loaded.state, vec![Value::Integer(100), Value::Null]);

    let select = db.statements_matching("left outer join account_details").pop();
    assert!(select.is_some(), "optional secondary table must join left-outer");
}

#[test]
fn test_delete_removes_both_tables_leaf_first() {
    let (db, persister, mut session) = setup();

    let mut state = vec![Value::Integer(100), Value::Text("al".into())];
    let id = persister
        .insert(Some(Value::Integer(1)), &mut state, "Account", &mut session)
        .unwrap();
    db.clear_log();

    persister.delete(&id, None, "Account", &mut session).unwrap();
    let statements = db.statements();
    assert!(statements[0].contains("delete from account_details"));
    assert!(statements[1].contains("delete from account"));
    assert!(db.rows("account").is_empty());
    assert!(db.rows("account_details").is_empty());
}
