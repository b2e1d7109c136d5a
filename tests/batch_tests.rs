/// Statement-batching tests: delayed batches flush before dependent reads,
/// row counts are verified per batch position, identity inserts never batch.
///
/// Run with: cargo test --test batch_tests
mod common;

use std::sync::Arc;

use common::SharedDb;
use relmap::prelude::*;

fn event_mapping() -> EntityMapping {
    EntityMapping::new(
        "Event",
        TableMapping::new("event", vec!["id".into()]),
        IdentifierMapping::new("id", "id", DataType::Integer),
    )
    .property(PropertyMapping::new("payload", DataType::Text))
}

fn setup(mapping: EntityMapping) -> (SharedDb, Arc<EntityPersister>, Session) {
    let db = SharedDb::new();
    let mut factory = PersisterFactory::new();
    let persister = factory.register(mapping).unwrap();
    let session = Session::new(db.executor()).batch_size(10);
    (db, persister, session)
}

#[test]
fn test_batched_inserts_flush_before_read() {
    let (db, persister, mut session) = setup(event_mapping());

    for i in 1..=3i64 {
        let mut state = vec![Value::Text(format!("e{}", i))];
        persister
            .insert(Some(Value::Integer(i)), &mut state, "Event", &mut session)
            .unwrap();
    }
    // nothing has hit the store yet
    assert!(db.rows("event").is_empty());
    assert!(session.has_pending_batches());

    // a read depending on the inserts forces the flush first
    let loaded = persister
        .load(&Value::Integer(2), LockOptions::NONE, &mut session)
        .unwrap()
        .unwrap();
    assert_eq!(loaded.state[0], Value::Text("e2".into()));
    assert_eq!(db.rows("event").len(), 3);
    assert!(!session.has_pending_batches());

    // all three inserts executed before the select
    let statements = db.statements();
    let select_pos = statements.iter().position(|s| s.starts_with("select")).unwrap();
    let insert_count =
        statements[..select_pos].iter().filter(|s| s.contains("insert into event")).count();
    assert_eq!(insert_count, 3);
}

#[test]
fn test_batch_flushes_only_once() {
    let (db, persister, mut session) = setup(event_mapping());

    let mut state = vec![Value::Text("e1".into())];
    persister
        .insert(Some(Value::Integer(1)), &mut state, "Event", &mut session)
        .unwrap();

    persister.load(&Value::Integer(1), LockOptions::NONE, &mut session).unwrap();
    db.clear_log();
    persister.load(&Value::Integer(1), LockOptions::NONE, &mut session).unwrap();
    assert!(db.statements_matching("insert into event").is_empty());
}

#[test]
fn test_batched_update_conflict_surfaces_at_flush() {
    let (db, persister, mut session) = setup(event_mapping());

    let mut state = vec![Value::Text("e1".into())];
    persister
        .insert(Some(Value::Integer(1)), &mut state, "Event", &mut session)
        .unwrap();
    persister.load(&Value::Integer(1), LockOptions::NONE, &mut session).unwrap();

    // an update against a row that does not exist rides the batch quietly...
    let old = vec![Value::Text("e1".into())];
    let mut new_state = vec![Value::Text("e9".into())];
    persister
        .update(
            &Value::Integer(999),
            &mut new_state,
            Some(&[0]),
            false,
            Some(&old),
            None,
            "Event",
            None,
            &mut session,
        )
        .unwrap();
    assert!(session.has_pending_batches());

    // ...and the zero row count turns into a stale-state failure at flush
    let err = persister
        .load(&Value::Integer(1), LockOptions::NONE, &mut session)
        .unwrap_err();
    assert!(matches!(err, PersistError::StaleState { .. }));
    assert!(!session.has_pending_batches());
    let _ = db;
}

#[test]
fn test_versioned_entity_updates_not_batched_by_default() {
    let mapping = event_mapping()
        .property(PropertyMapping::new("version", DataType::Integer).not_null())
        .version(VersionMapping::new("version", "version", DataType::Integer));
    let (db, persister, mut session) = setup(mapping);

    let mut state = vec![Value::Text("e1".into()), Value::Null];
    let id = persister
        .insert(Some(Value::Integer(1)), &mut state, "Event", &mut session)
        .unwrap();
    // inserts may still batch; flush them through a read
    persister.load(&id, LockOptions::NONE, &mut session).unwrap();

    let old = state.clone();
    let mut new_state = vec![Value::Text("e2".into()), Value::Integer(0)];
    persister
        .update(
            &id,
            &mut new_state,
            Some(&[0]),
            false,
            Some(&old),
            Some(&Value::Integer(0)),
            "Event",
            None,
            &mut session,
        )
        .unwrap();

    // the versioned update executed immediately, no pending batch
    assert!(!session.has_pending_batches());
    assert_eq!(db.rows("event")[0]["version"], Value::Integer(1));
}

#[test]
fn test_identity_inserts_never_batch() {
    let mapping = EntityMapping::new(
        "Ticket",
        TableMapping::new("ticket", vec!["id".into()]),
        IdentifierMapping::new("id", "id", DataType::Integer).generation(IdGeneration::Identity),
    )
    .property(PropertyMapping::new("subject", DataType::Text));
    let (db, persister, mut session) = setup(mapping);

    let mut state = vec![Value::Text("help".into())];
    let id = persister.insert(None, &mut state, "Ticket", &mut session).unwrap();
    assert_eq!(id, Value::Integer(1));
    // the generated key forced immediate execution
    assert!(!session.has_pending_batches());
    assert_eq!(db.rows("ticket").len(), 1);
    assert_eq!(db.rows("ticket")[0]["id"], Value::Integer(1));
}
