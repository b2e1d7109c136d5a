/// Second-level cache tests: read-through and write-through against the
/// bundled LRU region, cache-mode gating, eviction on delete, entry
/// strategy selection rules.
///
/// Run with: cargo test --test cache_tests
mod common;

use std::sync::Arc;

use common::SharedDb;
use relmap::prelude::*;

fn cached_mapping(layout: CacheLayout) -> EntityMapping {
    EntityMapping::new(
        "Account",
        TableMapping::new("account", vec!["id".into()]),
        IdentifierMapping::new("id", "id", DataType::Integer),
    )
    .property(PropertyMapping::new("balance", DataType::Integer).not_null())
    .property(PropertyMapping::new("owner", DataType::Text))
    .cache(layout)
}

fn setup(mapping: EntityMapping) -> (SharedDb, Arc<EntityPersister>) {
    let db = SharedDb::new();
    let mut factory =
        PersisterFactory::new().cache(Arc::new(LruCacheRegion::new(64)));
    let persister = factory.register(mapping).unwrap();
    (db, persister)
}

fn insert_account(db: &SharedDb, persister: &EntityPersister) -> Value {
    let mut session = Session::new(db.executor());
    let mut state = vec![Value::Integer(100), Value::Text("alice".into())];
    persister
        .insert(Some(Value::Integer(1)), &mut state, "Account", &mut session)
        .unwrap()
}

#[test]
fn test_second_load_served_from_cache() {
    let (db, persister) = setup(cached_mapping(CacheLayout::Standard));
    let id = insert_account(&db, &persister);

    // first load goes to the database and writes through
    let mut first = Session::new(db.executor());
    let loaded = persister.load(&id, LockOptions::NONE, &mut first).unwrap().unwrap();
    assert_eq!(loaded.state[0], Value::Integer(100));

    // a fresh unit of work hits the cache, no SQL at all
    db.clear_log();
    let mut second = Session::new(db.executor());
    let cached = persister.load(&id, LockOptions::NONE, &mut second).unwrap().unwrap();
    assert_eq!(cached.state, loaded.state);
    assert_eq!(cached.version, loaded.version);
    assert!(db.statements().is_empty());
}

#[test]
fn test_cache_mode_ignore_bypasses_cache() {
    let (db, persister) = setup(cached_mapping(CacheLayout::Standard));
    let id = insert_account(&db, &persister);

    let mut warm = Session::new(db.executor());
    persister.load(&id, LockOptions::NONE, &mut warm).unwrap().unwrap();

    db.clear_log();
    let mut ignoring = Session::new(db.executor()).cache_mode(CacheMode::Ignore);
    persister.load(&id, LockOptions::NONE, &mut ignoring).unwrap().unwrap();
    assert_eq!(db.statements_matching("select").len(), 1);
}

#[test]
fn test_pessimistic_load_skips_cache() {
    let (db, persister) = setup(cached_mapping(CacheLayout::Standard));
    let id = insert_account(&db, &persister);

    let mut warm = Session::new(db.executor());
    persister.load(&id, LockOptions::NONE, &mut warm).unwrap().unwrap();

    db.clear_log();
    let mut locking = Session::new(db.executor());
    persister
        .load(&id, LockOptions::new(LockMode::PessimisticWrite), &mut locking)
        .unwrap()
        .unwrap();
    let select = db.statements_matching("select").pop().unwrap();
    assert!(select.contains("for update"));
}

#[test]
fn test_delete_evicts_cache_entry() {
    let (db, persister) = setup(cached_mapping(CacheLayout::Standard));
    let id = insert_account(&db, &persister);

    let mut session = Session::new(db.executor());
    persister.load(&id, LockOptions::NONE, &mut session).unwrap().unwrap();
    persister.delete(&id, None, "Account", &mut session).unwrap();

    db.clear_log();
    let mut after = Session::new(db.executor());
    let found = persister.load(&id, LockOptions::NONE, &mut after).unwrap();
    assert!(found.is_none());
    // the cache did not resurrect the row; a select actually ran
    assert_eq!(db.statements_matching("select").len(), 1);
}

#[test]
fn test_structured_layout_round_trip() {
    let (db, persister) = setup(cached_mapping(CacheLayout::Structured));
    let id = insert_account(&db, &persister);

    let mut first = Session::new(db.executor());
    let loaded = persister.load(&id, LockOptions::NONE, &mut first).unwrap().unwrap();

    db.clear_log();
    let mut second = Session::new(db.executor());
    let cached = persister.load(&id, LockOptions::NONE, &mut second).unwrap().unwrap();
    assert_eq!(cached.state, loaded.state);
    assert!(db.statements().is_empty());
}

#[test]
fn test_reference_layout_requires_immutable_entity() {
    let mut factory = PersisterFactory::new().cache(Arc::new(LruCacheRegion::new(8)));
    let err = factory.register(cached_mapping(CacheLayout::Reference)).unwrap_err();
    assert!(matches!(err, PersistError::Mapping(_)));

    let mut factory = PersisterFactory::new().cache(Arc::new(LruCacheRegion::new(8)));
    assert!(factory
        .register(cached_mapping(CacheLayout::Reference).immutable())
        .is_ok());
}

#[test]
fn test_uncached_mapping_never_touches_region() {
    let (db, persister) = setup(cached_mapping(CacheLayout::Disabled));
    let id = insert_account(&db, &persister);
    assert!(!persister.can_read_from_cache());

    let mut first = Session::new(db.executor());
    persister.load(&id, LockOptions::NONE, &mut first).unwrap().unwrap();
    db.clear_log();
    let mut second = Session::new(db.executor());
    persister.load(&id, LockOptions::NONE, &mut second).unwrap().unwrap();
    assert_eq!(db.statements_matching("select").len(), 1);
}
