//! The persistence-context collaborator: per-unit-of-work bookkeeping of
//! entity entries, collection handles and natural-id cross references. The
//! persister consumes this; it never owns one.

use std::collections::HashMap;

use crate::core::Value;
use crate::dialect::LockMode;

/// Identity of an entity instance within a unit of work: hierarchy root name
/// plus identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity: String,
    pub id: Value,
}

impl EntityKey {
    pub fn new(entity: impl Into<String>, id: Value) -> Self {
        Self { entity: entity.into(), id }
    }
}

/// What the unit of work knows about one managed instance.
#[derive(Debug, Clone)]
pub struct EntityEntry {
    /// Concrete subclass of the instance.
    pub subclass: String,
    /// State as last read from (or written to) the database; the baseline
    /// for dirty checking.
    pub loaded_state: Option<Vec<Value>>,
    /// Snapshot taken when the instance was scheduled for deletion.
    pub deleted_state: Option<Vec<Value>>,
    pub version: Option<Value>,
    pub lock_mode: LockMode,
    pub modifiable: bool,
    pub row_id: Option<Value>,
}

impl EntityEntry {
    pub fn new(subclass: impl Into<String>, loaded_state: Vec<Value>, version: Option<Value>) -> Self {
        Self {
            subclass: subclass.into(),
            loaded_state: Some(loaded_state),
            deleted_state: None,
            version,
            lock_mode: LockMode::Read,
            modifiable: true,
            row_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub role: String,
    pub key: Value,
}

/// Handle to a lazy collection: enough to key the collection persister
/// without fetching any rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionHandle {
    pub role: String,
    pub key: Value,
    pub initialized: bool,
}

pub trait PersistenceContext {
    fn entry(&self, key: &EntityKey) -> Option<&EntityEntry>;

    fn entry_mut(&mut self, key: &EntityKey) -> Option<&mut EntityEntry>;

    fn add_entry(&mut self, key: EntityKey, entry: EntityEntry);

    fn remove_entry(&mut self, key: &EntityKey) -> Option<EntityEntry>;

    /// Existing collection handle, or a fresh uninitialized one registered
    /// under `key`.
    fn get_or_create_collection(&mut self, key: CollectionKey) -> &mut CollectionHandle;

    fn cache_natural_id(&mut self, entity: &str, natural_id: Vec<Value>, id: Value);

    fn cached_natural_id(&self, entity: &str, natural_id: &[Value]) -> Option<&Value>;

    fn evict_natural_id(&mut self, entity: &str, natural_id: &[Value]);
}

/// Plain in-memory implementation used by default and in tests.
#[derive(Default)]
pub struct MemoryContext {
    entries: HashMap<EntityKey, EntityEntry>,
    collections: HashMap<CollectionKey, CollectionHandle>,
    natural_ids: HashMap<(String, Vec<Value>), Value>,
}

impl PersistenceContext for MemoryContext {
    fn entry(&self, key: &EntityKey) -> Option<&EntityEntry> {
        self.entries.get(key)
    }

    fn entry_mut(&mut self, key: &EntityKey) -> Option<&mut EntityEntry> {
        self.entries.get_mut(key)
    }

    fn add_entry(&mut self, key: EntityKey, entry: EntityEntry) {
        self.entries.insert(key, entry);
    }

    fn remove_entry(&mut self, key: &EntityKey) -> Option<EntityEntry> {
        self.entries.remove(key)
    }

    fn get_or_create_collection(&mut self, key: CollectionKey) -> &mut CollectionHandle {
        self.collections.entry(key.clone()).or_insert_with(|| CollectionHandle {
            role: key.role,
            key: key.key,
            initialized: false,
        })
    }

    fn cache_natural_id(&mut self, entity: &str, natural_id: Vec<Value>, id: Value) {
        self.natural_ids.insert((entity.to_string(), natural_id), id);
    }

    fn cached_natural_id(&self, entity: &str, natural_id: &[Value]) -> Option<&Value> {
        self.natural_ids.get(&(entity.to_string(), natural_id.to_vec()))
    }

    fn evict_natural_id(&mut self, entity: &str, natural_id: &[Value]) {
        self.natural_ids.remove(&(entity.to_string(), natural_id.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_round_trip() {
        let mut ctx = MemoryContext::default();
        let key = EntityKey::new("Account", Value::Integer(1));
        ctx.add_entry(
            key.clone(),
            EntityEntry::new("Account", vec![Value::Integer(100)], Some(Value::Integer(0))),
        );
        assert!(ctx.entry(&key).is_some());
        ctx.entry_mut(&key).unwrap().loaded_state.as_mut().unwrap()[0] = Value::Integer(150);
        assert_eq!(
            ctx.entry(&key).unwrap().loaded_state.as_ref().unwrap()[0],
            Value::Integer(150)
        );
        assert!(ctx.remove_entry(&key).is_some());
        assert!(ctx.entry(&key).is_none());
    }

    #[test]
    fn test_collection_created_once() {
        let mut ctx = MemoryContext::default();
        let key = CollectionKey { role: "Account.transactions".into(), key: Value::Integer(1) };
        ctx.get_or_create_collection(key.clone()).initialized = true;
        assert!(ctx.get_or_create_collection(key).initialized);
    }

    #[test]
    fn test_natural_id_xref() {
        let mut ctx = MemoryContext::default();
        let nid = vec![Value::Text("alice".into())];
        ctx.cache_natural_id("Account", nid.clone(), Value::Integer(7));
        assert_eq!(ctx.cached_natural_id("Account", &nid), Some(&Value::Integer(7)));
        ctx.evict_natural_id("Account", &nid);
        assert!(ctx.cached_natural_id("Account", &nid).is_none());
    }
}
