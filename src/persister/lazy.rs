//! Lazy-property initialization. Collection attributes resolve to a handle
//! without touching the database; scalar fetch groups are served from the
//! second-level cache when possible, otherwise by the group's select. The
//! entry's loaded/deleted snapshots are patched so the fetched values read
//! as clean afterwards.

use std::sync::OnceLock;

use tracing::trace;

use crate::core::{PersistError, Result, Value};
use crate::exec::PreparedSql;
use crate::meta::mapping::PropertyKind;
use crate::persister::EntityPersister;
use crate::session::{CollectionHandle, CollectionKey, EntityKey, Session};
use crate::sql::HydrationSlot;

/// Outcome of initializing one lazy attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum InitializedValue {
    Scalar(Value),
    Collection(CollectionHandle),
}

impl EntityPersister {
    /// Initialize the lazy property `field` of the managed instance `key`.
    /// The instance must be associated with the unit of work; a detached
    /// instance cannot resolve its identifier or session.
    pub fn initialize_lazy_property(
        &self,
        field: &str,
        key: &EntityKey,
        session: &mut Session,
    ) -> Result<InitializedValue> {
        let meta = self.metadata();
        let i = self.property_index(field)?;
        let p = &meta.properties[i];

        if session.context().entry(key).is_none() {
            return Err(PersistError::LazyInitialization(format!(
                "Entity '{}' id {} is not associated with any unit of work",
                key.entity, key.id
            )));
        }

        // collection attributes short-circuit: hand out the keyed handle,
        // mark the slot initialized, fetch nothing
        if let PropertyKind::Collection { role } = &p.kind {
            let handle = session
                .context_mut()
                .get_or_create_collection(CollectionKey {
                    role: role.clone(),
                    key: key.id.clone(),
                })
                .clone();
            self.patch_entry_slot(key, i, Value::Null, session);
            return Ok(InitializedValue::Collection(handle));
        }

        trace!(entity = %key.entity, id = %key.id, %field, "initializing lazy property");

        // already fetched (e.g. by a write): serve the known value
        if let Some(entry) = session.context().entry(key)
            && let Some(loaded) = &entry.loaded_state
            && !loaded[i].is_unfetched()
        {
            return Ok(InitializedValue::Scalar(loaded[i].clone()));
        }

        if session.cache_mode.is_get_enabled()
            && self.can_read_from_cache()
            && meta.lazy_properties_cacheable
        {
            let cache_key = self.cache_key(&key.id, session);
            if let Some(entry) = self.cache_get(&cache_key) {
                let assembled = self.assemble_cache_entry(&entry)?;
                if !assembled.state[i].is_unfetched() {
                    trace!("initializing lazy properties from second-level cache");
                    let value = assembled.state[i].clone();
                    self.patch_entry_slot(key, i, value.clone(), session);
                    return Ok(InitializedValue::Scalar(value));
                }
            }
        }

        self.initialize_from_datastore(field, i, key, session)
    }

    fn initialize_from_datastore(
        &self,
        field: &str,
        property: usize,
        key: &EntityKey,
        session: &mut Session,
    ) -> Result<InitializedValue> {
        let meta = self.metadata();
        let group = meta.properties[property]
            .lazy_group
            .clone()
            .ok_or_else(|| {
                PersistError::LazyInitialization(format!(
                    "Property '{}' of '{}' is not lazy",
                    field, meta.entity_name
                ))
            })?;
        trace!(%group, "initializing lazy properties from datastore");

        let (sql, layout) = self
            .statements()
            .lazy_selects
            .get(&group)
            .cloned()
            .expect("every fetch group has a generated select");

        self.flush_pending_batches(session)?;
        let mut stmt = PreparedSql::new(sql);
        stmt.bind_all(meta.identifier.semantic.flatten(&key.id));
        let mut cursor = session.executor().execute_query(&stmt).map_err(|e| {
            self.sql_error(
                &e,
                format!(
                    "initializing lazy properties of entity '{}', id {}",
                    meta.entity_name, key.id
                ),
            )
        })?;
        let row = cursor
            .next_row()
            .map_err(|e| {
                self.sql_error(
                    &e,
                    format!(
                        "initializing lazy properties of entity '{}', id {}",
                        meta.entity_name, key.id
                    ),
                )
            })?
            .ok_or_else(|| PersistError::StaleState {
                entity: meta.entity_name.clone(),
                id: key.id.to_string(),
            })?;

        let mut result: Option<Value> = None;
        let mut pos = 0usize;
        for slot in &layout {
            let HydrationSlot::Property { index, span } = slot else {
                continue;
            };
            let columns = &row[pos..pos + span];
            pos += span;
            let value = meta.properties[*index].semantic.assemble(columns);
            // a slot initialized in the meantime (e.g. by a write) keeps its
            // value
            let fresh = session
                .context()
                .entry(key)
                .and_then(|e| e.loaded_state.as_ref())
                .map(|loaded| loaded[*index].is_unfetched())
                .unwrap_or(true);
            if fresh {
                self.patch_entry_slot(key, *index, value.clone(), session);
            }
            if *index == property {
                result = Some(value);
            }
        }
        trace!("done initializing lazy properties");

        result.map(InitializedValue::Scalar).ok_or_else(|| {
            PersistError::LazyInitialization(format!(
                "Fetch group '{}' did not produce a value for '{}'",
                group, field
            ))
        })
    }

    /// Overwrite the unfetched slot in both snapshots so later dirty checks
    /// see the value as clean.
    fn patch_entry_slot(&self, key: &EntityKey, i: usize, value: Value, session: &mut Session) {
        if let Some(entry) = session.context_mut().entry_mut(key) {
            if let Some(loaded) = entry.loaded_state.as_mut() {
                loaded[i] = value.clone();
            }
            if let Some(deleted) = entry.deleted_state.as_mut() {
                deleted[i] = value;
            }
        }
    }
}

/// Explicit lazy-value wrapper: the engine's replacement for interception.
/// Holds the field and owning key, resolves through (persister, session) on
/// first access and caches the result.
#[derive(Debug)]
pub struct LazyValue {
    field: String,
    key: EntityKey,
    resolved: OnceLock<Value>,
}

impl LazyValue {
    pub fn new(field: impl Into<String>, key: EntityKey) -> Self {
        Self { field: field.into(), key, resolved: OnceLock::new() }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// The value, fetching it on first call. Collection attributes cannot be
    /// wrapped here; use the persister directly for those.
    pub fn get(&self, persister: &EntityPersister, session: &mut Session) -> Result<&Value> {
        if let Some(value) = self.resolved.get() {
            return Ok(value);
        }
        let value = match persister.initialize_lazy_property(&self.field, &self.key, session)? {
            InitializedValue::Scalar(value) => value,
            InitializedValue::Collection(_) => {
                return Err(PersistError::LazyInitialization(format!(
                    "'{}' is a collection attribute; resolve it through the persister",
                    self.field
                )));
            }
        };
        Ok(self.resolved.get_or_init(|| value))
    }
}
