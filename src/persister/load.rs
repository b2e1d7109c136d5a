//! Read paths: cached loader dispatch per lock mode, second-level cache
//! interplay, snapshot and version selects, and the forced version
//! increment.

use tracing::trace;

use crate::core::{PersistError, Result, Value};
use crate::dialect::{LockMode, LockOptions};
use crate::exec::PreparedSql;
use crate::loader::{LoadedEntity, hydrate};
use crate::persister::EntityPersister;
use crate::session::{EntityEntry, Session};
use crate::sql::Update;

impl EntityPersister {
    /// Load by identifier under the requested lock. Returns `None` when no
    /// row exists; never raises for a mere missing row.
    pub fn load(
        &self,
        id: &Value,
        lock: LockOptions,
        session: &mut Session,
    ) -> Result<Option<LoadedEntity>> {
        let meta = self.metadata();
        meta.check_id(id)?;
        self.flush_pending_batches(session)?;

        // the shared cache can only answer plain reads; pessimistic intent
        // always goes to the database
        if !lock.mode.is_pessimistic()
            && session.cache_mode.is_get_enabled()
            && self.can_read_from_cache()
        {
            let cache_key = self.cache_key(id, session);
            if let Some(entry) = self.cache_get(&cache_key) {
                trace!(entity = %meta.entity_name, %id, "resolved from second-level cache");
                let assembled = self.assemble_cache_entry(&entry)?;
                let loaded = LoadedEntity {
                    entity_name: assembled.subclass,
                    id: id.clone(),
                    state: assembled.state,
                    version: assembled.version,
                };
                self.register_loaded(&loaded, lock.mode, session);
                return Ok(Some(loaded));
            }
        }

        let loader = self.loader_for(lock.mode);
        let found = loader.load(meta, self.dialect(), id, session)?;
        if let Some(loaded) = &found {
            self.register_loaded(loaded, lock.mode, session);
            self.write_through_cache(loaded, session)?;
        }
        Ok(found)
    }

    /// Multi-identifier load: ids are fetched in `IN`-list chunks of the
    /// mapped batch size. Missing ids are simply absent from the result.
    pub fn load_batch(
        &self,
        ids: &[Value],
        lock: LockOptions,
        session: &mut Session,
    ) -> Result<Vec<LoadedEntity>> {
        for id in ids {
            self.metadata().check_id(id)?;
        }
        self.flush_pending_batches(session)?;
        let found =
            self.batch_loader()
                .load_batch(self.metadata(), self.dialect(), ids, lock, session)?;
        for loaded in &found {
            self.register_loaded(loaded, lock.mode, session);
            self.write_through_cache(loaded, session)?;
        }
        Ok(found)
    }

    /// Unique-key lookup on a property mapped `unique`.
    pub fn load_by_unique_key(
        &self,
        property: &str,
        value: &Value,
        session: &mut Session,
    ) -> Result<Option<LoadedEntity>> {
        self.flush_pending_batches(session)?;
        let loader = self.unique_key_loader_for(property)?;
        let found = loader.load(self.metadata(), self.dialect(), value, session)?;
        if let Some(loaded) = &found {
            self.register_loaded(loaded, LockMode::Read, session);
        }
        Ok(found)
    }

    /// Current database state of the row (updatable properties), for
    /// snapshot-based dirty checking and implied locking.
    pub fn database_snapshot(
        &self,
        id: &Value,
        session: &mut Session,
    ) -> Result<Option<Vec<Value>>> {
        let meta = self.metadata();
        meta.check_id(id)?;
        self.flush_pending_batches(session)?;
        trace!(entity = %meta.entity_name, %id, "getting current persistent state");

        let mut stmt = PreparedSql::new(self.statements().snapshot_select.clone());
        stmt.bind_all(meta.identifier.semantic.flatten(id));
        let mut cursor = session.executor().execute_query(&stmt).map_err(|e| {
            self.sql_error(
                &e,
                format!("retrieving snapshot for entity '{}', id {}", meta.entity_name, id),
            )
        })?;
        let mut snapshot: Option<Vec<Value>> = None;
        while let Some(row) = cursor.next_row().map_err(|e| {
            self.sql_error(
                &e,
                format!("retrieving snapshot for entity '{}', id {}", meta.entity_name, id),
            )
        })? {
            if snapshot.is_some() {
                return Err(PersistError::DuplicateIdentifier {
                    entity: meta.entity_name.clone(),
                    id: id.to_string(),
                    rows: 2,
                });
            }
            let hydrated = hydrate(meta, &self.statements().snapshot_layout, &row, Some(id))?;
            snapshot = Some(hydrated.state);
        }
        Ok(snapshot)
    }

    /// Current version of the row; `Some(Value::Null)` signals "row exists"
    /// for unversioned entities. `None` means no row.
    pub fn current_version(&self, id: &Value, session: &mut Session) -> Result<Option<Value>> {
        let meta = self.metadata();
        meta.check_id(id)?;
        self.flush_pending_batches(session)?;

        let mut stmt = PreparedSql::new(self.statements().version_select.clone());
        stmt.bind_all(meta.identifier.semantic.flatten(id));
        let mut cursor = session.executor().execute_query(&stmt).map_err(|e| {
            self.sql_error(
                &e,
                format!("retrieving version for entity '{}', id {}", meta.entity_name, id),
            )
        })?;
        let row = cursor.next_row().map_err(|e| {
            self.sql_error(
                &e,
                format!("retrieving version for entity '{}', id {}", meta.entity_name, id),
            )
        })?;
        match row {
            None => Ok(None),
            Some(row) => {
                if meta.is_versioned() {
                    Ok(Some(row.first().cloned().unwrap_or(Value::Null)))
                } else {
                    Ok(Some(Value::Null))
                }
            }
        }
    }

    /// Bump the version without touching any other column; zero affected
    /// rows is a stale-state conflict.
    pub fn force_version_increment(
        &self,
        id: &Value,
        current_version: &Value,
        session: &mut Session,
    ) -> Result<Value> {
        let meta = self.metadata();
        let version = meta.version.as_ref().ok_or_else(|| {
            PersistError::Mapping(format!(
                "Cannot force a version increment on unversioned entity '{}'",
                meta.entity_name
            ))
        })?;
        let next = crate::core::types::next_version(current_version)?;
        trace!(
            entity = %meta.entity_name, %id, old = %current_version, new = %next,
            "forcing version increment"
        );

        let mut update = Update::new(&meta.topology.table(0).name);
        update
            .add_column(&version.column)
            .add_key_columns(&meta.identifier.columns)
            .set_version_column(&version.column);
        let mut stmt = PreparedSql::new(update.to_statement_string());
        stmt.bind(next.clone());
        stmt.bind_all(meta.identifier.semantic.flatten(id));
        stmt.bind(current_version.clone());

        let rows = session.executor().execute_update(&stmt).map_err(|e| {
            self.sql_error(
                &e,
                format!("incrementing version of entity '{}', id {}", meta.entity_name, id),
            )
        })?;
        if rows != 1 {
            return Err(PersistError::StaleState {
                entity: meta.entity_name.clone(),
                id: id.to_string(),
            });
        }
        if let Some(entry) = session.context_mut().entry_mut(&self.entity_key(id)) {
            entry.version = Some(next.clone());
        }
        Ok(next)
    }

    /// Record a loaded row in the persistence context, including the
    /// natural-id cross reference.
    pub(crate) fn register_loaded(
        &self,
        loaded: &LoadedEntity,
        lock: LockMode,
        session: &mut Session,
    ) {
        let meta = self.metadata();
        let key = self.entity_key(&loaded.id);
        let mut entry =
            EntityEntry::new(loaded.entity_name.clone(), loaded.state.clone(), loaded.version.clone());
        entry.lock_mode = lock;
        entry.modifiable = meta.mutable;
        session.context_mut().add_entry(key, entry);

        if let Some(natural_id) = &meta.natural_id {
            let values: Vec<Value> = natural_id
                .property_indices
                .iter()
                .map(|&i| loaded.state[i].clone())
                .collect();
            if !values.iter().any(Value::is_unfetched) {
                session.context_mut().cache_natural_id(
                    &meta.entity_name,
                    values,
                    loaded.id.clone(),
                );
            }
        }
    }

    fn write_through_cache(&self, loaded: &LoadedEntity, session: &mut Session) -> Result<()> {
        if !session.cache_mode.is_put_enabled() || !self.can_write_to_cache() {
            return Ok(());
        }
        if let Some(entry) = self.build_cache_entry(
            &loaded.entity_name,
            loaded.version.as_ref(),
            &loaded.state,
        )? {
            let cache_key = self.cache_key(&loaded.id, session);
            self.cache_put(cache_key, entry);
        }
        Ok(())
    }
}
