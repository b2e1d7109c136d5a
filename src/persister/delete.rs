//! Delete path: leaf tables first so foreign keys hold, cascade-delete
//! tables skipped, and value-keyed WHERE clauses reconstructed from the
//! loaded snapshot when ALL/DIRTY locking runs without a version column.

use tracing::trace;

use crate::core::{PersistError, Result, Value};
use crate::persister::EntityPersister;
use crate::persister::statements::generate_deletes_by_values;
use crate::session::Session;

impl EntityPersister {
    /// Remove one instance. `version` is the expected current version for
    /// versioned entities; unversioned ALL/DIRTY mappings instead rebuild the
    /// loaded snapshot from the persistence context to key the deletes by
    /// value.
    pub fn delete(
        &self,
        id: &Value,
        version: Option<&Value>,
        entity: &str,
        session: &mut Session,
    ) -> Result<()> {
        let meta = self.metadata();
        let stmts = self.statements().for_entity(entity).ok_or_else(|| {
            PersistError::Mapping(format!(
                "'{}' is not part of the '{}' hierarchy",
                entity, meta.entity_name
            ))
        })?;
        meta.check_id(id)?;

        trace!(entity = %meta.entity_name, %id, "deleting entity");
        if let Some(version) = version {
            trace!(%version, "version");
        }

        // implied optimistic locking: no version column, so the loaded state
        // becomes the lock token
        let implied_locking = !meta.is_versioned() && meta.optimistic_lock.is_all_or_dirty();
        let loaded_state: Option<Vec<Value>> = if implied_locking {
            let key = self.entity_key(id);
            session
                .context()
                .entry(&key)
                .and_then(|entry| entry.loaded_state.clone())
        } else {
            None
        };

        let delete_strings: Vec<String> = match &loaded_state {
            Some(loaded) => generate_deletes_by_values(meta, entity, loaded)?,
            None => stmts.deletes.clone(),
        };

        let cascade_enabled = self.dialect().supports_cascade_delete();
        for position in (0..stmts.write_tables.len()).rev() {
            let j = stmts.write_tables[position];
            if cascade_enabled && meta.topology.table(j).cascade_delete {
                trace!(table = %meta.topology.table(j).name, "delete handled by foreign key constraint");
                continue;
            }
            self.delete_row(
                entity,
                id,
                version,
                position,
                j,
                &delete_strings[position],
                loaded_state.as_deref(),
                session,
            )?;
        }

        // the unit of work and the shared cache both stop knowing this row
        let key = self.entity_key(id);
        session.context_mut().remove_entry(&key);
        if self.can_write_to_cache() {
            let cache_key = self.cache_key(id, session);
            self.cache_evict(&cache_key);
        }
        Ok(())
    }
}
