//! The entity persister: owns the metadata model and the generated SQL, and
//! exposes the CRUD, lazy-loading, dirty-checking and natural-id operations
//! for one entity hierarchy. A persister holds no per-call state and is
//! shared across units of work; the only mutable members are append-only
//! loader caches.

pub mod delete;
pub mod dirty;
pub mod insert;
pub mod lazy;
pub mod load;
pub mod natural_id;
pub mod statements;
pub mod update;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::cache::{CacheAccess, CacheEntry, CacheEntryStrategy, CacheKey, select_strategy};
use crate::cache::entry::AssembledEntry;
use crate::core::{PersistError, Result, SemanticType, Value};
use crate::dialect::{Dialect, LockMode};
use crate::exec::{BatchKey, Expectation, ExpectationOutcome, PreparedSql, SqlFailure};
use crate::loader::{BatchEntityLoader, EntityLoader, UniqueKeyLoader};
use crate::meta::{EntityMapping, EntityMetadata, Selectable};
use crate::session::{EntityKey, Session};

pub use statements::StatementSet;

pub struct EntityPersister {
    meta: Arc<EntityMetadata>,
    dialect: Arc<dyn Dialect>,
    cache: Option<Arc<dyn CacheAccess>>,
    cache_entry_strategy: Option<Box<dyn CacheEntryStrategy>>,
    statements: StatementSet,
    /// Lazily populated per-lock-mode loaders; a race may build a loader
    /// twice, the last insert wins and both are equivalent.
    loaders: RwLock<HashMap<LockMode, Arc<EntityLoader>>>,
    unique_key_loaders: RwLock<HashMap<String, Arc<UniqueKeyLoader>>>,
    batch_loader: BatchEntityLoader,
    /// Cached natural-id -> pk statement, valid only when the natural id is
    /// provably non-nullable.
    natural_id_query: RwLock<Option<Arc<String>>>,
}

impl std::fmt::Debug for EntityPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityPersister")
            .field("entity", &self.meta.entity_name)
            .finish_non_exhaustive()
    }
}

impl EntityPersister {
    pub fn new(
        mapping: EntityMapping,
        dialect: Arc<dyn Dialect>,
        cache: Option<Arc<dyn CacheAccess>>,
    ) -> Result<Self> {
        let meta = EntityMetadata::build(mapping, dialect.as_ref())?;
        let statements = StatementSet::build(&meta, dialect.as_ref())?;
        let cache_entry_strategy = select_strategy(&meta)?;
        let batch_loader = BatchEntityLoader::new(meta.batch_size);
        Ok(Self {
            meta: Arc::new(meta),
            dialect,
            cache,
            cache_entry_strategy,
            statements,
            loaders: RwLock::new(HashMap::new()),
            unique_key_loaders: RwLock::new(HashMap::new()),
            batch_loader,
            natural_id_query: RwLock::new(None),
        })
    }

    pub fn entity_name(&self) -> &str {
        &self.meta.entity_name
    }

    pub fn metadata(&self) -> &EntityMetadata {
        &self.meta
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn statements(&self) -> &StatementSet {
        &self.statements
    }

    pub fn entity_key(&self, id: &Value) -> EntityKey {
        EntityKey::new(self.meta.entity_name.clone(), id.clone())
    }

    // ------------------------------------------------------------------
    // Query-translator contract: column/type metadata by property path
    // ------------------------------------------------------------------

    /// Alias-qualified read expressions for a property, for consumption by
    /// an external query translator.
    pub fn to_columns(&self, property: &str) -> Result<Vec<String>> {
        if property == self.meta.identifier.property_name {
            let alias = self.meta.table_alias(0);
            return Ok(self
                .meta
                .identifier
                .columns
                .iter()
                .map(|c| format!("{}.{}", alias, c))
                .collect());
        }
        let i = self.property_index(property)?;
        let p = &self.meta.properties[i];
        let alias = self.meta.table_alias(p.table_index);
        Ok(p.selectables
            .iter()
            .map(|s| s.read_template().replace("{alias}", &alias))
            .collect())
    }

    pub fn to_type(&self, property: &str) -> Result<&SemanticType> {
        if property == self.meta.identifier.property_name {
            return Ok(&self.meta.identifier.semantic);
        }
        let i = self.property_index(property)?;
        Ok(&self.meta.properties[i].semantic)
    }

    pub(crate) fn property_index(&self, property: &str) -> Result<usize> {
        self.meta.property_index(property).ok_or_else(|| {
            PersistError::Mapping(format!(
                "Entity '{}' has no property '{}'",
                self.meta.entity_name, property
            ))
        })
    }

    // ------------------------------------------------------------------
    // Error translation and row-count checks
    // ------------------------------------------------------------------

    pub(crate) fn sql_error(&self, failure: &SqlFailure, context: impl Into<String>) -> PersistError {
        PersistError::Sql {
            kind: self.dialect.translate(failure),
            context: context.into(),
            message: failure.to_string(),
        }
    }

    /// Verify an affected-row count. `Ok(true)` means the expected row was
    /// hit; `Ok(false)` means it was legitimately absent (nullable secondary
    /// table). Zero rows elsewhere is a stale-state conflict, more than one
    /// is a duplicate identifier.
    pub(crate) fn check(
        &self,
        rows: u64,
        id: &Value,
        nullable_table: bool,
        expectation: Expectation,
    ) -> Result<bool> {
        match expectation.verify(rows) {
            ExpectationOutcome::Met => Ok(true),
            ExpectationOutcome::TooFew => {
                if nullable_table {
                    Ok(false)
                } else {
                    Err(PersistError::StaleState {
                        entity: self.meta.entity_name.clone(),
                        id: id.to_string(),
                    })
                }
            }
            ExpectationOutcome::TooMany(n) => Err(PersistError::DuplicateIdentifier {
                entity: self.meta.entity_name.clone(),
                id: id.to_string(),
                rows: n,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Dehydration: marshal a state array onto a prepared statement
    // ------------------------------------------------------------------

    /// Bind the included properties of table `j` in generated-column order:
    /// ordinary columns, then the key (id or row-id surrogate), with LOB
    /// parameters always bound after everything else on inserts and after
    /// the other SET parameters on updates.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn dehydrate(
        &self,
        entity: &str,
        state: &[Value],
        include: &[bool],
        j: usize,
        id: Option<&Value>,
        row_id: Option<&Value>,
        is_update: bool,
        stmt: &mut PreparedSql,
    ) {
        let meta = &self.meta;
        let lobs_last = self.dialect.requires_lobs_last();
        for (i, p) in meta.properties.iter().enumerate() {
            if include[i]
                && meta.is_property_of_table(i, j)
                && meta.is_property_of_entity(i, entity)
                && !(lobs_last && meta.lob_properties.contains(&i))
            {
                bind_property(stmt, p, &state[i]);
            }
        }
        if !is_update && let Some(id) = id {
            stmt.bind_all(meta.identifier.semantic.flatten(id));
        }
        if lobs_last {
            for &i in &meta.lob_properties {
                if include[i]
                    && meta.is_property_of_table(i, j)
                    && meta.is_property_of_entity(i, entity)
                {
                    bind_property(stmt, &meta.properties[i], &state[i]);
                }
            }
        }
        if is_update {
            match row_id {
                Some(row_id) => {
                    stmt.bind(row_id.clone());
                }
                None => {
                    if let Some(id) = id {
                        stmt.bind_all(meta.identifier.semantic.flatten(id));
                    }
                }
            }
        }
    }

    /// Old-value lock parameters for ALL/DIRTY styles, following the WHERE
    /// rendering exactly: only non-null columns bind.
    pub(crate) fn bind_lock_values(
        &self,
        entity: &str,
        include_in_where: &[bool],
        j: usize,
        old_state: &[Value],
        stmt: &mut PreparedSql,
    ) {
        let meta = &self.meta;
        let versionability = meta.versionability();
        for (i, p) in meta.properties.iter().enumerate() {
            if include_in_where[i]
                && meta.is_property_of_table(i, j)
                && meta.is_property_of_entity(i, entity)
                && versionability[i]
            {
                let nullness = p.semantic.column_nullness(&old_state[i]);
                let values = p.semantic.flatten(&old_state[i]);
                for ((s, non_null), v) in p.selectables.iter().zip(nullness).zip(values) {
                    if s.as_column().is_some() && non_null {
                        stmt.bind(v);
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    pub(crate) fn batch_key(&self, op: &str, expectation: Expectation) -> BatchKey {
        BatchKey::new(format!("{}#{}", self.meta.entity_name, op), expectation)
    }

    /// Whether update/delete statements of this entity may ride a delayed
    /// batch under the session's settings.
    pub(crate) fn is_batchable(&self, session: &Session) -> bool {
        use crate::meta::mapping::OptimisticLockStyle;
        self.meta.optimistic_lock == OptimisticLockStyle::None
            || !self.meta.is_versioned()
            || session.batch_versioned_data
    }

    /// Execute every pending batch of the session, verifying each member's
    /// row count. Any failure aborts the owning batch wholesale before the
    /// error propagates.
    pub fn flush_pending_batches(&self, session: &mut Session) -> Result<()> {
        for key in session.take_pending_batches() {
            trace!(batch = %key.name, "flushing statement batch");
            let counts = match session.executor().execute_batch(&key) {
                Ok(counts) => counts,
                Err(e) => {
                    session.executor().abort_batch(&key);
                    return Err(self.sql_error(&e, format!("executing batch '{}'", key.name)));
                }
            };
            for (position, rows) in counts.iter().enumerate() {
                match key.expectation.verify(*rows) {
                    ExpectationOutcome::Met => {}
                    ExpectationOutcome::TooFew => {
                        return Err(PersistError::StaleState {
                            entity: self.meta.entity_name.clone(),
                            id: format!("batch '{}' position {}", key.name, position),
                        });
                    }
                    ExpectationOutcome::TooMany(n) => {
                        return Err(PersistError::DuplicateIdentifier {
                            entity: self.meta.entity_name.clone(),
                            id: format!("batch '{}' position {}", key.name, position),
                            rows: n,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loader caches: at-most-once computation per key is not required,
    // duplicate storage of an equivalent loader is harmless
    // ------------------------------------------------------------------

    pub(crate) fn loader_for(&self, mode: LockMode) -> Arc<EntityLoader> {
        let mode = self.downgrade_lock(mode);
        if let Ok(loaders) = self.loaders.read()
            && let Some(loader) = loaders.get(&mode)
        {
            return Arc::clone(loader);
        }
        let lock = crate::dialect::LockOptions::new(mode);
        let loader = Arc::new(EntityLoader::new(&self.meta, self.dialect.as_ref(), lock));
        match self.loaders.write() {
            Ok(mut loaders) => Arc::clone(loaders.entry(mode).or_insert(loader)),
            Err(_) => loader,
        }
    }

    /// Dialects that cannot combine `for update` with outer joins fall back
    /// to the plain read loader; the pessimistic intent is dropped rather
    /// than rendered invalid.
    fn downgrade_lock(&self, mode: LockMode) -> LockMode {
        if mode.is_pessimistic()
            && !self.dialect.supports_outer_join_for_update()
            && self.has_outer_joins()
        {
            return LockMode::Read;
        }
        mode
    }

    fn has_outer_joins(&self) -> bool {
        use crate::meta::JoinKind;
        let topology = self.meta.topology.as_ref();
        (1..topology.table_span()).any(|j| {
            topology.join_kind(j, true, &std::collections::HashSet::new()) == JoinKind::LeftOuter
        })
    }

    pub(crate) fn unique_key_loader_for(&self, property: &str) -> Result<Arc<UniqueKeyLoader>> {
        if let Ok(loaders) = self.unique_key_loaders.read()
            && let Some(loader) = loaders.get(property)
        {
            return Ok(Arc::clone(loader));
        }
        let i = self.property_index(property)?;
        if !self.meta.properties[i].unique {
            return Err(PersistError::Mapping(format!(
                "Property '{}' of '{}' is not mapped unique",
                property, self.meta.entity_name
            )));
        }
        let loader = Arc::new(UniqueKeyLoader::new(&self.meta, self.dialect.as_ref(), i));
        match self.unique_key_loaders.write() {
            Ok(mut loaders) => {
                Ok(Arc::clone(loaders.entry(property.to_string()).or_insert(loader)))
            }
            Err(_) => Ok(loader),
        }
    }

    pub(crate) fn batch_loader(&self) -> &BatchEntityLoader {
        &self.batch_loader
    }

    pub(crate) fn natural_id_query_cache(&self) -> &RwLock<Option<Arc<String>>> {
        &self.natural_id_query
    }

    // ------------------------------------------------------------------
    // Second-level cache
    // ------------------------------------------------------------------

    pub fn can_read_from_cache(&self) -> bool {
        self.cache.is_some() && self.cache_entry_strategy.is_some()
    }

    pub fn can_write_to_cache(&self) -> bool {
        self.can_read_from_cache()
    }

    pub fn cache_key(&self, id: &Value, session: &Session) -> CacheKey {
        crate::cache::generate_cache_key(id, &self.meta.navigable_role, session.tenant_id())
    }

    pub fn build_cache_entry(
        &self,
        subclass: &str,
        version: Option<&Value>,
        state: &[Value],
    ) -> Result<Option<CacheEntry>> {
        match &self.cache_entry_strategy {
            Some(strategy) => strategy.disassemble(&self.meta, subclass, version, state),
            None => Ok(None),
        }
    }

    pub fn assemble_cache_entry(&self, entry: &CacheEntry) -> Result<AssembledEntry> {
        let strategy = self.cache_entry_strategy.as_ref().ok_or_else(|| {
            PersistError::Mapping(format!(
                "Entity '{}' is not cacheable",
                self.meta.entity_name
            ))
        })?;
        strategy.assemble(&self.meta, entry)
    }

    pub(crate) fn cache_get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.cache.as_ref().and_then(|c| c.get(key))
    }

    pub(crate) fn cache_put(&self, key: CacheKey, entry: CacheEntry) {
        if let Some(cache) = &self.cache {
            cache.put(key, entry);
        }
    }

    pub(crate) fn cache_evict(&self, key: &CacheKey) {
        if let Some(cache) = &self.cache {
            cache.evict(key);
        }
    }
}

/// Bind one property value in selectable order, skipping formula positions
/// (they have no bind slot). Unfetched lazy slots bind as null.
fn bind_property(stmt: &mut PreparedSql, p: &crate::meta::PropertyMetadata, value: &Value) {
    let values = p.semantic.flatten(value);
    for (s, v) in p.selectables.iter().zip(values) {
        if matches!(s, Selectable::Column(_)) {
            stmt.bind(if v.is_unfetched() { Value::Null } else { v });
        }
    }
}
