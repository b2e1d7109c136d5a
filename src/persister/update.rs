//! Update path: per-table needs-update flags from the dirty set, dynamic vs
//! static SQL selection, version increment, and the per-table upsert fallback
//! for nullable secondary tables (UPDATE becomes INSERT when the row never
//! existed, and DELETE when every value became null).

use tracing::trace;

use crate::core::{PersistError, Result, Value, types};
use crate::exec::PreparedSql;
use crate::meta::mapping::OptimisticLockStyle;
use crate::persister::EntityPersister;
use crate::persister::statements::{
    check_version, delete_expectation, generate_update, update_expectation,
};
use crate::session::Session;

impl EntityPersister {
    /// Write the dirty state of one instance. `dirty` is the closure-ordinal
    /// set from dirty checking (`None` when no snapshot was available, which
    /// forces a full-column update); `old_state`/`old_version` feed the
    /// optimistic-lock predicates. The version slot of `state` is advanced in
    /// place when an increment is due.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        id: &Value,
        state: &mut [Value],
        dirty: Option<&[usize]>,
        has_dirty_collection: bool,
        old_state: Option<&[Value]>,
        old_version: Option<&Value>,
        entity: &str,
        row_id: Option<&Value>,
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

        // pre-update in-memory generation joins the dirty set
        let mut dirty_owned: Option<Vec<usize>> = dirty.map(<[usize]>::to_vec);
        for (i, p) in meta.properties.iter().enumerate() {
            if p.generated.includes_update() {
                state[i] = p.generated.generate();
                if let Some(d) = dirty_owned.as_mut()
                    && !d.contains(&i)
                {
                    d.push(i);
                }
            }
        }
        let dirty = dirty_owned.as_deref();

        // advance the version when the dirty set (or a dirty collection)
        // demands it
        let increment_required = meta.is_versioned()
            && match dirty {
                None => true,
                Some(d) => self.version_increment_required(d, has_dirty_collection),
            };
        let old_version = match (meta.version_property(), old_version) {
            (Some(v), None) => old_state.map(|old| old[v].clone()),
            (_, Some(value)) => Some(value.clone()),
            (None, None) => None,
        };
        if let Some(v) = meta.version_property() {
            let previous = old_version.as_ref().ok_or_else(|| {
                PersistError::TypeMismatch(format!(
                    "Updating versioned entity '{}' requires the old version",
                    meta.entity_name
                ))
            })?;
            state[v] = if increment_required {
                types::next_version(previous)?
            } else {
                previous.clone()
            };
        }
        meta.check_state(state)?;

        trace!(entity = %meta.entity_name, %id, "updating entity");
        if let Some(v) = meta.version_property() {
            let old_display = old_version.as_ref().unwrap_or(&Value::Null);
            trace!(old = %old_display, new = %state[v], "version");
        }

        let table_update_needed =
            self.table_update_needed(stmts, entity, dirty, increment_required);

        // ALL/DIRTY locking binds old values, so its SQL must be generated
        // against this call's snapshot; plain dynamic-update does too
        let use_dynamic = (meta.dynamic_update && dirty.is_some())
            || (meta.optimistic_lock.is_all_or_dirty() && old_state.is_some());

        let (include, update_strings): (Vec<bool>, Vec<Option<String>>) = if use_dynamic {
            let include = self.properties_to_update(dirty.unwrap_or(&[]), increment_required);
            let strings = stmts
                .write_tables
                .iter()
                .enumerate()
                .map(|(position, &j)| {
                    if table_update_needed[position] {
                        generate_update(
                            meta,
                            self.dialect(),
                            entity,
                            &include,
                            j,
                            old_state,
                            j == 0 && row_id.is_some(),
                        )
                    } else {
                        None
                    }
                })
                .collect();
            (include, strings)
        } else {
            let lazy = state.iter().any(Value::is_unfetched);
            let include =
                if lazy { meta.non_lazy_updatability() } else { meta.updatability() };
            let strings = stmts
                .write_tables
                .iter()
                .enumerate()
                .map(|(position, &j)| {
                    if j == 0 && row_id.is_some() {
                        if lazy {
                            stmts.lazy_update_by_row_id.clone()
                        } else {
                            stmts.update_by_row_id.clone()
                        }
                    } else if lazy {
                        stmts.lazy_updates[position].clone()
                    } else {
                        stmts.updates[position].clone()
                    }
                })
                .collect();
            (include, strings)
        };

        for (position, &j) in stmts.write_tables.iter().enumerate() {
            if !table_update_needed[position] {
                continue;
            }
            let Some(sql) = update_strings[position].as_deref() else {
                continue;
            };
            self.update_or_insert(
                entity,
                id,
                state,
                old_state,
                old_version.as_ref(),
                &include,
                position,
                j,
                sql,
                if j == 0 { row_id } else { None },
                session,
            )?;
        }
        Ok(())
    }

    fn version_increment_required(&self, dirty: &[usize], has_dirty_collection: bool) -> bool {
        if has_dirty_collection {
            return true;
        }
        let versionability = self.metadata().versionability();
        dirty.iter().any(|&i| versionability[i])
    }

    /// Dynamic-update inclusion: the dirty, updatable properties plus the
    /// version when it is being advanced.
    fn properties_to_update(&self, dirty: &[usize], increment_required: bool) -> Vec<bool> {
        let meta = self.metadata();
        let updatability = meta.updatability();
        let mut include = vec![false; meta.property_span()];
        for &i in dirty {
            if updatability[i] {
                include[i] = true;
            }
        }
        if let Some(v) = meta.version_property()
            && increment_required
            && updatability[v]
        {
            include[v] = true;
        }
        include
    }

    fn table_update_needed(
        &self,
        stmts: &crate::persister::statements::EntityStatements,
        entity: &str,
        dirty: Option<&[usize]>,
        increment_required: bool,
    ) -> Vec<bool> {
        let meta = self.metadata();
        match dirty {
            // no snapshot: every table that has columns gets the full update
            None => stmts.table_has_columns.clone(),
            Some(dirty) => {
                let updatability = meta.updatability();
                let mut needed = vec![false; stmts.write_tables.len()];
                for &i in dirty {
                    if !updatability[i] {
                        if meta.properties[i].has_columns() {
                            trace!(
                                property = %meta.properties[i].name,
                                entity = %meta.entity_name,
                                "ignoring modification of non-updatable property"
                            );
                        }
                        continue;
                    }
                    for (position, &j) in stmts.write_tables.iter().enumerate() {
                        if meta.is_property_of_table(i, j)
                            && meta.is_property_of_entity(i, entity)
                            && meta.properties[i].has_columns()
                        {
                            needed[position] = true;
                        }
                    }
                }
                if meta.is_versioned() && increment_required {
                    needed[0] = true;
                }
                needed
            }
        }
    }

    /// Perform an UPDATE against table `j`, falling back per the nullable
    /// secondary-table rules: a previously all-null row is inserted instead,
    /// a newly all-null row is deleted.
    #[allow(clippy::too_many_arguments)]
    fn update_or_insert(
        &self,
        entity: &str,
        id: &Value,
        state: &[Value],
        old_state: Option<&[Value]>,
        old_version: Option<&Value>,
        include: &[bool],
        position: usize,
        j: usize,
        sql: &str,
        row_id: Option<&Value>,
        session: &mut Session,
    ) -> Result<()> {
        let meta = self.metadata();
        let stmts = self.statements().for_entity(entity).expect("validated by caller");
        let table = meta.topology.table(j);
        if table.inverse {
            return Ok(());
        }

        let row_exists = if table.optional
            && let Some(old) = old_state
            && meta.is_all_null(old, j)
        {
            // no row there yet; don't bother trying to update
            false
        } else if table.optional && meta.is_all_null(state, j) {
            // every value became null: remove the existing row
            self.delete_row(
                entity,
                id,
                old_version,
                position,
                j,
                &stmts.deletes[position],
                None,
                session,
            )?;
            true
        } else {
            self.update_row(
                entity, id, state, old_state, old_version, include, j, sql, row_id, session,
            )?
        };

        if !row_exists && !meta.is_all_null(state, j) {
            // the row was missing, so the "update" is really an insert
            self.insert_row_for_upsert(entity, id, state, position, j, session)?;
        }
        Ok(())
    }

    /// Execute one UPDATE. Returns whether a row was hit; zero rows on a
    /// nullable table reports `false` instead of failing so the caller can
    /// upsert.
    #[allow(clippy::too_many_arguments)]
    fn update_row(
        &self,
        entity: &str,
        id: &Value,
        state: &[Value],
        old_state: Option<&[Value]>,
        old_version: Option<&Value>,
        include: &[bool],
        j: usize,
        sql: &str,
        row_id: Option<&Value>,
        session: &mut Session,
    ) -> Result<bool> {
        let meta = self.metadata();
        let table = meta.topology.table(j);
        let expectation = update_expectation(meta, j);
        let use_batch =
            expectation.can_be_batched() && self.is_batchable(session) && session.batch_size > 1;

        let mut stmt = PreparedSql::new(sql);
        self.dehydrate(entity, state, include, j, Some(id), row_id, true, &mut stmt);

        let versioned_check = j == 0
            && meta.is_versioned()
            && meta.optimistic_lock == OptimisticLockStyle::Version;
        if versioned_check {
            if check_version(meta, include)
                && let Some(old) = old_version
            {
                stmt.bind(old.clone());
            }
        } else if meta.optimistic_lock.is_all_or_dirty()
            && let Some(old) = old_state
        {
            let include_in_where = if meta.optimistic_lock == OptimisticLockStyle::All {
                meta.updatability()
            } else {
                include.to_vec()
            };
            self.bind_lock_values(entity, &include_in_where, j, old, &mut stmt);
        }

        if use_batch {
            let key = self.batch_key("UPDATE", expectation);
            if let Err(e) = session.executor().add_to_batch(&key, &stmt) {
                session.executor().abort_batch(&key);
                session.forget_pending_batch(&key);
                return Err(self.sql_error(
                    &e,
                    format!("updating entity '{}', id {}", meta.entity_name, id),
                ));
            }
            session.note_pending_batch(&key);
            Ok(true)
        } else {
            let rows = session.executor().execute_update(&stmt).map_err(|e| {
                self.sql_error(&e, format!("updating entity '{}', id {}", meta.entity_name, id))
            })?;
            self.check(rows, id, table.optional, expectation)
        }
    }

    /// The insert half of the upsert fallback. Uses the static insert string
    /// and full insertability, mirroring the original behavior of not
    /// honoring dynamic-insert here.
    fn insert_row_for_upsert(
        &self,
        entity: &str,
        id: &Value,
        state: &[Value],
        position: usize,
        j: usize,
        session: &mut Session,
    ) -> Result<()> {
        let meta = self.metadata();
        let stmts = self.statements().for_entity(entity).expect("validated by caller");
        let include = meta.insertability();
        let sql = &stmts.inserts[position];
        let expectation = crate::persister::statements::insert_expectation(meta, j);

        let mut stmt = PreparedSql::new(sql.as_str());
        self.dehydrate(entity, state, &include, j, Some(id), None, false, &mut stmt);
        let rows = session.executor().execute_update(&stmt).map_err(|e| {
            self.sql_error(
                &e,
                format!("inserting secondary row for entity '{}', id {}", meta.entity_name, id),
            )
        })?;
        self.check(rows, id, meta.topology.table(j).optional, expectation)?;
        Ok(())
    }

    /// Delete one table's row (used by the all-null fallback and by the
    /// delete path). `lock_values` carries the loaded snapshot for implied
    /// optimistic locking.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn delete_row(
        &self,
        entity: &str,
        id: &Value,
        version: Option<&Value>,
        position: usize,
        j: usize,
        sql: &str,
        lock_values: Option<&[Value]>,
        session: &mut Session,
    ) -> Result<()> {
        let meta = self.metadata();
        let table = meta.topology.table(j);
        if table.inverse {
            return Ok(());
        }
        let expectation = delete_expectation(meta, j);
        let use_batch = position == 0
            && expectation.can_be_batched()
            && self.is_batchable(session)
            && session.batch_size > 1
            && lock_values.is_none();

        let mut stmt = PreparedSql::new(sql);
        stmt.bind_all(meta.identifier.semantic.flatten(id));

        let versioned_check = position == 0
            && meta.is_versioned()
            && meta.optimistic_lock == OptimisticLockStyle::Version;
        if versioned_check && let Some(version) = version {
            stmt.bind(version.clone());
        } else if meta.optimistic_lock.is_all_or_dirty()
            && let Some(loaded) = lock_values
        {
            let include_in_where = meta.versionability();
            self.bind_lock_values(entity, &include_in_where, j, loaded, &mut stmt);
        }

        if use_batch {
            let key = self.batch_key("DELETE", expectation);
            if let Err(e) = session.executor().add_to_batch(&key, &stmt) {
                session.executor().abort_batch(&key);
                session.forget_pending_batch(&key);
                return Err(self.sql_error(
                    &e,
                    format!("deleting entity '{}', id {}", meta.entity_name, id),
                ));
            }
            session.note_pending_batch(&key);
        } else {
            let rows = session.executor().execute_update(&stmt).map_err(|e| {
                self.sql_error(&e, format!("deleting entity '{}', id {}", meta.entity_name, id))
            })?;
            self.check(rows, id, table.optional, expectation)?;
        }
        Ok(())
    }
}
