//! Insert path: pre-insert value generation, identifier resolution (assigned,
//! uuid, sequence, or the dialect-specific identity protocol), then one
//! insert per write table with all-null nullable tables skipped.

use tracing::trace;

use crate::core::{PersistError, Result, Value, types};
use crate::dialect::IdentityStyle;
use crate::exec::PreparedSql;
use crate::meta::mapping::IdGeneration;
use crate::persister::EntityPersister;
use crate::persister::statements::{generate_insert, insert_expectation};
use crate::session::Session;

impl EntityPersister {
    /// Persist one instance of `entity` (a hierarchy member). `id` must be
    /// given for assigned identifiers and may be omitted for generated ones;
    /// the effective identifier is returned. The state array is patched in
    /// place by in-memory value generation and version seeding.
    pub fn insert(
        &self,
        id: Option<Value>,
        state: &mut [Value],
        entity: &str,
        session: &mut Session,
    ) -> Result<Value> {
        let meta = self.metadata();
        let stmts = self.statements().for_entity(entity).ok_or_else(|| {
            PersistError::Mapping(format!(
                "'{}' is not part of the '{}' hierarchy",
                entity, meta.entity_name
            ))
        })?;

        self.pre_insert_value_generation(state);
        if let Some(v) = meta.version_property()
            && matches!(state[v], Value::Null | Value::Unfetched)
        {
            let data_type = meta.version.as_ref().map(|m| m.data_type).expect("versioned");
            state[v] = types::seed_version(data_type)?;
        }
        meta.check_state(state)?;

        let (include, dynamic) = if meta.dynamic_insert {
            (self.properties_to_insert(state), true)
        } else {
            (meta.insertability(), false)
        };

        // identity ids come out of the root-table insert itself; everything
        // else is known before any row is written
        let (id, skip_root) = match &meta.identifier.generation {
            IdGeneration::Identity => {
                let id = self.insert_identity_root(entity, state, &include, dynamic, session)?;
                (id, true)
            }
            IdGeneration::Assigned => {
                let id = id.ok_or_else(|| {
                    PersistError::IdentifierGeneration(format!(
                        "Entity '{}' uses assigned identifiers; none was provided",
                        meta.entity_name
                    ))
                })?;
                (id, false)
            }
            IdGeneration::UuidV4 => {
                (id.unwrap_or_else(|| Value::Uuid(uuid::Uuid::new_v4())), false)
            }
            IdGeneration::Sequence(name) => match id {
                Some(id) => (id, false),
                None => (self.next_sequence_value(name, session)?, false),
            },
        };
        meta.check_id(&id)?;

        trace!(entity = %meta.entity_name, id = %id, "inserting entity");
        if let Some(v) = meta.version_property() {
            trace!(version = %state[v], "version");
        }

        for (position, &j) in stmts.write_tables.iter().enumerate() {
            if skip_root && position == 0 {
                continue;
            }
            let sql = if dynamic {
                generate_insert(meta, self.dialect(), entity, &include, j, false)
            } else {
                stmts.inserts[position].clone()
            };
            self.insert_into_table(entity, &id, state, &include, j, &sql, session)?;
        }

        self.read_back_generated_values(&id, state, session)?;
        Ok(id)
    }

    /// Database-generated columns (defaults, triggers) are re-selected after
    /// the insert. Reading them forces any pending insert batch to flush
    /// first, since the select depends on the row being visible.
    fn read_back_generated_values(
        &self,
        id: &Value,
        state: &mut [Value],
        session: &mut Session,
    ) -> Result<()> {
        let meta = self.metadata();
        let Some((sql, layout)) = self.statements().insert_generated_select.clone() else {
            return Ok(());
        };
        self.flush_pending_batches(session)?;

        let mut stmt = PreparedSql::new(sql);
        stmt.bind_all(meta.identifier.semantic.flatten(id));
        let mut cursor = session.executor().execute_query(&stmt).map_err(|e| {
            self.sql_error(
                &e,
                format!("reading generated state of entity '{}', id {}", meta.entity_name, id),
            )
        })?;
        let row = cursor
            .next_row()
            .map_err(|e| {
                self.sql_error(
                    &e,
                    format!("reading generated state of entity '{}', id {}", meta.entity_name, id),
                )
            })?
            .ok_or_else(|| PersistError::StaleState {
                entity: meta.entity_name.clone(),
                id: id.to_string(),
            })?;

        let mut pos = 0usize;
        for slot in &layout {
            if let crate::sql::HydrationSlot::Property { index, span } = slot {
                state[*index] = meta.properties[*index].semantic.assemble(&row[pos..pos + span]);
                pos += span;
            }
        }
        Ok(())
    }

    /// Apply pre-insert in-memory value generation (creation timestamps,
    /// generated codes) before any marshaling.
    fn pre_insert_value_generation(&self, state: &mut [Value]) {
        for (i, p) in self.metadata().properties.iter().enumerate() {
            if p.generated.includes_insert() {
                state[i] = p.generated.generate();
            }
        }
    }

    /// Dynamic-insert inclusion: insertable properties whose value is
    /// non-null.
    pub(crate) fn properties_to_insert(&self, state: &[Value]) -> Vec<bool> {
        self.metadata()
            .insertability()
            .iter()
            .zip(state)
            .map(|(&insertable, v)| insertable && !matches!(v, Value::Null | Value::Unfetched))
            .collect()
    }

    /// One table's insert: inverse tables are never written, and a nullable
    /// secondary table with nothing but nulls gets no row at all.
    fn insert_into_table(
        &self,
        entity: &str,
        id: &Value,
        state: &[Value],
        include: &[bool],
        j: usize,
        sql: &str,
        session: &mut Session,
    ) -> Result<()> {
        let meta = self.metadata();
        let table = meta.topology.table(j);
        if table.inverse {
            return Ok(());
        }
        if table.optional && meta.is_all_null(state, j) {
            return Ok(());
        }

        let expectation = insert_expectation(meta, j);
        let use_batch = expectation.can_be_batched()
            && session.batch_size > 1
            && meta.identifier.generation.supports_batched_inserts();

        let mut stmt = PreparedSql::new(sql);
        self.dehydrate(entity, state, include, j, Some(id), None, false, &mut stmt);

        if use_batch {
            let key = self.batch_key("INSERT", expectation);
            if let Err(e) = session.executor().add_to_batch(&key, &stmt) {
                session.executor().abort_batch(&key);
                session.forget_pending_batch(&key);
                return Err(self.sql_error(
                    &e,
                    format!("inserting entity '{}', id {}", meta.entity_name, id),
                ));
            }
            session.note_pending_batch(&key);
        } else {
            let rows = session.executor().execute_update(&stmt).map_err(|e| {
                self.sql_error(&e, format!("inserting entity '{}', id {}", meta.entity_name, id))
            })?;
            self.check(rows, id, table.optional, expectation)?;
        }
        Ok(())
    }

    /// The identity protocol: run the key-less root insert and read the
    /// generated identifier back through whatever the dialect supports.
    fn insert_identity_root(
        &self,
        entity: &str,
        state: &[Value],
        include: &[bool],
        dynamic: bool,
        session: &mut Session,
    ) -> Result<Value> {
        let meta = self.metadata();
        let stmts = self.statements().for_entity(entity).expect("validated by caller");
        let root = stmts.write_tables[0];
        let key_column = meta.identifier.columns[0].clone();

        let sql = if dynamic {
            let sql = generate_insert(meta, self.dialect(), entity, include, root, true);
            match self.dialect().identity_style() {
                IdentityStyle::InsertReturning => {
                    self.dialect().append_identity_retrieval(&sql, &key_column)
                }
                _ => sql,
            }
        } else {
            stmts.identity_insert.clone().expect("identity mapping has an identity insert")
        };

        let mut stmt = PreparedSql::new(sql);
        self.dehydrate(entity, state, include, root, None, None, false, &mut stmt);

        let context = || format!("inserting entity '{}' (identity)", meta.entity_name);
        match self.dialect().identity_style() {
            IdentityStyle::InsertReturning | IdentityStyle::GeneratedKeys => {
                let row = session
                    .executor()
                    .execute_insert_returning(&stmt)
                    .map_err(|e| self.sql_error(&e, context()))?;
                row.first().cloned().ok_or_else(|| {
                    PersistError::IdentifierGeneration(format!(
                        "Database returned no generated key for '{}'",
                        meta.entity_name
                    ))
                })
            }
            IdentityStyle::SelectAfterInsert => {
                session
                    .executor()
                    .execute_update(&stmt)
                    .map_err(|e| self.sql_error(&e, context()))?;
                let select = self
                    .dialect()
                    .identity_select_sql(&meta.topology.table(root).name, &key_column)
                    .ok_or_else(|| {
                        PersistError::IdentifierGeneration(format!(
                            "Dialect '{}' has no identity select",
                            self.dialect().name()
                        ))
                    })?;
                let select = PreparedSql::new(select);
                let mut cursor = session
                    .executor()
                    .execute_query(&select)
                    .map_err(|e| self.sql_error(&e, context()))?;
                let row = cursor
                    .next_row()
                    .map_err(|e| self.sql_error(&e, context()))?
                    .ok_or_else(|| {
                        PersistError::IdentifierGeneration(format!(
                            "Identity select returned no row for '{}'",
                            meta.entity_name
                        ))
                    })?;
                row.first().cloned().ok_or_else(|| {
                    PersistError::IdentifierGeneration(format!(
                        "Identity select returned an empty row for '{}'",
                        meta.entity_name
                    ))
                })
            }
        }
    }

    fn next_sequence_value(&self, sequence: &str, session: &mut Session) -> Result<Value> {
        let sql = self.dialect().sequence_next_value_sql(sequence);
        let stmt = PreparedSql::new(sql);
        let mut cursor = session.executor().execute_query(&stmt).map_err(|e| {
            self.sql_error(&e, format!("reading sequence '{}'", sequence))
        })?;
        let row = cursor
            .next_row()
            .map_err(|e| self.sql_error(&e, format!("reading sequence '{}'", sequence)))?
            .ok_or_else(|| {
                PersistError::IdentifierGeneration(format!(
                    "Sequence '{}' returned no value",
                    sequence
                ))
            })?;
        row.first().cloned().ok_or_else(|| {
            PersistError::IdentifierGeneration(format!("Sequence '{}' returned an empty row", sequence))
        })
    }
}
