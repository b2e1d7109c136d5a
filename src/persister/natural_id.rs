//! Natural-id resolution: map a business key to the primary key. The SQL is
//! shaped by the values' nullness (`= ?` vs `is null`), so only the provably
//! non-nullable form is cached — that cached statement assumes no null
//! argument is ever passed and rejects one outright.

use std::sync::Arc;

use tracing::trace;

use crate::core::{PersistError, Result, Value};
use crate::exec::PreparedSql;
use crate::meta::NaturalIdMetadata;
use crate::persister::EntityPersister;
use crate::session::Session;
use crate::sql::{EntitySelect, HydrationSlot, KeyFilter, Projection};

impl EntityPersister {
    /// Resolve natural-id values (one per natural-id property, in mapping
    /// order) to the primary key. `None` when no row matches.
    pub fn load_id_by_natural_id(
        &self,
        values: &[Value],
        session: &mut Session,
    ) -> Result<Option<Value>> {
        let meta = self.metadata();
        let natural_id = self.natural_id_meta()?;
        if values.len() != natural_id.property_indices.len() {
            return Err(PersistError::TypeMismatch(format!(
                "Natural id of '{}' spans {} properties, got {} values",
                meta.entity_name,
                natural_id.property_indices.len(),
                values.len()
            )));
        }
        trace!(entity = %meta.entity_name, "resolving natural id to primary key");

        // the unit of work may already know the answer
        if let Some(id) = session.context().cached_natural_id(&meta.entity_name, values) {
            return Ok(Some(id.clone()));
        }

        let nullness: Vec<bool> = values.iter().map(|v| !v.is_null()).collect();
        let (sql, layout) = self.pk_by_natural_id_query(natural_id, &nullness)?;

        self.flush_pending_batches(session)?;
        let mut stmt = PreparedSql::new(sql.as_str());
        for (&i, value) in natural_id.property_indices.iter().zip(values) {
            if !value.is_null() {
                stmt.bind_all(meta.properties[i].semantic.flatten(value));
            }
        }
        let mut cursor = session.executor().execute_query(&stmt).map_err(|e| {
            self.sql_error(
                &e,
                format!("resolving natural id of entity '{}'", meta.entity_name),
            )
        })?;
        let Some(row) = cursor.next_row().map_err(|e| {
            self.sql_error(
                &e,
                format!("resolving natural id of entity '{}'", meta.entity_name),
            )
        })?
        else {
            return Ok(None);
        };

        let id = match layout.first() {
            Some(HydrationSlot::Identifier { span }) => {
                meta.identifier.semantic.assemble(&row[..*span])
            }
            _ => row.first().cloned().unwrap_or(Value::Null),
        };
        session
            .context_mut()
            .cache_natural_id(&meta.entity_name, values.to_vec(), id.clone());
        Ok(Some(id))
    }

    /// Current natural-id values of the row, in mapping order. `None` when
    /// the row is gone.
    pub fn natural_id_snapshot(
        &self,
        id: &Value,
        session: &mut Session,
    ) -> Result<Option<Vec<Value>>> {
        let meta = self.metadata();
        let natural_id = self.natural_id_meta()?;
        meta.check_id(id)?;
        trace!(entity = %meta.entity_name, %id, "getting current natural-id snapshot");

        let indices = natural_id.property_indices.clone();
        let (sql, layout) = EntitySelect::new(meta, self.dialect())
            .projection(Projection::Properties(indices.clone()))
            .filter(KeyFilter::ById)
            .comment(format!("get current natural-id state {}", meta.entity_name))
            .build();

        self.flush_pending_batches(session)?;
        let mut stmt = PreparedSql::new(sql);
        stmt.bind_all(meta.identifier.semantic.flatten(id));
        let mut cursor = session.executor().execute_query(&stmt).map_err(|e| {
            self.sql_error(
                &e,
                format!(
                    "retrieving natural-id snapshot of entity '{}', id {}",
                    meta.entity_name, id
                ),
            )
        })?;
        let Some(row) = cursor.next_row().map_err(|e| {
            self.sql_error(
                &e,
                format!(
                    "retrieving natural-id snapshot of entity '{}', id {}",
                    meta.entity_name, id
                ),
            )
        })?
        else {
            return Ok(None);
        };

        let mut by_index = std::collections::HashMap::new();
        let mut pos = 0usize;
        for slot in &layout {
            if let HydrationSlot::Property { index, span } = slot {
                let value = meta.properties[*index].semantic.assemble(&row[pos..pos + span]);
                by_index.insert(*index, value);
                pos += span;
            }
        }
        Ok(Some(
            indices
                .iter()
                .map(|i| by_index.get(i).cloned().unwrap_or(Value::Null))
                .collect(),
        ))
    }

    /// Whether every natural-id property is mapped non-nullable; only then
    /// is the pk-by-natural-id statement cacheable.
    pub fn is_natural_id_non_nullable(&self) -> bool {
        let meta = self.metadata();
        meta.natural_id
            .as_ref()
            .map(|n| {
                n.property_indices
                    .iter()
                    .all(|&i| !meta.properties[i].nullable)
            })
            .unwrap_or(false)
    }

    fn natural_id_meta(&self) -> Result<&NaturalIdMetadata> {
        self.metadata().natural_id.as_ref().ok_or_else(|| {
            PersistError::Mapping(format!(
                "Entity '{}' does not define a natural id",
                self.metadata().entity_name
            ))
        })
    }

    fn pk_by_natural_id_query(
        &self,
        natural_id: &NaturalIdMetadata,
        nullness: &[bool],
    ) -> Result<(Arc<String>, Vec<HydrationSlot>)> {
        let meta = self.metadata();
        let layout = vec![HydrationSlot::Identifier { span: meta.identifier.column_span() }];

        if self.is_natural_id_non_nullable() {
            if nullness.iter().any(|&non_null| !non_null) {
                return Err(PersistError::TypeMismatch(format!(
                    "Null value passed for the non-nullable natural id of '{}'",
                    meta.entity_name
                )));
            }
            // compute-once; a racing second render produces the same string
            if let Ok(cached) = self.natural_id_query_cache().read()
                && let Some(sql) = cached.as_ref()
            {
                return Ok((Arc::clone(sql), layout));
            }
            let sql = Arc::new(self.render_pk_by_natural_id(natural_id, nullness));
            if let Ok(mut cached) = self.natural_id_query_cache().write() {
                let entry = cached.get_or_insert_with(|| Arc::clone(&sql));
                return Ok((Arc::clone(entry), layout));
            }
            return Ok((sql, layout));
        }

        // nullable natural ids get a fresh statement per nullness pattern
        Ok((Arc::new(self.render_pk_by_natural_id(natural_id, nullness)), layout))
    }

    fn render_pk_by_natural_id(&self, natural_id: &NaturalIdMetadata, nullness: &[bool]) -> String {
        let meta = self.metadata();
        let (sql, _) = EntitySelect::new(meta, self.dialect())
            .projection(Projection::IdOnly)
            .filter(KeyFilter::ByPropertyNullness {
                indices: natural_id.property_indices.clone(),
                non_null: nullness.to_vec(),
            })
            .comment(format!("get current natural-id->entity-id state {}", meta.entity_name))
            .build();
        sql
    }
}
