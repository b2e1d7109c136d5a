//! Loader strategies: execute the generated SELECT SQL and hydrate result
//! rows into state arrays. Loaders are built once per shape (lock mode,
//! unique-key property, batch size) and cached by the persister.

use tracing::trace;

use crate::core::{PersistError, Result, Row, SqlErrorKind, Value};
use crate::dialect::{Dialect, LockOptions};
use crate::exec::PreparedSql;
use crate::meta::EntityMetadata;
use crate::sql::{EntitySelect, HydrationSlot, KeyFilter, Projection};
use crate::session::Session;

/// A hydrated entity row: the concrete subtype, identifier, closure-indexed
/// state array (lazy slots unfetched) and version.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEntity {
    pub entity_name: String,
    pub id: Value,
    pub state: Vec<Value>,
    pub version: Option<Value>,
}

/// Turn one result row into a [`LoadedEntity`] following the select's
/// hydration layout.
pub fn hydrate(
    meta: &EntityMetadata,
    layout: &[HydrationSlot],
    row: &Row,
    known_id: Option<&Value>,
) -> Result<LoadedEntity> {
    let mut state: Vec<Value> = meta
        .properties
        .iter()
        .map(|p| if p.is_lazy() { Value::Unfetched } else { Value::Null })
        .collect();
    let mut id = known_id.cloned();
    let mut discriminator: Option<Value> = None;

    let mut pos = 0usize;
    for slot in layout {
        match slot {
            HydrationSlot::Identifier { span } => {
                let columns = row.get(pos..pos + span).ok_or_else(|| truncated(meta))?;
                id = Some(meta.identifier.semantic.assemble(columns));
                pos += span;
            }
            HydrationSlot::Discriminator => {
                discriminator = Some(row.get(pos).cloned().ok_or_else(|| truncated(meta))?);
                pos += 1;
            }
            HydrationSlot::Property { index, span } => {
                let columns = row.get(pos..pos + span).ok_or_else(|| truncated(meta))?;
                state[*index] = meta.properties[*index].semantic.assemble(columns);
                pos += span;
            }
        }
    }

    let id = id.ok_or_else(|| {
        PersistError::Mapping(format!(
            "Select for '{}' hydrated no identifier",
            meta.entity_name
        ))
    })?;
    let entity_name = match &discriminator {
        Some(value) => meta.topology.resolve_subclass(value)?.to_string(),
        None => meta.entity_name.clone(),
    };
    // properties declared below the concrete type stay null
    let version = meta.version_property().map(|v| state[v].clone());
    Ok(LoadedEntity { entity_name, id, state, version })
}

fn truncated(meta: &EntityMetadata) -> PersistError {
    PersistError::Mapping(format!(
        "Result row for '{}' is shorter than its hydration layout",
        meta.entity_name
    ))
}

/// Single-identifier loader for one lock mode.
#[derive(Debug)]
pub struct EntityLoader {
    sql: String,
    layout: Vec<HydrationSlot>,
}

impl EntityLoader {
    pub fn new(meta: &EntityMetadata, dialect: &dyn Dialect, lock: LockOptions) -> Self {
        let include: Vec<bool> = meta
            .properties
            .iter()
            .map(|p| p.is_selectable() && !p.is_lazy())
            .collect();
        let (sql, layout) = EntitySelect::new(meta, dialect)
            .projection(Projection::FullState { include })
            .filter(KeyFilter::ById)
            .lock(lock)
            .build();
        Self { sql, layout }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn load(
        &self,
        meta: &EntityMetadata,
        dialect: &dyn Dialect,
        id: &Value,
        session: &mut Session,
    ) -> Result<Option<LoadedEntity>> {
        trace!(entity = %meta.entity_name, %id, "loading entity");
        let mut stmt = PreparedSql::new(self.sql.clone());
        stmt.bind_all(meta.identifier.semantic.flatten(id));

        let mut cursor = session.executor().execute_query(&stmt).map_err(|e| PersistError::Sql {
            kind: dialect.translate(&e),
            context: format!("loading entity '{}', id {}", meta.entity_name, id),
            message: e.to_string(),
        })?;

        let mut found: Option<LoadedEntity> = None;
        while let Some(row) = cursor.next_row().map_err(|e| PersistError::Sql {
            kind: dialect.translate(&e),
            context: format!("reading row for entity '{}', id {}", meta.entity_name, id),
            message: e.to_string(),
        })? {
            if found.is_some() {
                return Err(PersistError::DuplicateIdentifier {
                    entity: meta.entity_name.clone(),
                    id: id.to_string(),
                    rows: 2,
                });
            }
            found = Some(hydrate(meta, &self.layout, &row, Some(id))?);
        }
        Ok(found)
    }
}

/// Multi-identifier loader: chunks the id list into `IN (?, ..)` selects of
/// the mapped batch size. Composite identifiers fall back to one select per
/// id.
#[derive(Debug)]
pub struct BatchEntityLoader {
    batch_size: usize,
}

impl BatchEntityLoader {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size: batch_size.max(1) }
    }

    pub fn load_batch(
        &self,
        meta: &EntityMetadata,
        dialect: &dyn Dialect,
        ids: &[Value],
        lock: LockOptions,
        session: &mut Session,
    ) -> Result<Vec<LoadedEntity>> {
        let mut results = Vec::with_capacity(ids.len());
        if meta.identifier.column_span() != 1 {
            let loader = EntityLoader::new(meta, dialect, lock);
            for id in ids {
                if let Some(entity) = loader.load(meta, dialect, id, session)? {
                    results.push(entity);
                }
            }
            return Ok(results);
        }

        let include: Vec<bool> = meta
            .properties
            .iter()
            .map(|p| p.is_selectable() && !p.is_lazy())
            .collect();
        for chunk in ids.chunks(self.batch_size) {
            let (sql, layout) = EntitySelect::new(meta, dialect)
                .projection(Projection::FullState { include: include.clone() })
                .filter(KeyFilter::ByIdList(chunk.len()))
                .lock(lock)
                .build();
            let mut stmt = PreparedSql::new(sql);
            stmt.bind_all(chunk.iter().cloned());
            let mut cursor =
                session.executor().execute_query(&stmt).map_err(|e| PersistError::Sql {
                    kind: dialect.translate(&e),
                    context: format!("batch-loading entity '{}'", meta.entity_name),
                    message: e.to_string(),
                })?;
            while let Some(row) = cursor.next_row().map_err(|e| PersistError::Sql {
                kind: dialect.translate(&e),
                context: format!("batch-loading entity '{}'", meta.entity_name),
                message: e.to_string(),
            })? {
                results.push(hydrate(meta, &layout, &row, None)?);
            }
        }
        Ok(results)
    }
}

/// Unique-key loader for one property; at most one matching row is legal.
#[derive(Debug)]
pub struct UniqueKeyLoader {
    property: usize,
    sql: String,
    layout: Vec<HydrationSlot>,
}

impl UniqueKeyLoader {
    pub fn new(meta: &EntityMetadata, dialect: &dyn Dialect, property: usize) -> Self {
        let include: Vec<bool> = meta
            .properties
            .iter()
            .map(|p| p.is_selectable() && !p.is_lazy())
            .collect();
        let (sql, layout) = EntitySelect::new(meta, dialect)
            .projection(Projection::FullState { include })
            .filter(KeyFilter::ByProperty(property))
            .build();
        Self { property, sql, layout }
    }

    pub fn load(
        &self,
        meta: &EntityMetadata,
        dialect: &dyn Dialect,
        key: &Value,
        session: &mut Session,
    ) -> Result<Option<LoadedEntity>> {
        let property = &meta.properties[self.property];
        let mut stmt = PreparedSql::new(self.sql.clone());
        stmt.bind_all(property.semantic.flatten(key));
        let mut cursor = session.executor().execute_query(&stmt).map_err(|e| PersistError::Sql {
            kind: dialect.translate(&e),
            context: format!(
                "loading entity '{}' by unique key '{}'",
                meta.entity_name, property.name
            ),
            message: e.to_string(),
        })?;
        let mut found: Option<LoadedEntity> = None;
        while let Some(row) = cursor.next_row().map_err(|e| PersistError::Sql {
            kind: dialect.translate(&e),
            context: format!(
                "loading entity '{}' by unique key '{}'",
                meta.entity_name, property.name
            ),
            message: e.to_string(),
        })? {
            if found.is_some() {
                return Err(PersistError::Sql {
                    kind: SqlErrorKind::ConstraintViolation,
                    context: format!(
                        "loading entity '{}' by unique key '{}'",
                        meta.entity_name, property.name
                    ),
                    message: "unique key lookup returned more than one row".into(),
                });
            }
            found = Some(hydrate(meta, &self.layout, &row, None)?);
        }
        Ok(found)
    }
}
