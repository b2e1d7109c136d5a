//! Static SQL generation: the full statement set is rendered once at
//! persister construction and cached as plain strings. Dynamic insert/update
//! re-enter the same generators per call with a narrower inclusion mask.

use std::collections::{HashMap, HashSet};

use crate::core::{Result, Value};
use crate::dialect::{Dialect, IdentityStyle};
use crate::exec::Expectation;
use crate::meta::mapping::OptimisticLockStyle;
use crate::meta::{EntityMetadata, Selectable};
use crate::sql::{
    Delete, EntitySelect, HydrationSlot, Insert, KeyFilter, Projection, SimpleSelect, Update,
    substitute_brackets,
};

/// Statements for one concrete entity of the hierarchy, parallel to its
/// write-table set.
#[derive(Debug)]
pub struct EntityStatements {
    /// Table indices in insert order (superclass tables first).
    pub write_tables: Vec<usize>,
    pub inserts: Vec<String>,
    /// Root-table insert for identity id generation: key columns omitted,
    /// retrieval clause appended where the dialect wants one.
    pub identity_insert: Option<String>,
    /// Static full-column updates; `None` where a table owns no updatable
    /// columns.
    pub updates: Vec<Option<String>>,
    /// Static updates that exclude lazy properties, used while an instance
    /// still carries unfetched state.
    pub lazy_updates: Vec<Option<String>>,
    pub update_by_row_id: Option<String>,
    pub lazy_update_by_row_id: Option<String>,
    pub deletes: Vec<String>,
    pub table_has_columns: Vec<bool>,
}

/// The persister's cached SQL. Built once; immutable afterwards.
#[derive(Debug)]
pub struct StatementSet {
    per_entity: HashMap<String, EntityStatements>,
    pub snapshot_select: String,
    pub snapshot_layout: Vec<HydrationSlot>,
    pub version_select: String,
    pub lazy_selects: HashMap<String, (String, Vec<HydrationSlot>)>,
    /// Re-select of database-generated columns, run right after an insert.
    pub insert_generated_select: Option<(String, Vec<HydrationSlot>)>,
}

impl StatementSet {
    pub fn build(meta: &EntityMetadata, dialect: &dyn Dialect) -> Result<Self> {
        let mut per_entity = HashMap::new();
        for entity in meta.topology.hierarchy().entities() {
            per_entity.insert(entity.clone(), build_entity_statements(meta, dialect, entity)?);
        }

        let (snapshot_select, snapshot_layout) = generate_snapshot_select(meta, dialect);
        let version_select = generate_version_select(meta);

        let mut lazy_selects = HashMap::new();
        for group in meta.fetch_groups() {
            lazy_selects.insert(group.to_string(), generate_lazy_select(meta, dialect, group));
        }

        let generated: Vec<usize> = meta
            .properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.generated.in_database() && p.is_selectable())
            .map(|(i, _)| i)
            .collect();
        let insert_generated_select = if generated.is_empty() {
            None
        } else {
            Some(
                EntitySelect::new(meta, dialect)
                    .projection(Projection::Properties(generated))
                    .filter(KeyFilter::ById)
                    .comment(format!("get generated state {}", meta.entity_name))
                    .build(),
            )
        };

        Ok(Self {
            per_entity,
            snapshot_select,
            snapshot_layout,
            version_select,
            lazy_selects,
            insert_generated_select,
        })
    }

    pub fn for_entity(&self, entity: &str) -> Option<&EntityStatements> {
        self.per_entity.get(entity)
    }
}

fn build_entity_statements(
    meta: &EntityMetadata,
    dialect: &dyn Dialect,
    entity: &str,
) -> Result<EntityStatements> {
    let write_tables = meta.topology.tables_for_entity(entity)?;
    let insertability = meta.insertability();
    let updatability = meta.updatability();
    let lazy_updatability = meta.non_lazy_updatability();

    let mut inserts = Vec::with_capacity(write_tables.len());
    let mut updates = Vec::with_capacity(write_tables.len());
    let mut lazy_updates = Vec::with_capacity(write_tables.len());
    let mut deletes = Vec::with_capacity(write_tables.len());
    for (position, &j) in write_tables.iter().enumerate() {
        let insert = match &meta.custom_insert[j] {
            Some(custom) => substitute_brackets(&custom.sql, dialect),
            None => generate_insert(meta, dialect, entity, &insertability, j, false),
        };
        inserts.push(insert);

        let update = match &meta.custom_update[j] {
            Some(custom) => Some(substitute_brackets(&custom.sql, dialect)),
            None => generate_update(meta, dialect, entity, &updatability, j, None, false),
        };
        let lazy_update = match &meta.custom_update[j] {
            Some(custom) => Some(substitute_brackets(&custom.sql, dialect)),
            None => generate_update(meta, dialect, entity, &lazy_updatability, j, None, false),
        };
        updates.push(update);
        lazy_updates.push(lazy_update);

        let delete = match &meta.custom_delete[j] {
            Some(custom) => substitute_brackets(&custom.sql, dialect),
            None => generate_delete(meta, j, position == 0),
        };
        deletes.push(delete);
    }

    let table_has_columns = updates.iter().map(Option::is_some).collect();

    let identity_insert = if meta.identifier.generation
        == crate::meta::mapping::IdGeneration::Identity
    {
        let root = write_tables[0];
        let sql = generate_insert(meta, dialect, entity, &insertability, root, true);
        let sql = match dialect.identity_style() {
            IdentityStyle::InsertReturning => {
                dialect.append_identity_retrieval(&sql, &meta.identifier.columns[0])
            }
            IdentityStyle::GeneratedKeys | IdentityStyle::SelectAfterInsert => sql,
        };
        Some(sql)
    } else {
        None
    };

    let update_by_row_id = meta.row_id.as_ref().and_then(|_| {
        generate_update(meta, dialect, entity, &updatability, write_tables[0], None, true)
    });
    let lazy_update_by_row_id = meta.row_id.as_ref().and_then(|_| {
        generate_update(meta, dialect, entity, &lazy_updatability, write_tables[0], None, true)
    });

    Ok(EntityStatements {
        write_tables,
        inserts,
        identity_insert,
        updates,
        lazy_updates,
        update_by_row_id,
        lazy_update_by_row_id,
        deletes,
        table_has_columns,
    })
}

/// Generate the SQL that inserts a row into table `j` for instances of
/// `entity`. LOB columns are always rendered (and later bound) after
/// everything else; the key columns come before them unless the id is
/// identity-generated and omitted entirely.
pub fn generate_insert(
    meta: &EntityMetadata,
    dialect: &dyn Dialect,
    entity: &str,
    include: &[bool],
    j: usize,
    identity_insert: bool,
) -> String {
    let mut insert = Insert::new(&meta.topology.table(j).name);
    insert.set_comment(format!("insert {}", entity));

    let lobs_last = dialect.requires_lobs_last();
    for (i, p) in meta.properties.iter().enumerate() {
        if include[i]
            && meta.is_property_of_table(i, j)
            && meta.is_property_of_entity(i, entity)
            && !(lobs_last && meta.lob_properties.contains(&i))
        {
            for s in &p.selectables {
                if let Selectable::Column(c) = s {
                    insert.add_column_with_value(&c.name, &c.write_expr);
                }
            }
        }
    }

    // the discriminator is stored as a literal, never a bind parameter
    if let Some((table, column, value)) = meta.topology.discriminator_insert(entity)
        && meta.topology.property_writes_to(table, entity, j)
    {
        let literal = crate::meta::topology::sql_literal(&value)
            .expect("discriminator literals are validated at build time");
        insert.add_column_with_value(&column, &literal);
    }

    if !identity_insert {
        let key_columns: Vec<String> = key_columns_for(meta, j);
        insert.add_columns(&key_columns);
    }

    if lobs_last {
        for &i in &meta.lob_properties {
            if include[i]
                && meta.is_property_of_table(i, j)
                && meta.is_property_of_entity(i, entity)
            {
                for s in &meta.properties[i].selectables {
                    if let Selectable::Column(c) = s {
                        insert.add_column_with_value(&c.name, &c.write_expr);
                    }
                }
            }
        }
    }

    insert.to_statement_string(dialect)
}

/// Generate the SQL that updates a row of table `j` by id (or row-id) and,
/// depending on the optimistic-lock style, version or old property values.
/// `None` when no column of this table is being written.
pub fn generate_update(
    meta: &EntityMetadata,
    dialect: &dyn Dialect,
    entity: &str,
    include: &[bool],
    j: usize,
    old_state: Option<&[Value]>,
    use_row_id: bool,
) -> Option<String> {
    let mut update = Update::new(&meta.topology.table(j).name);
    update.set_comment(format!("update {}", entity));

    if use_row_id {
        let row_id = meta.row_id.clone().expect("row-id updates require a mapped row id");
        update.add_key_columns(&[row_id]);
    } else {
        update.add_key_columns(&key_columns_for(meta, j));
    }

    let lobs_last = dialect.requires_lobs_last();
    for (i, p) in meta.properties.iter().enumerate() {
        if include[i]
            && meta.is_property_of_table(i, j)
            && meta.is_property_of_entity(i, entity)
            && !(lobs_last && meta.lob_properties.contains(&i))
        {
            for s in &p.selectables {
                if let Selectable::Column(c) = s {
                    update.add_column_with_value(&c.name, &c.write_expr);
                }
            }
        }
    }
    if lobs_last {
        for &i in &meta.lob_properties {
            if include[i]
                && meta.is_property_of_table(i, j)
                && meta.is_property_of_entity(i, entity)
            {
                for s in &meta.properties[i].selectables {
                    if let Selectable::Column(c) = s {
                        update.add_column_with_value(&c.name, &c.write_expr);
                    }
                }
            }
        }
    }

    let root_table = j == 0;
    if root_table
        && meta.is_versioned()
        && meta.optimistic_lock == OptimisticLockStyle::Version
    {
        // only check the version when it is actually being written
        if check_version(meta, include) {
            let column = meta.version.as_ref().map(|v| v.column.clone()).expect("versioned");
            update.set_version_column(&column);
        }
    } else if meta.optimistic_lock.is_all_or_dirty()
        && let Some(old) = old_state
    {
        let include_in_where = if meta.optimistic_lock == OptimisticLockStyle::All {
            meta.updatability()
        } else {
            include.to_vec()
        };
        let versionability = meta.versionability();
        for (i, p) in meta.properties.iter().enumerate() {
            if include_in_where[i]
                && meta.is_property_of_table(i, j)
                && meta.is_property_of_entity(i, entity)
                && versionability[i]
            {
                let nullness = p.semantic.column_nullness(&old[i]);
                for (s, non_null) in p.selectables.iter().zip(nullness) {
                    if let Selectable::Column(c) = s {
                        if non_null {
                            update.add_where_column(&c.name, &format!("={}", c.write_expr));
                        } else {
                            update.add_where_column(&c.name, " is null");
                        }
                    }
                }
            }
        }
    }

    if update.has_columns() { Some(update.to_statement_string()) } else { None }
}

/// A version check belongs on the update only when the version column itself
/// is being written.
pub fn check_version(meta: &EntityMetadata, include: &[bool]) -> bool {
    meta.version_property().map(|v| include[v]).unwrap_or(false)
}

/// Generate the SQL that deletes a row of table `j` by id; the root table of
/// a versioned entity also checks the version.
pub fn generate_delete(meta: &EntityMetadata, j: usize, version_check: bool) -> String {
    let mut delete = Delete::new(&meta.topology.table(j).name);
    delete.set_comment(format!("delete {}", meta.entity_name));
    delete.add_key_columns(&key_columns_for(meta, j));
    if version_check
        && meta.is_versioned()
        && meta.optimistic_lock == OptimisticLockStyle::Version
    {
        let column = meta.version.as_ref().map(|v| v.column.clone()).expect("versioned");
        delete.set_version_column(&column);
    }
    delete.to_statement_string()
}

/// Value-keyed delete strings for ALL/DIRTY optimistic locking without a
/// version column: one `col = ?`/`col is null` predicate per versionable
/// property, driven by the loaded snapshot's nullness.
pub fn generate_deletes_by_values(
    meta: &EntityMetadata,
    entity: &str,
    loaded_state: &[Value],
) -> Result<Vec<String>> {
    let write_tables = meta.topology.tables_for_entity(entity)?;
    let versionability = meta.versionability();
    let mut deletes = Vec::with_capacity(write_tables.len());
    for &j in &write_tables {
        let mut delete = Delete::new(&meta.topology.table(j).name);
        delete.set_comment(format!("delete {}", meta.entity_name));
        delete.add_key_columns(&key_columns_for(meta, j));
        for (i, p) in meta.properties.iter().enumerate() {
            if meta.is_property_of_table(i, j)
                && meta.is_property_of_entity(i, entity)
                && versionability[i]
            {
                let nullness = p.semantic.column_nullness(&loaded_state[i]);
                for (s, non_null) in p.selectables.iter().zip(nullness) {
                    if let Selectable::Column(c) = s {
                        if non_null {
                            delete.add_where_fragment(format!("{} = ?", c.name));
                        } else {
                            delete.add_where_fragment(format!("{} is null", c.name));
                        }
                    }
                }
            }
        }
        deletes.push(delete.to_statement_string());
    }
    Ok(deletes)
}

/// Current-state select used for snapshot comparison: id plus every
/// updatable property, joined across the whole closure.
pub fn generate_snapshot_select(
    meta: &EntityMetadata,
    dialect: &dyn Dialect,
) -> (String, Vec<HydrationSlot>) {
    let updatability = meta.updatability();
    let include: Vec<bool> = meta
        .properties
        .iter()
        .enumerate()
        .map(|(i, p)| p.is_selectable() && updatability[i])
        .collect();
    EntitySelect::new(meta, dialect)
        .projection(Projection::FullState { include })
        .filter(KeyFilter::ById)
        .comment(format!("get current state {}", meta.entity_name))
        .build()
}

/// Version read against the root table; unversioned entities select their
/// key columns instead (existence check).
pub fn generate_version_select(meta: &EntityMetadata) -> String {
    let mut select = SimpleSelect::new(&meta.topology.table(0).name);
    select.set_comment(format!("get version {}", meta.entity_name));
    match &meta.version {
        Some(v) => {
            select.add_column(&v.column);
        }
        None => {
            select.add_columns(&meta.identifier.columns);
        }
    }
    select.add_condition(&meta.identifier.columns, "=?");
    select.to_statement_string()
}

/// Fetch-group select: only the group's properties, joining only the tables
/// the group touches.
pub fn generate_lazy_select(
    meta: &EntityMetadata,
    dialect: &dyn Dialect,
    group: &str,
) -> (String, Vec<HydrationSlot>) {
    let indices = meta.properties_in_group(group);
    let tables: HashSet<usize> =
        indices.iter().map(|&i| meta.properties[i].table_index).collect();
    EntitySelect::new(meta, dialect)
        .projection(Projection::Properties(indices))
        .filter(KeyFilter::ById)
        .only_tables(tables)
        .comment(format!("initialize lazy group '{}' of {}", group, meta.entity_name))
        .build()
}

/// Row-count check style for table `j`, honoring custom SQL overrides.
pub fn insert_expectation(meta: &EntityMetadata, j: usize) -> Expectation {
    meta.custom_insert[j].as_ref().map(|c| c.check).unwrap_or(Expectation::RowCount)
}

pub fn update_expectation(meta: &EntityMetadata, j: usize) -> Expectation {
    meta.custom_update[j].as_ref().map(|c| c.check).unwrap_or(Expectation::RowCount)
}

pub fn delete_expectation(meta: &EntityMetadata, j: usize) -> Expectation {
    meta.custom_delete[j].as_ref().map(|c| c.check).unwrap_or(Expectation::RowCount)
}

fn key_columns_for(meta: &EntityMetadata, j: usize) -> Vec<String> {
    if j == 0 {
        meta.identifier.columns.clone()
    } else {
        meta.topology.table(j).key_columns.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::dialect::AnsiDialect;
    use crate::meta::{
        EntityMapping, EntityMetadata, IdentifierMapping, PropertyMapping, TableMapping,
        VersionMapping,
    };

    fn versioned_account() -> EntityMetadata {
        let mapping = EntityMapping::new(
            "Account",
            TableMapping::new("account", vec!["id".into()]),
            IdentifierMapping::new("id", "id", DataType::Integer),
        )
        .property(PropertyMapping::new("balance", DataType::Integer).not_null())
        .property(PropertyMapping::new("version", DataType::Integer).not_null())
        .version(VersionMapping::new("version", "version", DataType::Integer));
        EntityMetadata::build(mapping, &AnsiDialect).unwrap()
    }

    #[test]
    fn test_insert_appends_key_last() {
        let meta = versioned_account();
        let sql = generate_insert(&meta, &AnsiDialect, "Account", &meta.insertability(), 0, false);
        assert_eq!(
            sql,
            "/* insert Account */ insert into account (balance, version, id) values (?, ?, ?)"
        );
    }

    #[test]
    fn test_identity_insert_omits_key() {
        let meta = versioned_account();
        let sql = generate_insert(&meta, &AnsiDialect, "Account", &meta.insertability(), 0, true);
        assert_eq!(
            sql,
            "/* insert Account */ insert into account (balance, version) values (?, ?)"
        );
    }

    #[test]
    fn test_lob_columns_render_last() {
        let mapping = EntityMapping::new(
            "Document",
            TableMapping::new("document", vec!["id".into()]),
            IdentifierMapping::new("id", "id", DataType::Integer),
        )
        .property(PropertyMapping::new("body", DataType::Blob))
        .property(PropertyMapping::new("title", DataType::Text));
        let meta = EntityMetadata::build(mapping, &AnsiDialect).unwrap();
        let sql = generate_insert(&meta, &AnsiDialect, "Document", &meta.insertability(), 0, false);
        assert_eq!(
            sql,
            "/* insert Document */ insert into document (title, id, body) values (?, ?, ?)"
        );
        let update =
            generate_update(&meta, &AnsiDialect, "Document", &meta.updatability(), 0, None, false)
                .unwrap();
        assert_eq!(
            update,
            "/* update Document */ update document set title=?, body=? where id=?"
        );
    }

    #[test]
    fn test_versioned_update_checks_version() {
        let meta = versioned_account();
        let sql =
            generate_update(&meta, &AnsiDialect, "Account", &meta.updatability(), 0, None, false)
                .unwrap();
        assert_eq!(
            sql,
            "/* update Account */ update account set balance=?, version=? where id=? and version=?"
        );
    }

    #[test]
    fn test_dirty_style_update_keys_by_old_values() {
        let mapping = EntityMapping::new(
            "Note",
            TableMapping::new("note", vec!["id".into()]),
            IdentifierMapping::new("id", "id", DataType::Integer),
        )
        .property(PropertyMapping::new("title", DataType::Text))
        .property(PropertyMapping::new("body", DataType::Text))
        .optimistic_lock(OptimisticLockStyle::Dirty)
        .dynamic_update();
        let meta = EntityMetadata::build(mapping, &AnsiDialect).unwrap();
        let include = vec![true, false];
        let old = vec![Value::Text("old".into()), Value::Null];
        let sql =
            generate_update(&meta, &AnsiDialect, "Note", &include, 0, Some(&old), false).unwrap();
        assert_eq!(
            sql,
            "/* update Note */ update note set title=? where id=? and title=?"
        );
    }

    #[test]
    fn test_all_style_keys_by_every_updatable_old_value() {
        let mapping = EntityMapping::new(
            "Note",
            TableMapping::new("note", vec!["id".into()]),
            IdentifierMapping::new("id", "id", DataType::Integer),
        )
        .property(PropertyMapping::new("title", DataType::Text))
        .property(PropertyMapping::new("body", DataType::Text))
        .optimistic_lock(OptimisticLockStyle::All);
        let meta = EntityMetadata::build(mapping, &AnsiDialect).unwrap();
        let include = vec![true, false];
        let old = vec![Value::Text("old".into()), Value::Null];
        let sql =
            generate_update(&meta, &AnsiDialect, "Note", &include, 0, Some(&old), false).unwrap();
        assert_eq!(
            sql,
            "/* update Note */ update note set title=? where id=? and title=? and body is null"
        );
    }

    #[test]
    fn test_update_none_when_table_has_no_columns() {
        let meta = versioned_account();
        // nothing included -> no SET list -> no statement
        let sql = generate_update(
            &meta,
            &AnsiDialect,
            "Account",
            &[false, false],
            0,
            None,
            false,
        );
        assert!(sql.is_none());
    }

    #[test]
    fn test_versioned_delete() {
        let meta = versioned_account();
        let sql = generate_delete(&meta, 0, true);
        assert_eq!(
            sql,
            "/* delete Account */ delete from account where id=? and version=?"
        );
    }

    #[test]
    fn test_version_select() {
        let meta = versioned_account();
        assert_eq!(
            generate_version_select(&meta),
            "/* get version Account */ select version from account where id=?"
        );
    }

    #[test]
    fn test_snapshot_select_shape() {
        let meta = versioned_account();
        let (sql, layout) = generate_snapshot_select(&meta, &AnsiDialect);
        assert!(sql.contains("select a0_.id, a0_.balance, a0_.version from account a0_"));
        assert_eq!(layout.len(), 3);
    }

    #[test]
    fn test_statement_set_builds() {
        let meta = versioned_account();
        let set = StatementSet::build(&meta, &AnsiDialect).unwrap();
        let stmts = set.for_entity("Account").unwrap();
        assert_eq!(stmts.write_tables, vec![0]);
        assert_eq!(stmts.inserts.len(), 1);
        assert!(stmts.updates[0].is_some());
        assert!(stmts.identity_insert.is_none());
        assert!(stmts.table_has_columns[0]);
    }
}
