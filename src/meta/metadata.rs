//! The validated, immutable runtime model of one entity hierarchy. Built once
//! at bootstrap from an [`EntityMapping`]; every later SQL generation and
//! marshaling decision reads from here.

use std::collections::HashSet;

use crate::core::{DataType, PersistError, Result, SemanticType, Value};
use crate::dialect::Dialect;
use crate::meta::joined::JoinedTopology;
use crate::meta::mapping::{
    CacheLayout, CascadeStyle, ColumnSource, CustomSql, DiscriminatorSource, EntityMapping,
    FetchMode, IdGeneration, InheritanceKind, OptimisticLockStyle, PropertyKind, PropertyMapping,
    ValueGeneration,
};
use crate::meta::single_table::SingleTableTopology;
use crate::meta::topology::{
    DiscriminatorInfo, Hierarchy, TableInfo, TableTopology, sql_literal,
};
use crate::meta::union::{UNION_DISCRIMINATOR_COLUMN, UnionTopology};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    /// Select-side expression with an `{alias}` placeholder.
    pub read_template: String,
    /// Write-side expression containing exactly one `?`.
    pub write_expr: String,
}

/// One selectable position of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selectable {
    Column(ColumnMetadata),
    /// Derived expression with an `{alias}` placeholder; select-only.
    Formula(String),
}

impl Selectable {
    pub fn read_template(&self) -> &str {
        match self {
            Self::Column(c) => &c.read_template,
            Self::Formula(f) => f,
        }
    }

    pub fn as_column(&self) -> Option<&ColumnMetadata> {
        match self {
            Self::Column(c) => Some(c),
            Self::Formula(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyMetadata {
    pub name: String,
    pub semantic: SemanticType,
    pub table_index: usize,
    pub selectables: Vec<Selectable>,
    pub insertable: bool,
    pub updatable: bool,
    pub nullable: bool,
    pub unique: bool,
    pub lazy_group: Option<String>,
    pub optimistic_locked: bool,
    pub kind: PropertyKind,
    pub generated: ValueGeneration,
    pub cascade: CascadeStyle,
    pub fetch: FetchMode,
    pub declared_by: String,
}

impl PropertyMetadata {
    pub fn is_lazy(&self) -> bool {
        self.lazy_group.is_some()
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.kind, PropertyKind::Collection { .. })
    }

    /// A property with zero selectable columns never appears in a select
    /// list.
    pub fn is_selectable(&self) -> bool {
        !self.selectables.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.selectables
            .iter()
            .filter_map(|s| s.as_column().map(|c| c.name.as_str()))
            .collect()
    }

    pub fn has_columns(&self) -> bool {
        self.selectables.iter().any(|s| s.as_column().is_some())
    }

    pub fn is_lob(&self) -> bool {
        match &self.semantic {
            SemanticType::Basic(dt) => dt.is_lob(),
            SemanticType::Composite(parts) => parts.iter().any(DataType::is_lob),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentifierMetadata {
    pub property_name: String,
    pub columns: Vec<String>,
    pub semantic: SemanticType,
    pub generation: IdGeneration,
}

impl IdentifierMetadata {
    pub fn column_span(&self) -> usize {
        self.columns.len()
    }
}

#[derive(Debug, Clone)]
pub struct VersionMetadata {
    pub property_index: usize,
    pub column: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone)]
pub struct NaturalIdMetadata {
    pub property_indices: Vec<usize>,
    pub mutable: bool,
}

#[derive(Debug)]
pub struct EntityMetadata {
    pub entity_name: String,
    /// Hierarchy path of this persister within the navigable model.
    pub navigable_role: String,
    /// Full subclass closure: root-declared properties first, then each
    /// subclass's declared properties in declaration order.
    pub properties: Vec<PropertyMetadata>,
    pub identifier: IdentifierMetadata,
    pub version: Option<VersionMetadata>,
    pub optimistic_lock: OptimisticLockStyle,
    pub natural_id: Option<NaturalIdMetadata>,
    /// Closure ordinals of LOB-typed properties, in closure order.
    pub lob_properties: Vec<usize>,
    pub dynamic_insert: bool,
    pub dynamic_update: bool,
    pub mutable: bool,
    pub row_id: Option<String>,
    pub custom_insert: Vec<Option<CustomSql>>,
    pub custom_update: Vec<Option<CustomSql>>,
    pub custom_delete: Vec<Option<CustomSql>>,
    pub cache_layout: CacheLayout,
    pub lazy_properties_cacheable: bool,
    pub batch_size: usize,
    pub topology: Box<dyn TableTopology>,
    alias_stem: String,
}

impl EntityMetadata {
    pub fn build(mapping: EntityMapping, dialect: &dyn Dialect) -> Result<Self> {
        Builder { mapping, dialect }.build()
    }

    pub fn property_span(&self) -> usize {
        self.properties.len()
    }

    pub fn property(&self, i: usize) -> &PropertyMetadata {
        &self.properties[i]
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    pub fn version_property(&self) -> Option<usize> {
        self.version.as_ref().map(|v| v.property_index)
    }

    pub fn has_natural_id(&self) -> bool {
        self.natural_id.is_some()
    }

    pub fn has_lazy_properties(&self) -> bool {
        self.properties.iter().any(PropertyMetadata::is_lazy)
    }

    pub fn has_collections(&self) -> bool {
        self.properties.iter().any(PropertyMetadata::is_collection)
    }

    /// Distinct scalar fetch groups, in order of first appearance.
    pub fn fetch_groups(&self) -> Vec<&str> {
        let mut groups = Vec::new();
        for p in &self.properties {
            if p.is_collection() {
                continue;
            }
            if let Some(g) = p.lazy_group.as_deref()
                && !groups.contains(&g)
            {
                groups.push(g);
            }
        }
        groups
    }

    pub fn properties_in_group(&self, group: &str) -> Vec<usize> {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_collection() && p.lazy_group.as_deref() == Some(group))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn alias_stem(&self) -> &str {
        &self.alias_stem
    }

    pub fn table_alias(&self, j: usize) -> String {
        format!("{}{}_", self.alias_stem, j)
    }

    /// Whether closure property `i` is written through table `j`.
    pub fn is_property_of_table(&self, i: usize, j: usize) -> bool {
        let p = &self.properties[i];
        p.has_columns() && self.topology.property_writes_to(p.table_index, &p.declared_by, j)
    }

    /// Whether closure property `i` applies to instances of `entity`.
    pub fn is_property_of_entity(&self, i: usize, entity: &str) -> bool {
        self.topology
            .hierarchy()
            .is_assignable(&self.properties[i].declared_by, entity)
    }

    pub fn insertability(&self) -> Vec<bool> {
        self.properties
            .iter()
            .map(|p| p.insertable && !p.is_collection())
            .collect()
    }

    pub fn updatability(&self) -> Vec<bool> {
        self.properties
            .iter()
            .map(|p| p.updatable && !p.is_collection())
            .collect()
    }

    /// Updatability with lazy properties masked out: the static update used
    /// when an instance still carries unfetched lazy state.
    pub fn non_lazy_updatability(&self) -> Vec<bool> {
        self.properties
            .iter()
            .map(|p| p.updatable && !p.is_collection() && !p.is_lazy())
            .collect()
    }

    pub fn versionability(&self) -> Vec<bool> {
        self.properties
            .iter()
            .map(|p| p.optimistic_locked && !p.is_collection() && p.has_columns())
            .collect()
    }

    /// Validate a state array against the closure: length and per-slot type.
    pub fn check_state(&self, state: &[Value]) -> Result<()> {
        if state.len() != self.properties.len() {
            return Err(PersistError::TypeMismatch(format!(
                "Entity '{}' expects {} properties, got {}",
                self.entity_name,
                self.properties.len(),
                state.len()
            )));
        }
        for (p, v) in self.properties.iter().zip(state) {
            p.semantic.check(&p.name, v)?;
        }
        Ok(())
    }

    pub fn check_id(&self, id: &Value) -> Result<()> {
        self.identifier.semantic.check(&self.identifier.property_name, id)
    }

    /// All properties of table `j` are null (or unfetched) in `state`:
    /// the row is treated as absent for nullable secondary tables.
    pub fn is_all_null(&self, state: &[Value], j: usize) -> bool {
        for (i, p) in self.properties.iter().enumerate() {
            if self.is_property_of_table(i, j) && p.insertable {
                match &state[i] {
                    Value::Null | Value::Unfetched => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

// ============================================================================
// Builder
// ============================================================================

struct Builder<'a> {
    mapping: EntityMapping,
    dialect: &'a dyn Dialect,
}

impl Builder<'_> {
    fn build(self) -> Result<EntityMetadata> {
        let mapping = &self.mapping;
        let root = mapping.entity_name.clone();

        let hierarchy = Hierarchy::new(
            root.clone(),
            mapping
                .subclasses
                .iter()
                .map(|s| (s.entity_name.clone(), s.extends.clone()))
                .collect(),
        )?;

        let (tables, table_of_entity) = self.table_closure()?;

        // property closure: root first, then subclasses in declaration order
        let mut properties = Vec::new();
        for p in &mapping.properties {
            properties.push(self.resolve_property(p, &root, &tables, &table_of_entity, 0)?);
        }
        for (s_idx, sub) in mapping.subclasses.iter().enumerate() {
            for p in &sub.properties {
                properties.push(self.resolve_property(
                    p,
                    &sub.entity_name,
                    &tables,
                    &table_of_entity,
                    s_idx + 1,
                )?);
            }
        }
        self.check_closure(&properties)?;

        let identifier = self.resolve_identifier()?;
        let version = self.resolve_version(&properties)?;
        let optimistic_lock = self.check_lock_style(version.as_ref())?;
        let natural_id = self.resolve_natural_id(&properties, mapping.properties.len())?;

        let lob_properties: Vec<usize> = properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_lob())
            .map(|(i, _)| i)
            .collect();

        let custom_insert = self.resolve_custom(&mapping.custom_insert, &tables)?;
        let custom_update = self.resolve_custom(&mapping.custom_update, &tables)?;
        let custom_delete = self.resolve_custom(&mapping.custom_delete, &tables)?;

        let topology = self.build_topology(
            tables,
            hierarchy,
            table_of_entity,
            &properties,
            &identifier,
        )?;

        let alias_stem = alias_stem(&root);

        Ok(EntityMetadata {
            navigable_role: root.clone(),
            entity_name: root,
            properties,
            identifier,
            version,
            optimistic_lock,
            natural_id,
            lob_properties,
            dynamic_insert: mapping.dynamic_insert,
            dynamic_update: mapping.dynamic_update,
            mutable: mapping.mutable,
            row_id: mapping.row_id.clone(),
            custom_insert,
            custom_update,
            custom_delete,
            cache_layout: mapping.cache_layout,
            lazy_properties_cacheable: mapping.lazy_properties_cacheable,
            batch_size: mapping.batch_size,
            topology,
            alias_stem,
        })
    }

    fn table_closure(&self) -> Result<(Vec<TableInfo>, Vec<usize>)> {
        let mapping = &self.mapping;
        let root = &mapping.entity_name;
        let mut tables = vec![self.table_info(&mapping.table, root)];
        let mut table_of_entity = vec![0];

        match mapping.inheritance {
            InheritanceKind::SingleTable => {
                for sub in &mapping.subclasses {
                    if sub.table.is_some() {
                        return Err(PersistError::Mapping(format!(
                            "Single-table subclass '{}' must not declare its own table",
                            sub.entity_name
                        )));
                    }
                    table_of_entity.push(0);
                }
                for t in &mapping.secondary_tables {
                    tables.push(self.table_info(t, root));
                }
            }
            InheritanceKind::Joined | InheritanceKind::Union => {
                if !mapping.secondary_tables.is_empty() {
                    return Err(PersistError::Mapping(format!(
                        "Secondary tables are only supported for single-table mapping of '{}'",
                        root
                    )));
                }
                for sub in &mapping.subclasses {
                    let table = sub.table.as_ref().ok_or_else(|| {
                        PersistError::Mapping(format!(
                            "Subclass '{}' requires its own table under {:?} inheritance",
                            sub.entity_name, mapping.inheritance
                        ))
                    })?;
                    table_of_entity.push(tables.len());
                    tables.push(self.table_info(table, &sub.entity_name));
                }
                if mapping.inheritance == InheritanceKind::Union
                    && mapping.identifier.generation == IdGeneration::Identity
                {
                    return Err(PersistError::Mapping(format!(
                        "Union inheritance of '{}' cannot use identity id generation",
                        root
                    )));
                }
            }
        }
        Ok((tables, table_of_entity))
    }

    fn table_info(&self, t: &crate::meta::mapping::TableMapping, owner: &str) -> TableInfo {
        TableInfo {
            name: self.dialect.quote_if_needed(&t.name),
            key_columns: t
                .key_columns
                .iter()
                .map(|c| self.dialect.quote_if_needed(c))
                .collect(),
            optional: t.optional,
            inverse: t.inverse,
            cascade_delete: t.cascade_delete,
            owner: owner.to_string(),
        }
    }

    fn resolve_property(
        &self,
        p: &PropertyMapping,
        declared_by: &str,
        tables: &[TableInfo],
        table_of_entity: &[usize],
        entity_index: usize,
    ) -> Result<PropertyMetadata> {
        let mapping = &self.mapping;

        // collections carry no columns here; everything else must agree with
        // its semantic column span
        if p.kind == PropertyKind::Scalar && p.columns.len() != p.semantic.column_span() {
            return Err(PersistError::Mapping(format!(
                "Property '{}' declares {} column(s) but its type spans {}",
                p.name,
                p.columns.len(),
                p.semantic.column_span()
            )));
        }

        let default_table = if mapping.inheritance == InheritanceKind::SingleTable {
            0
        } else {
            table_of_entity[entity_index]
        };
        let table_index = match &p.table {
            None => default_table,
            Some(name) => {
                let quoted = self.dialect.quote_if_needed(name);
                tables
                    .iter()
                    .position(|t| t.name == quoted)
                    .ok_or_else(|| {
                        PersistError::Mapping(format!(
                            "Property '{}' maps to unknown table '{}'",
                            p.name, name
                        ))
                    })?
            }
        };
        // in the union model every table carries the whole closure and the
        // driving alias is the subquery, so all reads go through position 0
        let table_index =
            if mapping.inheritance == InheritanceKind::Union { 0 } else { table_index };

        let has_formula = p.columns.iter().any(|c| matches!(c, ColumnSource::Formula(_)));
        let selectables = p
            .columns
            .iter()
            .map(|c| match c {
                ColumnSource::Column(col) => {
                    let name = self.dialect.quote_if_needed(&col.name);
                    Selectable::Column(ColumnMetadata {
                        read_template: col
                            .read_expr
                            .clone()
                            .unwrap_or_else(|| format!("{{alias}}.{}", name)),
                        write_expr: col.write_expr.clone().unwrap_or_else(|| "?".to_string()),
                        name,
                    })
                }
                ColumnSource::Formula(f) => Selectable::Formula(f.clone()),
            })
            .collect();

        // database-generated columns are never written, only read back
        let db_generated = p.generated.in_database();
        Ok(PropertyMetadata {
            name: p.name.clone(),
            semantic: p.semantic.clone(),
            table_index,
            selectables,
            insertable: p.insertable && !has_formula && !db_generated,
            updatable: p.updatable && !has_formula && !db_generated,
            nullable: p.nullable,
            unique: p.unique,
            lazy_group: p.lazy_group.clone(),
            optimistic_locked: p.optimistic_locked,
            kind: p.kind.clone(),
            generated: p.generated,
            cascade: p.cascade,
            fetch: p.fetch,
            declared_by: declared_by.to_string(),
        })
    }

    fn check_closure(&self, properties: &[PropertyMetadata]) -> Result<()> {
        let mut seen = HashSet::new();
        for p in properties {
            if !seen.insert(p.name.as_str()) {
                return Err(PersistError::Mapping(format!(
                    "Duplicate property '{}' in entity '{}'",
                    p.name, self.mapping.entity_name
                )));
            }
            if p.name == self.mapping.identifier.property {
                return Err(PersistError::Mapping(format!(
                    "Property '{}' collides with the identifier property",
                    p.name
                )));
            }
        }
        Ok(())
    }

    fn resolve_identifier(&self) -> Result<IdentifierMetadata> {
        let id = &self.mapping.identifier;
        if id.columns.is_empty() {
            return Err(PersistError::Mapping(format!(
                "Identifier of '{}' declares no columns",
                self.mapping.entity_name
            )));
        }
        if id.columns.len() != id.semantic.column_span() {
            return Err(PersistError::Mapping(format!(
                "Identifier of '{}' declares {} column(s) but its type spans {}",
                self.mapping.entity_name,
                id.columns.len(),
                id.semantic.column_span()
            )));
        }
        if id.generation == IdGeneration::Identity && id.semantic.column_span() != 1 {
            return Err(PersistError::Mapping(format!(
                "Identity generation requires a single-column identifier on '{}'",
                self.mapping.entity_name
            )));
        }
        Ok(IdentifierMetadata {
            property_name: id.property.clone(),
            columns: id
                .columns
                .iter()
                .map(|c| self.dialect.quote_if_needed(c))
                .collect(),
            semantic: id.semantic.clone(),
            generation: id.generation.clone(),
        })
    }

    fn resolve_version(&self, properties: &[PropertyMetadata]) -> Result<Option<VersionMetadata>> {
        let Some(v) = &self.mapping.version else {
            return Ok(None);
        };
        let index = properties
            .iter()
            .position(|p| p.name == v.property)
            .ok_or_else(|| {
                PersistError::Mapping(format!(
                    "Version property '{}' is not mapped on '{}'",
                    v.property, self.mapping.entity_name
                ))
            })?;
        let p = &properties[index];
        if p.declared_by != self.mapping.entity_name {
            return Err(PersistError::Mapping(format!(
                "Version property '{}' must be declared by the hierarchy root",
                v.property
            )));
        }
        if p.semantic.column_span() != 1 {
            return Err(PersistError::Mapping(format!(
                "Version property '{}' must map to exactly one column",
                v.property
            )));
        }
        if !matches!(v.data_type, DataType::Integer | DataType::Timestamp) {
            return Err(PersistError::Mapping(format!(
                "Version property '{}' must be an integer or timestamp",
                v.property
            )));
        }
        Ok(Some(VersionMetadata {
            property_index: index,
            column: self.dialect.quote_if_needed(&v.column),
            data_type: v.data_type,
        }))
    }

    fn check_lock_style(&self, version: Option<&VersionMetadata>) -> Result<OptimisticLockStyle> {
        let style = self.mapping.optimistic_lock;
        if style == OptimisticLockStyle::Version && version.is_none() {
            return Err(PersistError::Mapping(format!(
                "'{}' requests version-based optimistic locking but maps no version",
                self.mapping.entity_name
            )));
        }
        if style == OptimisticLockStyle::Dirty && !self.mapping.dynamic_update {
            return Err(PersistError::Mapping(format!(
                "Dirty-property optimistic locking on '{}' requires dynamic update",
                self.mapping.entity_name
            )));
        }
        Ok(style)
    }

    fn resolve_natural_id(
        &self,
        properties: &[PropertyMetadata],
        root_span: usize,
    ) -> Result<Option<NaturalIdMetadata>> {
        let Some(n) = &self.mapping.natural_id else {
            return Ok(None);
        };
        if n.properties.is_empty() {
            return Err(PersistError::Mapping(format!(
                "Natural id of '{}' names no properties",
                self.mapping.entity_name
            )));
        }
        let mut indices = Vec::with_capacity(n.properties.len());
        for name in &n.properties {
            let index = properties.iter().position(|p| &p.name == name).ok_or_else(|| {
                PersistError::Mapping(format!(
                    "Natural-id property '{}' is not mapped on '{}'",
                    name, self.mapping.entity_name
                ))
            })?;
            if index >= root_span {
                return Err(PersistError::Mapping(format!(
                    "Natural-id property '{}' must be declared by the hierarchy root",
                    name
                )));
            }
            indices.push(index);
        }
        Ok(Some(NaturalIdMetadata { property_indices: indices, mutable: n.mutable }))
    }

    fn resolve_custom(
        &self,
        overrides: &std::collections::HashMap<String, CustomSql>,
        tables: &[TableInfo],
    ) -> Result<Vec<Option<CustomSql>>> {
        let mut resolved = vec![None; tables.len()];
        for (table, sql) in overrides {
            let quoted = self.dialect.quote_if_needed(table);
            let j = tables.iter().position(|t| t.name == quoted).ok_or_else(|| {
                PersistError::Mapping(format!("Custom SQL targets unknown table '{}'", table))
            })?;
            resolved[j] = Some(sql.clone());
        }
        Ok(resolved)
    }

    fn build_topology(
        &self,
        tables: Vec<TableInfo>,
        hierarchy: Hierarchy,
        table_of_entity: Vec<usize>,
        properties: &[PropertyMetadata],
        identifier: &IdentifierMetadata,
    ) -> Result<Box<dyn TableTopology>> {
        let mapping = &self.mapping;
        match mapping.inheritance {
            InheritanceKind::SingleTable => {
                let discriminator = self.explicit_discriminator(
                    !mapping.subclasses.is_empty(),
                    true,
                )?;
                Ok(Box::new(SingleTableTopology::new(tables, hierarchy, discriminator)))
            }
            InheritanceKind::Joined => {
                let discriminator = self.explicit_discriminator(false, false)?;
                Ok(Box::new(JoinedTopology::new(
                    tables,
                    hierarchy,
                    table_of_entity,
                    discriminator,
                )))
            }
            InheritanceKind::Union => {
                if mapping.discriminator.is_some() {
                    return Err(PersistError::Mapping(format!(
                        "Union inheritance of '{}' uses a synthetic discriminator; do not map one",
                        mapping.entity_name
                    )));
                }
                let subquery =
                    self.union_subquery(&tables, &hierarchy, properties, identifier)?;
                Ok(Box::new(UnionTopology::new(tables, hierarchy, subquery)))
            }
        }
    }

    /// Discriminator bookkeeping for strategies that store one. `required`
    /// forces its presence (single-table with subclasses); joined accepts an
    /// optional explicit column.
    fn explicit_discriminator(
        &self,
        required: bool,
        _allow_formula: bool,
    ) -> Result<Option<DiscriminatorInfo>> {
        let mapping = &self.mapping;
        let Some(d) = &mapping.discriminator else {
            if required {
                return Err(PersistError::Mapping(format!(
                    "Single-table hierarchy '{}' with subclasses requires a discriminator",
                    mapping.entity_name
                )));
            }
            return Ok(None);
        };

        let mut values = Vec::new();
        let root_value = mapping.discriminator_value.clone().ok_or_else(|| {
            PersistError::Mapping(format!(
                "Entity '{}' maps a discriminator but no discriminator value",
                mapping.entity_name
            ))
        })?;
        if !d.data_type.is_compatible(&root_value) {
            return Err(PersistError::Mapping(format!(
                "Discriminator value {} does not match declared type {}",
                root_value, d.data_type
            )));
        }
        values.push((
            mapping.entity_name.clone(),
            root_value.clone(),
            sql_literal(&root_value)?,
        ));
        for sub in &mapping.subclasses {
            let value = sub.discriminator_value.clone().ok_or_else(|| {
                PersistError::Mapping(format!(
                    "Subclass '{}' is missing a discriminator value",
                    sub.entity_name
                ))
            })?;
            if !d.data_type.is_compatible(&value) {
                return Err(PersistError::Mapping(format!(
                    "Discriminator value {} does not match declared type {}",
                    value, d.data_type
                )));
            }
            values.push((sub.entity_name.clone(), value.clone(), sql_literal(&value)?));
        }

        let (column, formula) = match &d.source {
            DiscriminatorSource::Column(c) => (Some(self.dialect.quote_if_needed(c)), None),
            DiscriminatorSource::Formula(f) => (None, Some(f.clone())),
        };
        Ok(Some(DiscriminatorInfo { column, formula, values }))
    }

    /// Render the UNION ALL polymorphic subquery: identical column layout per
    /// branch, nulls where a branch does not carry a column, plus the
    /// synthetic subclass id.
    fn union_subquery(
        &self,
        tables: &[TableInfo],
        hierarchy: &Hierarchy,
        properties: &[PropertyMetadata],
        identifier: &IdentifierMetadata,
    ) -> Result<String> {
        let mut branches = Vec::with_capacity(hierarchy.entities().len());
        for (e, entity) in hierarchy.entities().iter().enumerate() {
            let mut cols: Vec<String> = identifier.columns.clone();
            for p in properties {
                let inherited = hierarchy.is_assignable(&p.declared_by, entity);
                for s in &p.selectables {
                    if let Selectable::Column(c) = s {
                        if inherited {
                            cols.push(c.name.clone());
                        } else {
                            cols.push(format!("null as {}", c.name));
                        }
                    }
                }
            }
            cols.push(format!("{} as {}", e, UNION_DISCRIMINATOR_COLUMN));
            branches.push(format!("select {} from {}", cols.join(", "), tables[e].name));
        }
        Ok(branches.join(" union all "))
    }
}

/// Short lowercase alias stem derived from the entity name, shared by every
/// generated alias of the hierarchy (`a0_`, `a1_`, ...).
pub fn alias_stem(entity_name: &str) -> String {
    entity_name
        .chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase().to_string())
        .unwrap_or_else(|| "t".to_string())
}
