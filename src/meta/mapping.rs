//! Boot-time mapping descriptions. These are what the application hands the
//! engine; `EntityMetadata::build` validates them into the immutable runtime
//! model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::{DataType, SemanticType, Value};
use crate::exec::Expectation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InheritanceKind {
    SingleTable,
    Joined,
    Union,
}

/// Identifier generation strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdGeneration {
    /// The caller supplies the identifier.
    Assigned,
    /// The database generates it on insert (identity/auto-increment column).
    Identity,
    /// Drawn from a named database sequence before the insert.
    Sequence(String),
    /// Generated in memory as a random UUID.
    UuidV4,
}

impl IdGeneration {
    /// Identity inserts must read the generated key straight back, so they
    /// can never ride a delayed batch.
    pub fn supports_batched_inserts(&self) -> bool {
        !matches!(self, Self::Identity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimisticLockStyle {
    None,
    #[default]
    Version,
    /// WHERE clause carries the old values of the dirty properties.
    Dirty,
    /// WHERE clause carries the old values of all updatable properties.
    All,
}

impl OptimisticLockStyle {
    pub fn is_all_or_dirty(&self) -> bool {
        matches!(self, Self::All | Self::Dirty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CascadeStyle {
    #[default]
    None,
    Persist,
    Delete,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FetchMode {
    #[default]
    Select,
    Join,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    Scalar,
    /// A collection attribute: no columns on the entity's tables; keyed by
    /// the owning entity and persisted by an external collection persister.
    Collection { role: String },
}

/// Value generation applied around writes: in memory before the statement
/// runs (creation and modification timestamps, generated UUID codes), or in
/// the database itself (defaults/triggers), in which case the column is
/// omitted from the insert and re-selected afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValueGeneration {
    #[default]
    Never,
    TimestampOnInsert,
    TimestampAlways,
    UuidOnInsert,
    DatabaseOnInsert,
}

impl ValueGeneration {
    /// In-memory generation participating in the insert.
    pub fn includes_insert(&self) -> bool {
        matches!(self, Self::TimestampOnInsert | Self::TimestampAlways | Self::UuidOnInsert)
    }

    pub fn includes_update(&self) -> bool {
        matches!(self, Self::TimestampAlways)
    }

    pub fn in_database(&self) -> bool {
        matches!(self, Self::DatabaseOnInsert)
    }

    pub fn generate(&self) -> Value {
        match self {
            Self::Never | Self::DatabaseOnInsert => Value::Null,
            Self::TimestampOnInsert | Self::TimestampAlways => {
                Value::Timestamp(chrono::Utc::now())
            }
            Self::UuidOnInsert => Value::Uuid(uuid::Uuid::new_v4()),
        }
    }
}

/// How an entity's state is represented in the second-level cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheLayout {
    #[default]
    Disabled,
    /// Compact binary disassembled state array.
    Standard,
    /// Typed per-property map.
    Structured,
    /// The assembled state itself; only valid for immutable entities without
    /// associations.
    Reference,
}

/// One mapped column, optionally with custom read/write SQL expressions.
/// `read_expr` is a full expression with an `{alias}` placeholder; `write_expr`
/// contains exactly one `?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub name: String,
    pub read_expr: Option<String>,
    pub write_expr: Option<String>,
}

impl ColumnMapping {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), read_expr: None, write_expr: None }
    }

    pub fn read_expr(mut self, expr: impl Into<String>) -> Self {
        self.read_expr = Some(expr.into());
        self
    }

    pub fn write_expr(mut self, expr: impl Into<String>) -> Self {
        self.write_expr = Some(expr.into());
        self
    }
}

/// A selectable position of a property: a real column or a derived formula
/// (select-only, `{alias}` placeholder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnSource {
    Column(ColumnMapping),
    Formula(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMapping {
    pub name: String,
    pub semantic: SemanticType,
    /// Owning table; `None` means the entity's primary table.
    pub table: Option<String>,
    pub columns: Vec<ColumnSource>,
    pub insertable: bool,
    pub updatable: bool,
    pub nullable: bool,
    pub unique: bool,
    /// `Some(group)` marks the property lazy, fetched with its group.
    pub lazy_group: Option<String>,
    /// Participates in ALL/DIRTY optimistic-lock WHERE clauses.
    pub optimistic_locked: bool,
    pub kind: PropertyKind,
    pub generated: ValueGeneration,
    pub cascade: CascadeStyle,
    pub fetch: FetchMode,
}

impl PropertyMapping {
    /// Scalar property mapped to a single column named after itself.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            columns: vec![ColumnSource::Column(ColumnMapping::new(name.clone()))],
            name,
            semantic: SemanticType::Basic(data_type),
            table: None,
            insertable: true,
            updatable: true,
            nullable: true,
            unique: false,
            lazy_group: None,
            optimistic_locked: true,
            kind: PropertyKind::Scalar,
            generated: ValueGeneration::Never,
            cascade: CascadeStyle::None,
            fetch: FetchMode::Select,
        }
    }

    pub fn composite<S: Into<String>>(
        name: impl Into<String>,
        parts: Vec<(S, DataType)>,
    ) -> Self {
        let mut types = Vec::with_capacity(parts.len());
        let mut columns = Vec::with_capacity(parts.len());
        for (col, dt) in parts {
            types.push(dt);
            columns.push(ColumnSource::Column(ColumnMapping::new(col)));
        }
        Self {
            semantic: SemanticType::Composite(types),
            columns,
            ..Self::new(name, DataType::Integer)
        }
    }

    /// Derived read-only property computed by a SQL formula.
    pub fn formula(name: impl Into<String>, data_type: DataType, expr: impl Into<String>) -> Self {
        Self {
            columns: vec![ColumnSource::Formula(expr.into())],
            insertable: false,
            updatable: false,
            ..Self::new(name, data_type)
        }
    }

    /// Collection attribute: keyed by the owner, no columns here.
    pub fn collection(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            kind: PropertyKind::Collection { role: role.into() },
            insertable: false,
            updatable: false,
            lazy_group: Some("collections".into()),
            ..Self::new(name, DataType::Integer)
        }
    }

    pub fn column(mut self, column: ColumnMapping) -> Self {
        self.columns = vec![ColumnSource::Column(column)];
        self
    }

    pub fn in_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn lazy(mut self, group: impl Into<String>) -> Self {
        self.lazy_group = Some(group.into());
        self
    }

    pub fn not_insertable(mut self) -> Self {
        self.insertable = false;
        self
    }

    pub fn not_updatable(mut self) -> Self {
        self.updatable = false;
        self
    }

    pub fn exclude_from_lock(mut self) -> Self {
        self.optimistic_locked = false;
        self
    }

    pub fn generated(mut self, generation: ValueGeneration) -> Self {
        self.generated = generation;
        self
    }

    pub fn cascade(mut self, style: CascadeStyle) -> Self {
        self.cascade = style;
        self
    }

    pub fn fetch(mut self, mode: FetchMode) -> Self {
        self.fetch = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub name: String,
    pub key_columns: Vec<String>,
    /// A row in this table may legitimately be absent (all-null secondary
    /// table); zero affected rows is not a stale-state failure here.
    pub optional: bool,
    /// Owned elsewhere; this entity never writes it.
    pub inverse: bool,
    /// The database cascades deletes from the parent row.
    pub cascade_delete: bool,
}

impl TableMapping {
    pub fn new(name: impl Into<String>, key_columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            key_columns,
            optional: false,
            inverse: false,
            cascade_delete: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn inverse(mut self) -> Self {
        self.inverse = true;
        self
    }

    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    pub property: String,
    pub columns: Vec<String>,
    pub semantic: SemanticType,
    pub generation: IdGeneration,
}

impl IdentifierMapping {
    pub fn new(property: impl Into<String>, column: impl Into<String>, data_type: DataType) -> Self {
        Self {
            property: property.into(),
            columns: vec![column.into()],
            semantic: SemanticType::Basic(data_type),
            generation: IdGeneration::Assigned,
        }
    }

    pub fn generation(mut self, generation: IdGeneration) -> Self {
        self.generation = generation;
        self
    }

    pub fn composite<S: Into<String>>(
        property: impl Into<String>,
        parts: Vec<(S, DataType)>,
    ) -> Self {
        let mut types = Vec::with_capacity(parts.len());
        let mut columns = Vec::with_capacity(parts.len());
        for (col, dt) in parts {
            types.push(dt);
            columns.push(col.into());
        }
        Self {
            property: property.into(),
            columns,
            semantic: SemanticType::Composite(types),
            generation: IdGeneration::Assigned,
        }
    }
}

/// The version property must also appear in the property list; this names it
/// and its column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMapping {
    pub property: String,
    pub column: String,
    pub data_type: DataType,
}

impl VersionMapping {
    pub fn new(property: impl Into<String>, column: impl Into<String>, data_type: DataType) -> Self {
        Self { property: property.into(), column: column.into(), data_type }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaturalIdMapping {
    pub properties: Vec<String>,
    pub mutable: bool,
}

impl NaturalIdMapping {
    pub fn new(properties: Vec<String>) -> Self {
        Self { properties, mutable: false }
    }

    pub fn mutable(mut self) -> Self {
        self.mutable = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscriminatorSource {
    Column(String),
    Formula(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscriminatorMapping {
    pub source: DiscriminatorSource,
    pub data_type: DataType,
}

impl DiscriminatorMapping {
    pub fn column(name: impl Into<String>, data_type: DataType) -> Self {
        Self { source: DiscriminatorSource::Column(name.into()), data_type }
    }

    pub fn formula(expr: impl Into<String>, data_type: DataType) -> Self {
        Self { source: DiscriminatorSource::Formula(expr.into()), data_type }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubclassMapping {
    pub entity_name: String,
    /// Parent entity; `None` means the hierarchy root. Parents must be
    /// declared before children.
    pub extends: Option<String>,
    /// Own table for joined/union inheritance; unused for single-table.
    pub table: Option<TableMapping>,
    pub discriminator_value: Option<Value>,
    pub properties: Vec<PropertyMapping>,
}

impl SubclassMapping {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            extends: None,
            table: None,
            discriminator_value: None,
            properties: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    pub fn table(mut self, table: TableMapping) -> Self {
        self.table = Some(table);
        self
    }

    pub fn discriminator_value(mut self, value: Value) -> Self {
        self.discriminator_value = Some(value);
        self
    }

    pub fn property(mut self, property: PropertyMapping) -> Self {
        self.properties.push(property);
        self
    }
}

/// Custom SQL override for one table's insert/update/delete. `[ident]`
/// brackets are substituted with dialect quoting before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomSql {
    pub sql: String,
    pub check: Expectation,
}

impl CustomSql {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), check: Expectation::RowCount }
    }

    pub fn unchecked(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), check: Expectation::None }
    }
}

/// Complete boot description of one entity hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMapping {
    pub entity_name: String,
    pub inheritance: InheritanceKind,
    pub table: TableMapping,
    pub secondary_tables: Vec<TableMapping>,
    pub properties: Vec<PropertyMapping>,
    pub identifier: IdentifierMapping,
    pub version: Option<VersionMapping>,
    pub optimistic_lock: OptimisticLockStyle,
    pub natural_id: Option<NaturalIdMapping>,
    pub discriminator: Option<DiscriminatorMapping>,
    pub discriminator_value: Option<Value>,
    pub subclasses: Vec<SubclassMapping>,
    pub dynamic_insert: bool,
    pub dynamic_update: bool,
    pub mutable: bool,
    pub row_id: Option<String>,
    pub custom_insert: HashMap<String, CustomSql>,
    pub custom_update: HashMap<String, CustomSql>,
    pub custom_delete: HashMap<String, CustomSql>,
    pub cache_layout: CacheLayout,
    pub lazy_properties_cacheable: bool,
    /// Chunk size for multi-identifier (batch) fetching; 1 disables it.
    pub batch_size: usize,
}

impl EntityMapping {
    pub fn new(entity_name: impl Into<String>, table: TableMapping, identifier: IdentifierMapping) -> Self {
        Self {
            entity_name: entity_name.into(),
            inheritance: InheritanceKind::SingleTable,
            table,
            secondary_tables: Vec::new(),
            properties: Vec::new(),
            identifier,
            version: None,
            optimistic_lock: OptimisticLockStyle::None,
            natural_id: None,
            discriminator: None,
            discriminator_value: None,
            subclasses: Vec::new(),
            dynamic_insert: false,
            dynamic_update: false,
            mutable: true,
            row_id: None,
            custom_insert: HashMap::new(),
            custom_update: HashMap::new(),
            custom_delete: HashMap::new(),
            cache_layout: CacheLayout::Disabled,
            lazy_properties_cacheable: true,
            batch_size: 1,
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn inheritance(mut self, kind: InheritanceKind) -> Self {
        self.inheritance = kind;
        self
    }

    pub fn property(mut self, property: PropertyMapping) -> Self {
        self.properties.push(property);
        self
    }

    pub fn secondary_table(mut self, table: TableMapping) -> Self {
        self.secondary_tables.push(table);
        self
    }

    pub fn version(mut self, version: VersionMapping) -> Self {
        self.version = Some(version);
        self.optimistic_lock = OptimisticLockStyle::Version;
        self
    }

    pub fn optimistic_lock(mut self, style: OptimisticLockStyle) -> Self {
        self.optimistic_lock = style;
        self
    }

    pub fn natural_id(mut self, natural_id: NaturalIdMapping) -> Self {
        self.natural_id = Some(natural_id);
        self
    }

    pub fn discriminator(mut self, discriminator: DiscriminatorMapping, own_value: Value) -> Self {
        self.discriminator = Some(discriminator);
        self.discriminator_value = Some(own_value);
        self
    }

    pub fn subclass(mut self, subclass: SubclassMapping) -> Self {
        self.subclasses.push(subclass);
        self
    }

    pub fn dynamic_insert(mut self) -> Self {
        self.dynamic_insert = true;
        self
    }

    pub fn dynamic_update(mut self) -> Self {
        self.dynamic_update = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    pub fn row_id(mut self, column: impl Into<String>) -> Self {
        self.row_id = Some(column.into());
        self
    }

    pub fn custom_insert(mut self, table: impl Into<String>, sql: CustomSql) -> Self {
        self.custom_insert.insert(table.into(), sql);
        self
    }

    pub fn custom_update(mut self, table: impl Into<String>, sql: CustomSql) -> Self {
        self.custom_update.insert(table.into(), sql);
        self
    }

    pub fn custom_delete(mut self, table: impl Into<String>, sql: CustomSql) -> Self {
        self.custom_delete.insert(table.into(), sql);
        self
    }

    pub fn cache(mut self, layout: CacheLayout) -> Self {
        self.cache_layout = layout;
        self
    }
}
