//! Table topology: the per-inheritance-strategy answers the persister needs
//! about tables, joins and discriminators. One algorithm in the persister,
//! three implementations of this trait.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::core::{PersistError, Result, Value};
use crate::dialect::Dialect;
use crate::meta::mapping::InheritanceKind;

/// One physical table in the hierarchy's closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub key_columns: Vec<String>,
    pub optional: bool,
    pub inverse: bool,
    pub cascade_delete: bool,
    /// Entity that declared the table.
    pub owner: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    /// The table does not participate in this select at all.
    None,
}

/// Root-first entity hierarchy bookkeeping shared by the topology
/// implementations.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    entities: Vec<String>,
    parents: HashMap<String, String>,
}

impl Hierarchy {
    pub fn new(root: String, subclasses: Vec<(String, Option<String>)>) -> Result<Self> {
        let mut entities = vec![root.clone()];
        let mut parents = HashMap::new();
        for (name, extends) in subclasses {
            let parent = extends.unwrap_or_else(|| root.clone());
            if !entities.contains(&parent) {
                return Err(PersistError::Mapping(format!(
                    "Subclass '{}' extends unknown entity '{}' (parents must be declared first)",
                    name, parent
                )));
            }
            if entities.contains(&name) {
                return Err(PersistError::Mapping(format!("Duplicate entity name '{}'", name)));
            }
            parents.insert(name.clone(), parent);
            entities.push(name);
        }
        Ok(Self { entities, parents })
    }

    pub fn root(&self) -> &str {
        &self.entities[0]
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.iter().any(|e| e == entity)
    }

    pub fn index_of(&self, entity: &str) -> Option<usize> {
        self.entities.iter().position(|e| e == entity)
    }

    /// Chain from the root down to `entity`, inclusive.
    pub fn ancestry<'a>(&'a self, entity: &'a str) -> Result<Vec<&'a str>> {
        if !self.contains(entity) {
            return Err(PersistError::Mapping(format!(
                "'{}' is not part of the '{}' hierarchy",
                entity,
                self.root()
            )));
        }
        let mut chain = vec![entity];
        let mut current = entity;
        while let Some(parent) = self.parents.get(current) {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn is_assignable(&self, ancestor: &str, entity: &str) -> bool {
        self.ancestry(entity)
            .map(|chain| chain.contains(&ancestor))
            .unwrap_or(false)
    }
}

/// Explicit discriminator bookkeeping: where the value lives and the
/// value-to-entity resolution in both directions.
#[derive(Debug, Clone)]
pub struct DiscriminatorInfo {
    pub column: Option<String>,
    pub formula: Option<String>,
    /// Per entity: stored value and its SQL literal rendering.
    pub values: Vec<(String, Value, String)>,
}

impl DiscriminatorInfo {
    pub fn literal_for(&self, entity: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _, _)| name == entity)
            .map(|(_, _, literal)| literal.as_str())
    }

    pub fn value_for(&self, entity: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _, _)| name == entity)
            .map(|(_, value, _)| value)
    }

    pub fn resolve(&self, value: &Value) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, stored, _)| stored == value)
            .map(|(name, _, _)| name.as_str())
    }
}

/// The per-strategy hooks. Table index space is the full subclass closure;
/// index 0 is always the root (driving) table.
pub trait TableTopology: Send + Sync + fmt::Debug {
    fn inheritance(&self) -> InheritanceKind;

    fn tables(&self) -> &[TableInfo];

    fn table_span(&self) -> usize {
        self.tables().len()
    }

    fn table(&self, j: usize) -> &TableInfo {
        &self.tables()[j]
    }

    fn hierarchy(&self) -> &Hierarchy;

    fn has_subclasses(&self) -> bool {
        self.hierarchy().entities().len() > 1
    }

    /// Indices of the tables written when persisting an instance of
    /// `entity`, in insert order (superclass tables first).
    fn tables_for_entity(&self, entity: &str) -> Result<Vec<usize>>;

    /// Whether a property owned by table `prop_table` and declared by
    /// `declared_by` is written through table `j` of the current write set.
    fn property_writes_to(&self, prop_table: usize, declared_by: &str, j: usize) -> bool {
        let _ = declared_by;
        prop_table == j
    }

    /// Whether table `j` belongs to the root chain (as opposed to a pure
    /// subclass table).
    fn is_class_or_superclass_table(&self, j: usize) -> bool;

    /// Join decision for table `j` in a polymorphic select. TREAT-AS
    /// declarations force inner joins and take precedence over
    /// `include_subclasses`.
    fn join_kind(&self, j: usize, include_subclasses: bool, treat_as: &HashSet<String>) -> JoinKind;

    /// From-clause fragment for the driving position (the root table, or the
    /// polymorphic UNION subquery).
    fn from_fragment(&self, alias: &str, include_subclasses: bool) -> String {
        let _ = include_subclasses;
        format!("{} {}", self.table(0).name, alias)
    }

    /// Select-list expression producing the discriminator, aliased per table.
    fn discriminator_fragment(
        &self,
        alias_of: &dyn Fn(usize) -> String,
        dialect: &dyn Dialect,
    ) -> Option<String>;

    /// Column and value physically stored on insert, when the discriminator
    /// is a real column.
    fn discriminator_insert(&self, entity: &str) -> Option<(usize, String, Value)>;

    /// SQL literal a query would compare the discriminator against for
    /// `entity`.
    fn discriminator_literal(&self, entity: &str) -> Option<String>;

    /// Map a hydrated discriminator value to the concrete entity name.
    fn resolve_subclass(&self, value: &Value) -> Result<&str>;
}

/// Render a discriminator value as a SQL literal.
pub fn sql_literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::Text(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        other => Err(PersistError::Mapping(format!(
            "{} cannot be rendered as a discriminator literal",
            other.type_name()
        ))),
    }
}

/// Shared TREAT-AS test: table `j` is required when some requested entity's
/// ancestry contains the entity owning the table.
pub fn table_indicated_by_treat_as(
    hierarchy: &Hierarchy,
    owner: &str,
    treat_as: &HashSet<String>,
) -> bool {
    treat_as.iter().any(|t| hierarchy.is_assignable(owner, t))
}
