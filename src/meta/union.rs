//! Union-subclass inheritance: every concrete class owns a complete,
//! independent table. Polymorphic reads go through a UNION ALL subquery that
//! pads each branch with nulls for the columns it does not carry and tags the
//! rows with a synthetic integer `clazz_` discriminator.

use std::collections::HashSet;

use crate::core::{PersistError, Result, Value};
use crate::dialect::Dialect;
use crate::meta::mapping::InheritanceKind;
use crate::meta::topology::{Hierarchy, JoinKind, TableInfo, TableTopology};

pub const UNION_DISCRIMINATOR_COLUMN: &str = "clazz_";

#[derive(Debug)]
pub struct UnionTopology {
    /// One table per entity, hierarchy order: index j belongs to entity j.
    tables: Vec<TableInfo>,
    hierarchy: Hierarchy,
    /// Pre-rendered polymorphic subquery (without surrounding parentheses).
    subquery: String,
}

impl UnionTopology {
    pub fn new(tables: Vec<TableInfo>, hierarchy: Hierarchy, subquery: String) -> Self {
        Self { tables, hierarchy, subquery }
    }
}

impl TableTopology for UnionTopology {
    fn inheritance(&self) -> InheritanceKind {
        InheritanceKind::Union
    }

    fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    fn tables_for_entity(&self, entity: &str) -> Result<Vec<usize>> {
        let e = self.hierarchy.index_of(entity).ok_or_else(|| {
            PersistError::Mapping(format!(
                "'{}' is not part of the '{}' hierarchy",
                entity,
                self.hierarchy.root()
            ))
        })?;
        Ok(vec![e])
    }

    /// Each concrete table carries the full inherited column set: a property
    /// writes through table `j` when the table's entity inherits it.
    fn property_writes_to(&self, _prop_table: usize, declared_by: &str, j: usize) -> bool {
        let entity = &self.hierarchy.entities()[j];
        self.hierarchy.is_assignable(declared_by, entity)
    }

    fn is_class_or_superclass_table(&self, j: usize) -> bool {
        j == 0
    }

    fn join_kind(&self, j: usize, _include_subclasses: bool, _treat_as: &HashSet<String>) -> JoinKind {
        // the union subquery is the only driving relation; nothing joins
        if j == 0 { JoinKind::Inner } else { JoinKind::None }
    }

    fn from_fragment(&self, alias: &str, include_subclasses: bool) -> String {
        if include_subclasses && self.has_subclasses() {
            format!("( {} ) {}", self.subquery, alias)
        } else {
            format!("{} {}", self.table(0).name, alias)
        }
    }

    fn discriminator_fragment(
        &self,
        alias_of: &dyn Fn(usize) -> String,
        _dialect: &dyn Dialect,
    ) -> Option<String> {
        if self.has_subclasses() {
            Some(format!("{}.{}", alias_of(0), UNION_DISCRIMINATOR_COLUMN))
        } else {
            None
        }
    }

    fn discriminator_insert(&self, _entity: &str) -> Option<(usize, String, Value)> {
        // synthetic: exists only inside the subquery, never stored
        None
    }

    fn discriminator_literal(&self, entity: &str) -> Option<String> {
        self.hierarchy.index_of(entity).map(|e| e.to_string())
    }

    fn resolve_subclass(&self, value: &Value) -> Result<&str> {
        if !self.has_subclasses() {
            return Ok(self.hierarchy.root());
        }
        match value {
            Value::Integer(i) => self
                .hierarchy
                .entities()
                .get(*i as usize)
                .map(String::as_str)
                .ok_or_else(|| {
                    PersistError::Mapping(format!(
                        "Subclass id {} out of range for entity '{}'",
                        i,
                        self.hierarchy.root()
                    ))
                }),
            other => Err(PersistError::Mapping(format!(
                "Union discriminator must be an integer subclass id, got {}",
                other.type_name()
            ))),
        }
    }
}
