//! Joined-subclass inheritance: one table per hierarchy level, joined
//! root-to-leaf on the shared primary key. The discriminator is either an
//! explicit column on the root table or derived with a CASE over not-null
//! probes of each level's key column (most-derived level wins).

use std::collections::HashSet;

use crate::core::{PersistError, Result, Value};
use crate::dialect::Dialect;
use crate::meta::mapping::InheritanceKind;
use crate::meta::topology::{
    DiscriminatorInfo, Hierarchy, JoinKind, TableInfo, TableTopology, table_indicated_by_treat_as,
};

#[derive(Debug)]
pub struct JoinedTopology {
    /// Natural order: root table first, then subclass tables in declaration
    /// order. Inserts walk this order, deletes walk it backwards.
    tables: Vec<TableInfo>,
    hierarchy: Hierarchy,
    /// Entity index -> owning table index.
    table_of_entity: Vec<usize>,
    explicit_discriminator: Option<DiscriminatorInfo>,
}

impl JoinedTopology {
    pub fn new(
        tables: Vec<TableInfo>,
        hierarchy: Hierarchy,
        table_of_entity: Vec<usize>,
        explicit_discriminator: Option<DiscriminatorInfo>,
    ) -> Self {
        Self { tables, hierarchy, table_of_entity, explicit_discriminator }
    }

    fn entity_index(&self, entity: &str) -> Result<usize> {
        self.hierarchy.index_of(entity).ok_or_else(|| {
            PersistError::Mapping(format!(
                "'{}' is not part of the '{}' hierarchy",
                entity,
                self.hierarchy.root()
            ))
        })
    }
}

impl TableTopology for JoinedTopology {
    fn inheritance(&self) -> InheritanceKind {
        InheritanceKind::Joined
    }

    fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    fn tables_for_entity(&self, entity: &str) -> Result<Vec<usize>> {
        let mut indices = Vec::new();
        for level in self.hierarchy.ancestry(entity)? {
            let e = self.entity_index(level)?;
            indices.push(self.table_of_entity[e]);
        }
        indices.sort_unstable();
        Ok(indices)
    }

    fn is_class_or_superclass_table(&self, j: usize) -> bool {
        j == 0
    }

    fn join_kind(&self, j: usize, include_subclasses: bool, treat_as: &HashSet<String>) -> JoinKind {
        if j == 0 {
            return JoinKind::Inner;
        }
        let table = &self.tables[j];
        // TREAT-AS outranks the include-subclasses default
        if table_indicated_by_treat_as(&self.hierarchy, &table.owner, treat_as) {
            return JoinKind::Inner;
        }
        if include_subclasses {
            JoinKind::LeftOuter
        } else {
            JoinKind::None
        }
    }

    fn discriminator_fragment(
        &self,
        alias_of: &dyn Fn(usize) -> String,
        dialect: &dyn Dialect,
    ) -> Option<String> {
        if !self.has_subclasses() {
            return None;
        }
        if let Some(info) = &self.explicit_discriminator {
            let column = info.column.as_ref()?;
            return Some(format!("{}.{}", alias_of(0), column));
        }
        // implicit: probe key columns most-derived-first so the deepest
        // matching level decides the subtype
        let mut arms = Vec::new();
        for e in (0..self.hierarchy.entities().len()).rev() {
            let j = self.table_of_entity[e];
            let key = &self.tables[j].key_columns[0];
            arms.push((format!("{}.{}", alias_of(j), key), e.to_string()));
        }
        Some(dialect.case_when_not_null(&arms))
    }

    fn discriminator_insert(&self, entity: &str) -> Option<(usize, String, Value)> {
        let info = self.explicit_discriminator.as_ref()?;
        let column = info.column.as_ref()?;
        info.value_for(entity).map(|v| (0, column.clone(), v.clone()))
    }

    fn discriminator_literal(&self, entity: &str) -> Option<String> {
        if let Some(info) = &self.explicit_discriminator {
            return info.literal_for(entity).map(str::to_string);
        }
        self.hierarchy.index_of(entity).map(|e| e.to_string())
    }

    fn resolve_subclass(&self, value: &Value) -> Result<&str> {
        if !self.has_subclasses() {
            return Ok(self.hierarchy.root());
        }
        if let Some(info) = &self.explicit_discriminator {
            return info.resolve(value).ok_or_else(|| {
                PersistError::Mapping(format!(
                    "Unknown discriminator value {} for entity '{}'",
                    value,
                    self.hierarchy.root()
                ))
            });
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
                "Implicit discriminator must be an integer subclass id, got {}",
                other.type_name()
            ))),
        }
    }
}
