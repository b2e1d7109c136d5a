//! Single-table inheritance: the whole hierarchy lives in one table, a
//! discriminator column or formula tells the subtypes apart, optional
//! secondary tables hang off the primary key.

use std::collections::HashSet;

use crate::core::{PersistError, Result, Value};
use crate::dialect::Dialect;
use crate::meta::mapping::InheritanceKind;
use crate::meta::topology::{
    DiscriminatorInfo, Hierarchy, JoinKind, TableInfo, TableTopology, table_indicated_by_treat_as,
};

#[derive(Debug)]
pub struct SingleTableTopology {
    tables: Vec<TableInfo>,
    hierarchy: Hierarchy,
    discriminator: Option<DiscriminatorInfo>,
    write_set: Vec<usize>,
}

impl SingleTableTopology {
    pub fn new(
        tables: Vec<TableInfo>,
        hierarchy: Hierarchy,
        discriminator: Option<DiscriminatorInfo>,
    ) -> Self {
        let write_set = (0..tables.len()).collect();
        Self { tables, hierarchy, discriminator, write_set }
    }
}

impl TableTopology for SingleTableTopology {
    fn inheritance(&self) -> InheritanceKind {
        InheritanceKind::SingleTable
    }

    fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    fn tables_for_entity(&self, entity: &str) -> Result<Vec<usize>> {
        // every concrete type writes the primary table and the secondaries
        self.hierarchy.ancestry(entity)?;
        Ok(self.write_set.clone())
    }

    fn is_class_or_superclass_table(&self, _j: usize) -> bool {
        true
    }

    fn join_kind(&self, j: usize, _include_subclasses: bool, treat_as: &HashSet<String>) -> JoinKind {
        if j == 0 {
            return JoinKind::Inner;
        }
        let table = &self.tables[j];
        if table_indicated_by_treat_as(&self.hierarchy, &table.owner, treat_as) {
            return JoinKind::Inner;
        }
        if table.optional || table.inverse {
            JoinKind::LeftOuter
        } else {
            JoinKind::Inner
        }
    }

    fn discriminator_fragment(
        &self,
        alias_of: &dyn Fn(usize) -> String,
        _dialect: &dyn Dialect,
    ) -> Option<String> {
        let info = self.discriminator.as_ref()?;
        let alias = alias_of(0);
        if let Some(column) = &info.column {
            Some(format!("{}.{}", alias, column))
        } else {
            info.formula.as_ref().map(|f| f.replace("{alias}", &alias))
        }
    }

    fn discriminator_insert(&self, entity: &str) -> Option<(usize, String, Value)> {
        let info = self.discriminator.as_ref()?;
        let column = info.column.as_ref()?;
        info.value_for(entity).map(|v| (0, column.clone(), v.clone()))
    }

    fn discriminator_literal(&self, entity: &str) -> Option<String> {
        self.discriminator
            .as_ref()
            .and_then(|info| info.literal_for(entity))
            .map(str::to_string)
    }

    fn resolve_subclass(&self, value: &Value) -> Result<&str> {
        let Some(info) = self.discriminator.as_ref() else {
            // no subclasses: everything is the root type
            return Ok(self.hierarchy.root());
        };
        info.resolve(value).ok_or_else(|| {
            PersistError::Mapping(format!(
                "Unknown discriminator value {} for entity '{}'",
                value,
                self.hierarchy.root()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::topology::sql_literal;

    fn topology() -> SingleTableTopology {
        let tables = vec![
            TableInfo {
                name: "party".into(),
                key_columns: vec!["id".into()],
                optional: false,
                inverse: false,
                cascade_delete: false,
                owner: "Party".into(),
            },
            TableInfo {
                name: "party_details".into(),
                key_columns: vec!["party_id".into()],
                optional: true,
                inverse: false,
                cascade_delete: false,
                owner: "Party".into(),
            },
        ];
        let hierarchy =
            Hierarchy::new("Party".into(), vec![("Company".into(), None)]).unwrap();
        let values = vec![
            ("Party".to_string(), Value::Text("P".into()), sql_literal(&Value::Text("P".into())).unwrap()),
            ("Company".to_string(), Value::Text("C".into()), sql_literal(&Value::Text("C".into())).unwrap()),
        ];
        let discriminator = DiscriminatorInfo {
            column: Some("kind".into()),
            formula: None,
            values,
        };
        SingleTableTopology::new(tables, hierarchy, Some(discriminator))
    }

    #[test]
    fn test_every_entity_writes_all_tables() {
        let t = topology();
        assert_eq!(t.tables_for_entity("Party").unwrap(), vec![0, 1]);
        assert_eq!(t.tables_for_entity("Company").unwrap(), vec![0, 1]);
        assert!(t.tables_for_entity("Stranger").is_err());
    }

    #[test]
    fn test_optional_secondary_joins_outer() {
        let t = topology();
        assert_eq!(t.join_kind(1, true, &HashSet::new()), JoinKind::LeftOuter);
        let treat: HashSet<String> = ["Company".to_string()].into_iter().collect();
        // TREAT-AS of a type owning the root still forces the secondary inner
        assert_eq!(t.join_kind(1, true, &treat), JoinKind::Inner);
    }

    #[test]
    fn test_discriminator_round_trip() {
        let t = topology();
        let (table, column, value) = t.discriminator_insert("Company").unwrap();
        assert_eq!((table, column.as_str()), (0, "kind"));
        assert_eq!(t.resolve_subclass(&value).unwrap(), "Company");
        assert_eq!(t.discriminator_literal("Company").unwrap(), "'C'");
    }
}
