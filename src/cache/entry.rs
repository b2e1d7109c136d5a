//! How an entity's state array is marshaled into and out of the second-level
//! cache: a compact binary form, a typed per-property map, or — for immutable
//! association-free entities — the state itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{PersistError, Result, Value};
use crate::meta::mapping::CacheLayout;
use crate::meta::EntityMetadata;

/// What a cache hit assembles back into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledEntry {
    pub subclass: String,
    pub version: Option<Value>,
    pub state: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheEntry {
    /// MessagePack-encoded disassembled state array.
    Unstructured {
        subclass: String,
        version: Option<Value>,
        data: Vec<u8>,
    },
    /// Typed per-property map.
    Structured {
        subclass: String,
        version: Option<Value>,
        state: serde_json::Value,
    },
    /// The assembled state itself; unfetched slots are not allowed here.
    Reference { subclass: String, state: Vec<Value> },
}

impl CacheEntry {
    pub fn subclass(&self) -> &str {
        match self {
            Self::Unstructured { subclass, .. }
            | Self::Structured { subclass, .. }
            | Self::Reference { subclass, .. } => subclass,
        }
    }

    pub fn version(&self) -> Option<&Value> {
        match self {
            Self::Unstructured { version, .. } | Self::Structured { version, .. } => {
                version.as_ref()
            }
            Self::Reference { .. } => None,
        }
    }
}

pub trait CacheEntryStrategy: Send + Sync + fmt::Debug {
    /// Freeze a state array into its cached representation. `Ok(None)` means
    /// the entity is not cacheable under this strategy.
    fn disassemble(
        &self,
        meta: &EntityMetadata,
        subclass: &str,
        version: Option<&Value>,
        state: &[Value],
    ) -> Result<Option<CacheEntry>>;

    fn assemble(&self, meta: &EntityMetadata, entry: &CacheEntry) -> Result<AssembledEntry>;
}

#[derive(Debug, Default)]
pub struct StandardCacheEntryStrategy;

impl CacheEntryStrategy for StandardCacheEntryStrategy {
    fn disassemble(
        &self,
        _meta: &EntityMetadata,
        subclass: &str,
        version: Option<&Value>,
        state: &[Value],
    ) -> Result<Option<CacheEntry>> {
        let data = rmp_serde::to_vec(state).map_err(|e| {
            PersistError::Mapping(format!("Failed to disassemble cache entry: {}", e))
        })?;
        Ok(Some(CacheEntry::Unstructured {
            subclass: subclass.to_string(),
            version: version.cloned(),
            data,
        }))
    }

    fn assemble(&self, meta: &EntityMetadata, entry: &CacheEntry) -> Result<AssembledEntry> {
        let CacheEntry::Unstructured { subclass, version, data } = entry else {
            return Err(PersistError::Mapping(
                "Standard cache strategy cannot assemble a non-binary entry".into(),
            ));
        };
        let state: Vec<Value> = rmp_serde::from_slice(data).map_err(|e| {
            PersistError::Mapping(format!("Failed to assemble cache entry: {}", e))
        })?;
        if state.len() != meta.property_span() {
            return Err(PersistError::Mapping(format!(
                "Cached state for '{}' has {} slots, expected {}",
                meta.entity_name,
                state.len(),
                meta.property_span()
            )));
        }
        Ok(AssembledEntry { subclass: subclass.clone(), version: version.clone(), state })
    }
}

#[derive(Debug, Default)]
pub struct StructuredCacheEntryStrategy;

impl CacheEntryStrategy for StructuredCacheEntryStrategy {
    fn disassemble(
        &self,
        meta: &EntityMetadata,
        subclass: &str,
        version: Option<&Value>,
        state: &[Value],
    ) -> Result<Option<CacheEntry>> {
        let mut map = serde_json::Map::new();
        for (p, v) in meta.properties.iter().zip(state) {
            let json = serde_json::to_value(v).map_err(|e| {
                PersistError::Mapping(format!("Failed to structure cache entry: {}", e))
            })?;
            map.insert(p.name.clone(), json);
        }
        Ok(Some(CacheEntry::Structured {
            subclass: subclass.to_string(),
            version: version.cloned(),
            state: serde_json::Value::Object(map),
        }))
    }

    fn assemble(&self, meta: &EntityMetadata, entry: &CacheEntry) -> Result<AssembledEntry> {
        let CacheEntry::Structured { subclass, version, state } = entry else {
            return Err(PersistError::Mapping(
                "Structured cache strategy cannot assemble a non-structured entry".into(),
            ));
        };
        let serde_json::Value::Object(map) = state else {
            return Err(PersistError::Mapping("Structured cache entry is not a map".into()));
        };
        let mut values = Vec::with_capacity(meta.property_span());
        for p in &meta.properties {
            let json = map.get(&p.name).ok_or_else(|| {
                PersistError::Mapping(format!(
                    "Cached state for '{}' is missing property '{}'",
                    meta.entity_name, p.name
                ))
            })?;
            let value: Value = serde_json::from_value(json.clone()).map_err(|e| {
                PersistError::Mapping(format!("Failed to assemble property '{}': {}", p.name, e))
            })?;
            values.push(value);
        }
        Ok(AssembledEntry { subclass: subclass.clone(), version: version.clone(), state: values })
    }
}

/// Caches the state array as-is. Restricted to immutable entities without
/// collections, where sharing the hydrated values is safe.
#[derive(Debug, Default)]
pub struct ReferenceCacheEntryStrategy;

impl CacheEntryStrategy for ReferenceCacheEntryStrategy {
    fn disassemble(
        &self,
        _meta: &EntityMetadata,
        subclass: &str,
        _version: Option<&Value>,
        state: &[Value],
    ) -> Result<Option<CacheEntry>> {
        if state.iter().any(Value::is_unfetched) {
            return Ok(None);
        }
        Ok(Some(CacheEntry::Reference {
            subclass: subclass.to_string(),
            state: state.to_vec(),
        }))
    }

    fn assemble(&self, _meta: &EntityMetadata, entry: &CacheEntry) -> Result<AssembledEntry> {
        let CacheEntry::Reference { subclass, state } = entry else {
            return Err(PersistError::Mapping(
                "Reference cache strategy cannot assemble a non-reference entry".into(),
            ));
        };
        Ok(AssembledEntry { subclass: subclass.clone(), version: None, state: state.clone() })
    }
}

/// Pick the entry strategy for an entity, validating the reference layout's
/// preconditions at bootstrap.
pub fn select_strategy(meta: &EntityMetadata) -> Result<Option<Box<dyn CacheEntryStrategy>>> {
    match meta.cache_layout {
        CacheLayout::Disabled => Ok(None),
        CacheLayout::Standard => Ok(Some(Box::new(StandardCacheEntryStrategy))),
        CacheLayout::Structured => Ok(Some(Box::new(StructuredCacheEntryStrategy))),
        CacheLayout::Reference => {
            if meta.mutable {
                return Err(PersistError::Mapping(format!(
                    "Reference caching requires '{}' to be immutable",
                    meta.entity_name
                )));
            }
            if meta.has_collections() {
                return Err(PersistError::Mapping(format!(
                    "Reference caching of '{}' is not possible with collection properties",
                    meta.entity_name
                )));
            }
            Ok(Some(Box::new(ReferenceCacheEntryStrategy)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::dialect::AnsiDialect;
    use crate::meta::{EntityMapping, IdentifierMapping, PropertyMapping, TableMapping};

    fn meta() -> EntityMetadata {
        let mapping = EntityMapping::new(
            "Account",
            TableMapping::new("account", vec!["id".into()]),
            IdentifierMapping::new("id", "id", DataType::Integer),
        )
        .property(PropertyMapping::new("balance", DataType::Integer))
        .property(PropertyMapping::new("owner", DataType::Text));
        EntityMetadata::build(mapping, &AnsiDialect).unwrap()
    }

    #[test]
    fn test_standard_round_trip() {
        let meta = meta();
        let state = vec![Value::Integer(100), Value::Text("alice".into())];
        let strategy = StandardCacheEntryStrategy;
        let entry = strategy
            .disassemble(&meta, "Account", Some(&Value::Integer(3)), &state)
            .unwrap()
            .unwrap();
        let assembled = strategy.assemble(&meta, &entry).unwrap();
        assert_eq!(assembled.state, state);
        assert_eq!(assembled.version, Some(Value::Integer(3)));
        assert_eq!(assembled.subclass, "Account");
    }

    #[test]
    fn test_standard_preserves_unfetched_slots() {
        let meta = meta();
        let state = vec![Value::Integer(100), Value::Unfetched];
        let strategy = StandardCacheEntryStrategy;
        let entry = strategy.disassemble(&meta, "Account", None, &state).unwrap().unwrap();
        let assembled = strategy.assemble(&meta, &entry).unwrap();
        assert_eq!(assembled.state[1], Value::Unfetched);
    }

    #[test]
    fn test_structured_round_trip() {
        let meta = meta();
        let state = vec![Value::Integer(100), Value::Text("alice".into())];
        let strategy = StructuredCacheEntryStrategy;
        let entry = strategy.disassemble(&meta, "Account", None, &state).unwrap().unwrap();
        let assembled = strategy.assemble(&meta, &entry).unwrap();
        assert_eq!(assembled.state, state);
    }

    #[test]
    fn test_reference_refuses_unfetched() {
        let meta = meta();
        let strategy = ReferenceCacheEntryStrategy;
        let entry = strategy
            .disassemble(&meta, "Account", None, &[Value::Integer(1), Value::Unfetched])
            .unwrap();
        assert!(entry.is_none());
    }
}
