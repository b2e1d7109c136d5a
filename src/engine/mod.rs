//! Facade tying the pieces together: register entity mappings once at
//! bootstrap, get shared persisters back, open sessions against a
//! connection-level executor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::CacheAccess;
use crate::core::{PersistError, Result};
use crate::dialect::{AnsiDialect, Dialect};
use crate::exec::StatementExecutor;
use crate::meta::EntityMapping;
use crate::persister::EntityPersister;
use crate::session::Session;

/// Builds and hands out [`EntityPersister`]s. Construction happens once at
/// bootstrap; afterwards the factory and every persister are immutable and
/// safely shared between units of work.
///
/// # Examples
///
/// ```
/// use relmap::engine::PersisterFactory;
/// use relmap::core::DataType;
/// use relmap::meta::{EntityMapping, IdentifierMapping, PropertyMapping, TableMapping};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut factory = PersisterFactory::new();
/// let mapping = EntityMapping::new(
///     "Account",
///     TableMapping::new("account", vec!["id".into()]),
///     IdentifierMapping::new("id", "id", DataType::Integer),
/// )
/// .property(PropertyMapping::new("balance", DataType::Integer).not_null());
///
/// let persister = factory.register(mapping)?;
/// assert_eq!(persister.to_columns("balance")?, vec!["a0_.balance".to_string()]);
/// # Ok(())
/// # }
/// ```
pub struct PersisterFactory {
    dialect: Arc<dyn Dialect>,
    cache: Option<Arc<dyn CacheAccess>>,
    persisters: HashMap<String, Arc<EntityPersister>>,
}

impl PersisterFactory {
    /// Factory over the plain ANSI dialect, no second-level cache.
    pub fn new() -> Self {
        Self::with_dialect(Arc::new(AnsiDialect))
    }

    pub fn with_dialect(dialect: Arc<dyn Dialect>) -> Self {
        Self { dialect, cache: None, persisters: HashMap::new() }
    }

    /// Attach a second-level cache region shared by every persister whose
    /// mapping enables caching.
    pub fn cache(mut self, cache: Arc<dyn CacheAccess>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the persister for one entity hierarchy. Mapping problems
    /// surface here, before any session runs.
    pub fn register(&mut self, mapping: EntityMapping) -> Result<Arc<EntityPersister>> {
        let name = mapping.entity_name.clone();
        if self.persisters.contains_key(&name) {
            return Err(PersistError::Mapping(format!(
                "Entity '{}' is already registered",
                name
            )));
        }
        let persister = Arc::new(EntityPersister::new(
            mapping,
            Arc::clone(&self.dialect),
            self.cache.clone(),
        )?);
        self.persisters.insert(name, Arc::clone(&persister));
        Ok(persister)
    }

    pub fn persister(&self, entity: &str) -> Option<Arc<EntityPersister>> {
        self.persisters.get(entity).cloned()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// Open a unit of work over a connection-level statement executor.
    pub fn open_session(&self, executor: Box<dyn StatementExecutor>) -> Session {
        Session::new(executor)
    }
}

impl Default for PersisterFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::meta::{IdentifierMapping, PropertyMapping, TableMapping};

    fn mapping(name: &str) -> EntityMapping {
        EntityMapping::new(
            name,
            TableMapping::new("account", vec!["id".into()]),
            IdentifierMapping::new("id", "id", DataType::Integer),
        )
        .property(PropertyMapping::new("balance", DataType::Integer))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut factory = PersisterFactory::new();
        factory.register(mapping("Account")).unwrap();
        assert!(factory.persister("Account").is_some());
        assert!(factory.persister("Unknown").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut factory = PersisterFactory::new();
        factory.register(mapping("Account")).unwrap();
        assert!(factory.register(mapping("Account")).is_err());
    }
}
