//! Convenience re-exports for typical use.

pub use crate::cache::{CacheAccess, CacheEntry, CacheKey, LruCacheRegion};
pub use crate::core::{DataType, PersistError, Result, SemanticType, Value};
pub use crate::dialect::{AnsiDialect, Dialect, LockMode, LockOptions, LockTimeout};
pub use crate::engine::PersisterFactory;
pub use crate::exec::{
    BatchKey, ExecResult, Expectation, PreparedSql, RowCursor, SqlFailure, StatementExecutor,
};
pub use crate::loader::LoadedEntity;
pub use crate::meta::{
    CacheLayout, DiscriminatorMapping, EntityMapping, IdGeneration, IdentifierMapping,
    InheritanceKind, NaturalIdMapping, OptimisticLockStyle, PropertyMapping, SubclassMapping,
    TableMapping, ValueGeneration, VersionMapping,
};
pub use crate::persister::EntityPersister;
pub use crate::persister::lazy::{InitializedValue, LazyValue};
pub use crate::session::{CacheMode, EntityEntry, EntityKey, MemoryContext, Session};
