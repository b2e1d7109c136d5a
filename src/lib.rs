// ============================================================================
// relmap - relational persistence engine
// ============================================================================
//
// Maps entities to relational tables, generates the CRUD SQL for them once
// at bootstrap, and executes it through a narrow statement-execution
// contract. The entity persister is the hub: it owns the metadata model and
// the cached statement set, marshals state arrays to and from prepared
// statements, detects dirty properties, applies optimistic locking, and
// coordinates second-level caching. Three table-inheritance strategies
// (single table, joined subclass, union subclass) plug into one shared
// algorithm through the table-topology seam.

pub mod cache;
pub mod core;
pub mod dialect;
pub mod engine;
pub mod exec;
pub mod loader;
pub mod meta;
pub mod persister;
pub mod prelude;
pub mod session;
pub mod sql;

// Re-export main types for convenience
pub use crate::core::{DataType, PersistError, Result, Value};
pub use crate::engine::PersisterFactory;
pub use crate::loader::LoadedEntity;
pub use crate::persister::EntityPersister;
pub use crate::session::Session;
