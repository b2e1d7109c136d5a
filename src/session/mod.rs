pub mod context;

use crate::core::Value;
use crate::exec::{BatchKey, StatementExecutor};

pub use context::{
    CollectionHandle, CollectionKey, EntityEntry, EntityKey, MemoryContext, PersistenceContext,
};

/// Second-level cache interaction mode for one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Normal,
    Ignore,
    Get,
    Put,
}

impl CacheMode {
    pub fn is_get_enabled(&self) -> bool {
        matches!(self, Self::Normal | Self::Get)
    }

    pub fn is_put_enabled(&self) -> bool {
        matches!(self, Self::Normal | Self::Put)
    }
}

/// One unit of work: owns the connection-level executor and the persistence
/// context, and carries the write-batching configuration. The persister holds
/// no such state; everything flows through here.
pub struct Session {
    executor: Box<dyn StatementExecutor>,
    context: Box<dyn PersistenceContext>,
    pub batch_size: usize,
    /// Whether versioned rows may participate in delayed batches.
    pub batch_versioned_data: bool,
    pub cache_mode: CacheMode,
    pub tenant: Option<String>,
    pending_batches: Vec<BatchKey>,
}

impl Session {
    pub fn new(executor: Box<dyn StatementExecutor>) -> Self {
        Self {
            executor,
            context: Box::new(MemoryContext::default()),
            batch_size: 1,
            batch_versioned_data: false,
            cache_mode: CacheMode::Normal,
            tenant: None,
            pending_batches: Vec::new(),
        }
    }

    pub fn with_context(
        executor: Box<dyn StatementExecutor>,
        context: Box<dyn PersistenceContext>,
    ) -> Self {
        Self { context, ..Self::new(executor) }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn batch_versioned_data(mut self) -> Self {
        self.batch_versioned_data = true;
        self
    }

    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn executor(&mut self) -> &mut dyn StatementExecutor {
        self.executor.as_mut()
    }

    pub fn context(&self) -> &dyn PersistenceContext {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> &mut dyn PersistenceContext {
        self.context.as_mut()
    }

    /// Record that statements are queued on `key`; the batch must be flushed
    /// before any read that depends on its effects.
    pub fn note_pending_batch(&mut self, key: &BatchKey) {
        if !self.pending_batches.contains(key) {
            self.pending_batches.push(key.clone());
        }
    }

    pub fn has_pending_batches(&self) -> bool {
        !self.pending_batches.is_empty()
    }

    pub fn take_pending_batches(&mut self) -> Vec<BatchKey> {
        std::mem::take(&mut self.pending_batches)
    }

    pub fn forget_pending_batch(&mut self, key: &BatchKey) {
        self.pending_batches.retain(|k| k != key);
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Convenience passthrough for callers that only have the session.
    pub fn loaded_state(&self, key: &EntityKey) -> Option<&[Value]> {
        self.context
            .entry(key)
            .and_then(|e| e.loaded_state.as_deref())
    }
}
