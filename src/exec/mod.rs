pub mod expectation;

use std::fmt;

use crate::core::{Row, Value};

pub use expectation::{Expectation, ExpectationOutcome};

/// A fully rendered statement plus its positional bind values, ready for the
/// statement-execution collaborator. Binding is plain data; no handle to an
/// external resource is held until execution.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

impl PreparedSql {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    pub fn bind(&mut self, value: Value) -> &mut Self {
        self.params.push(value);
        self
    }

    pub fn bind_all<I: IntoIterator<Item = Value>>(&mut self, values: I) -> &mut Self {
        self.params.extend(values);
        self
    }
}

/// Raw failure reported by the statement executor, before dialect
/// translation.
#[derive(Debug, Clone)]
pub struct SqlFailure {
    pub sqlstate: Option<String>,
    pub message: String,
}

impl SqlFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { sqlstate: None, message: message.into() }
    }

    pub fn with_state(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self { sqlstate: Some(sqlstate.into()), message: message.into() }
    }
}

impl fmt::Display for SqlFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "[{}] {}", state, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for SqlFailure {}

pub type ExecResult<T> = std::result::Result<T, SqlFailure>;

/// Forward-only positional result cursor. Dropping the cursor releases the
/// underlying resources on every exit path.
pub trait RowCursor {
    fn next_row(&mut self) -> ExecResult<Option<Row>>;
}

/// Identity of one logical statement batch within a unit of work, e.g.
/// `Account#INSERT`. The expectation travels with the key so the row counts
/// from a flushed batch can be verified per position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub name: String,
    pub expectation: Expectation,
}

impl BatchKey {
    pub fn new(name: impl Into<String>, expectation: Expectation) -> Self {
        Self { name: name.into(), expectation }
    }
}

/// The statement-execution collaborator: everything the engine needs from a
/// database connection. All calls block; cancellation and timeouts live on
/// the other side of this trait.
pub trait StatementExecutor {
    fn execute_update(&mut self, stmt: &PreparedSql) -> ExecResult<u64>;

    fn execute_query(&mut self, stmt: &PreparedSql) -> ExecResult<Box<dyn RowCursor>>;

    /// Execute an insert and return the database-generated key columns, via
    /// whatever mechanism the connection supports (generated-keys API or a
    /// RETURNING clause baked into the statement).
    fn execute_insert_returning(&mut self, stmt: &PreparedSql) -> ExecResult<Row>;

    /// Queue a statement on the batch identified by `key`, creating the batch
    /// if it does not exist yet.
    fn add_to_batch(&mut self, key: &BatchKey, stmt: &PreparedSql) -> ExecResult<()>;

    /// Flush the batch: execute all queued statements and return one row
    /// count per queued statement, in queue order. The batch is consumed.
    fn execute_batch(&mut self, key: &BatchKey) -> ExecResult<Vec<u64>>;

    /// Discard a batch without executing it. Called before an error from any
    /// batch member propagates; there is no partial success within a batch.
    fn abort_batch(&mut self, key: &BatchKey);
}
