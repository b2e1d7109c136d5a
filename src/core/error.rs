use std::fmt;

use thiserror::Error;

/// Classification of a translated low-level SQL failure.
///
/// Produced by the dialect's exception translator from the raw
/// `SqlFailure` reported by the statement executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlErrorKind {
    ConstraintViolation,
    LockTimeout,
    ConnectionFailure,
    DataError,
    General,
}

impl fmt::Display for SqlErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConstraintViolation => write!(f, "constraint violation"),
            Self::LockTimeout => write!(f, "lock timeout"),
            Self::ConnectionFailure => write!(f, "connection failure"),
            Self::DataError => write!(f, "data error"),
            Self::General => write!(f, "SQL error"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Row was updated or deleted by another transaction for entity '{entity}', id {id}")]
    StaleState { entity: String, id: String },

    #[error("Duplicate identifier in table for entity '{entity}', id {id}: {rows} rows affected")]
    DuplicateIdentifier { entity: String, id: String, rows: u64 },

    #[error("{kind} while {context}: {message}")]
    Sql {
        kind: SqlErrorKind,
        context: String,
        message: String,
    },

    #[error("Lazy initialization error: {0}")]
    LazyInitialization(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Identifier generation failed: {0}")]
    IdentifierGeneration(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;

impl<T> From<std::sync::PoisonError<T>> for PersistError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Sql {
            kind: SqlErrorKind::General,
            context: "accessing shared loader state".into(),
            message: err.to_string(),
        }
    }
}
