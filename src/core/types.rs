use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::{DataType, PersistError, Result, Value};

/// One positional result-set row, or a full entity state array.
pub type Row = Vec<Value>;

/// The column-level shape of a property: a single column or an ordered group
/// of columns written/read as one unit (composite identifiers, embedded
/// values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SemanticType {
    Basic(DataType),
    Composite(Vec<DataType>),
}

impl SemanticType {
    pub fn column_span(&self) -> usize {
        match self {
            Self::Basic(_) => 1,
            Self::Composite(parts) => parts.len(),
        }
    }

    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (_, Value::Unfetched) => true,
            (Self::Basic(dt), v) => dt.is_compatible(v),
            (Self::Composite(parts), Value::Composite(vs)) => {
                parts.len() == vs.len()
                    && parts.iter().zip(vs.iter()).all(|(dt, v)| dt.is_compatible(v))
            }
            _ => false,
        }
    }

    /// Per-column nullness of a value of this type, used to decide between
    /// `col = ?` and `col is null` predicates in value-keyed WHERE clauses.
    /// `true` means non-null (a bind parameter is emitted).
    pub fn column_nullness(&self, value: &Value) -> Vec<bool> {
        match (self, value) {
            (_, Value::Null) | (_, Value::Unfetched) => vec![false; self.column_span()],
            (Self::Basic(_), _) => vec![true],
            (Self::Composite(parts), Value::Composite(vs)) => {
                let mut nullness: Vec<bool> = vs.iter().map(|v| !v.is_null()).collect();
                nullness.resize(parts.len(), false);
                nullness
            }
            (Self::Composite(parts), _) => vec![false; parts.len()],
        }
    }

    /// Flatten a property value into its column-level bind values.
    pub fn flatten(&self, value: &Value) -> Vec<Value> {
        match (self, value) {
            (Self::Basic(_), v) => vec![v.clone()],
            (Self::Composite(parts), Value::Composite(vs)) => {
                let mut flat = vs.clone();
                flat.resize(parts.len(), Value::Null);
                flat
            }
            (Self::Composite(parts), _) => vec![Value::Null; parts.len()],
        }
    }

    /// Reassemble a property value from the next `column_span()` positions of
    /// a result row.
    pub fn assemble(&self, columns: &[Value]) -> Value {
        match self {
            Self::Basic(_) => columns.first().cloned().unwrap_or(Value::Null),
            Self::Composite(_) => {
                if columns.iter().all(Value::is_null) {
                    Value::Null
                } else {
                    Value::Composite(columns.to_vec())
                }
            }
        }
    }

    pub fn check(&self, name: &str, value: &Value) -> Result<()> {
        if self.is_compatible(value) {
            Ok(())
        } else {
            Err(PersistError::TypeMismatch(format!(
                "Property '{}' expects {:?}, got {}",
                name,
                self,
                value.type_name()
            )))
        }
    }
}

/// Initial version value for a freshly inserted versioned entity.
pub fn seed_version(data_type: DataType) -> Result<Value> {
    match data_type {
        DataType::Integer => Ok(Value::Integer(0)),
        DataType::Timestamp => Ok(Value::Timestamp(Utc::now())),
        other => Err(PersistError::TypeMismatch(format!(
            "{} is not a usable version column type",
            other
        ))),
    }
}

/// Successor of a version value: integer versions increment, timestamp
/// versions move to the current instant.
pub fn next_version(current: &Value) -> Result<Value> {
    match current {
        Value::Integer(v) => Ok(Value::Integer(v + 1)),
        Value::Timestamp(_) => Ok(Value::Timestamp(Utc::now())),
        other => Err(PersistError::TypeMismatch(format!(
            "{} is not a usable version value",
            other.type_name()
        ))),
    }
}
