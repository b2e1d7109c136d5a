pub mod error;
pub mod types;
pub mod value;

pub use error::{PersistError, Result, SqlErrorKind};
pub use types::{Row, SemanticType};
pub use value::{DataType, Value};
