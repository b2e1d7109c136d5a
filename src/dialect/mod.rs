pub mod ansi;
pub mod keywords;

use std::fmt;

use crate::core::SqlErrorKind;
use crate::exec::SqlFailure;

pub use ansi::AnsiDialect;

/// Requested concurrency control for a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockMode {
    None,
    Read,
    PessimisticRead,
    PessimisticWrite,
}

impl LockMode {
    pub fn is_pessimistic(&self) -> bool {
        matches!(self, Self::PessimisticRead | Self::PessimisticWrite)
    }
}

/// How long the database should wait for a contended row lock. The engine
/// never implements waiting itself; the value is rendered into the lock
/// clause and enforced by the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeout {
    WaitForever,
    NoWait,
    Millis(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub mode: LockMode,
    pub timeout: LockTimeout,
}

impl LockOptions {
    pub const NONE: LockOptions = LockOptions {
        mode: LockMode::None,
        timeout: LockTimeout::WaitForever,
    };

    pub fn new(mode: LockMode) -> Self {
        Self { mode, timeout: LockTimeout::WaitForever }
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::NONE
    }
}

/// How a database-generated identifier is read back after an identity-column
/// insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStyle {
    /// The insert statement itself returns the key (`insert .. returning id`).
    InsertReturning,
    /// The driver exposes generated keys on the insert statement.
    GeneratedKeys,
    /// A separate dialect-specific select runs after the insert.
    SelectAfterInsert,
}

/// Per-database SQL variations consumed by the statement generators and the
/// persister. Everything has an ANSI-flavored default; concrete dialects
/// override only what their database does differently.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn open_quote(&self) -> char {
        '"'
    }

    fn close_quote(&self) -> char {
        '"'
    }

    fn quote(&self, ident: &str) -> String {
        format!("{}{}{}", self.open_quote(), ident, self.close_quote())
    }

    /// Quote only when the identifier collides with a reserved word or
    /// contains characters a bare identifier cannot carry.
    fn quote_if_needed(&self, ident: &str) -> String {
        let needs_quoting = keywords::is_reserved(ident)
            || !ident
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if needs_quoting { self.quote(ident) } else { ident.to_string() }
    }

    /// Rendered in place of `(cols) values (..)` when an insert carries no
    /// columns at all.
    fn empty_values_clause(&self) -> &'static str {
        "values ( )"
    }

    fn lock_fragment(&self, mode: LockMode, timeout: LockTimeout) -> String {
        let base = match mode {
            LockMode::None | LockMode::Read => return String::new(),
            LockMode::PessimisticRead => " for share",
            LockMode::PessimisticWrite => " for update",
        };
        match timeout {
            LockTimeout::WaitForever => base.to_string(),
            LockTimeout::NoWait => format!("{} nowait", base),
            LockTimeout::Millis(ms) => format!("{} wait {}", base, ms.div_ceil(1000)),
        }
    }

    /// Whether `for update` may be combined with outer joins. Dialects that
    /// answer `false` force pessimistic loads onto the plain read loader.
    fn supports_outer_join_for_update(&self) -> bool {
        true
    }

    fn identity_style(&self) -> IdentityStyle {
        IdentityStyle::GeneratedKeys
    }

    /// For [`IdentityStyle::InsertReturning`]: the insert with the
    /// key-retrieval clause appended.
    fn append_identity_retrieval(&self, insert_sql: &str, key_column: &str) -> String {
        format!("{} returning {}", insert_sql, key_column)
    }

    /// For [`IdentityStyle::SelectAfterInsert`]: the follow-up select reading
    /// the key generated by the immediately preceding insert.
    fn identity_select_sql(&self, _table: &str, _key_column: &str) -> Option<String> {
        None
    }

    fn sequence_next_value_sql(&self, sequence: &str) -> String {
        format!("select next value for {}", sequence)
    }

    /// `case when <col> is not null then <literal> .. end` — used to derive an
    /// implicit discriminator from the not-null key probes of joined subclass
    /// tables.
    fn case_when_not_null(&self, arms: &[(String, String)]) -> String {
        let mut sql = String::from("case");
        for (column, literal) in arms {
            sql.push_str(" when ");
            sql.push_str(column);
            sql.push_str(" is not null then ");
            sql.push_str(literal);
        }
        sql.push_str(" end");
        sql
    }

    /// Some databases require LOB bind parameters after all others; the
    /// generators keep LOB columns last whenever this holds.
    fn requires_lobs_last(&self) -> bool {
        true
    }

    fn supports_cascade_delete(&self) -> bool {
        true
    }

    /// Map a raw executor failure onto the error taxonomy, by SQLSTATE class
    /// when one is available.
    fn translate(&self, failure: &SqlFailure) -> SqlErrorKind {
        let Some(state) = failure.sqlstate.as_deref() else {
            return SqlErrorKind::General;
        };
        match &state[..state.len().min(2)] {
            "23" => SqlErrorKind::ConstraintViolation,
            "22" => SqlErrorKind::DataError,
            "08" => SqlErrorKind::ConnectionFailure,
            "40" | "55" => SqlErrorKind::LockTimeout,
            _ => SqlErrorKind::General,
        }
    }
}
