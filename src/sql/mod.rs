pub mod delete;
pub mod insert;
pub mod select;
pub mod update;

use crate::dialect::Dialect;

pub use delete::Delete;
pub use insert::Insert;
pub use select::{EntitySelect, HydrationSlot, KeyFilter, Projection, SimpleSelect};
pub use update::Update;

/// Custom SQL overrides quote identifiers with brackets so they survive any
/// dialect; swap them for the dialect's real quote characters before use.
pub fn substitute_brackets(sql: &str, dialect: &dyn Dialect) -> String {
    sql.chars()
        .map(|c| match c {
            '[' => dialect.open_quote(),
            ']' => dialect.close_quote(),
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::AnsiDialect;

    #[test]
    fn test_substitute_brackets() {
        assert_eq!(
            substitute_brackets("update [order] set [user]=? where id=?", &AnsiDialect),
            "update \"order\" set \"user\"=? where id=?"
        );
    }
}
