use std::collections::HashSet;

use lazy_static::lazy_static;

lazy_static! {
    /// ANSI reserved words that force identifier quoting.
    static ref RESERVED_WORDS: HashSet<&'static str> = [
        "all", "and", "any", "as", "asc", "between", "by", "case", "cast",
        "check", "column", "constraint", "create", "cross", "current",
        "default", "delete", "desc", "distinct", "drop", "else", "end",
        "except", "exists", "for", "foreign", "from", "full", "grant",
        "group", "having", "in", "inner", "insert", "intersect", "into",
        "is", "join", "key", "left", "like", "natural", "not", "null", "on",
        "or", "order", "outer", "primary", "references", "right", "select",
        "set", "some", "table", "then", "to", "union", "unique", "update",
        "user", "using", "values", "when", "where", "with",
    ]
    .into_iter()
    .collect();
}

pub fn is_reserved(ident: &str) -> bool {
    RESERVED_WORDS.contains(ident.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_detection() {
        assert!(is_reserved("select"));
        assert!(is_reserved("ORDER"));
        assert!(!is_reserved("balance"));
    }
}
