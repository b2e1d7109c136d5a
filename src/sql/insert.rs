use crate::dialect::Dialect;

/// Builds `insert into T (..) values (..)` strings. Column order is
/// append-order; the statement generators append LOB columns and key columns
/// last on purpose.
#[derive(Debug, Clone)]
pub struct Insert {
    table: String,
    columns: Vec<(String, String)>,
    comment: Option<String>,
}

impl Insert {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into(), columns: Vec::new(), comment: None }
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn add_column(&mut self, name: &str) -> &mut Self {
        self.add_column_with_value(name, "?")
    }

    pub fn add_column_with_value(&mut self, name: &str, value_expr: &str) -> &mut Self {
        self.columns.push((name.to_string(), value_expr.to_string()));
        self
    }

    pub fn add_columns(&mut self, names: &[String]) -> &mut Self {
        for name in names {
            self.add_column(name);
        }
        self
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn to_statement_string(&self, dialect: &dyn Dialect) -> String {
        let mut sql = String::new();
        if let Some(comment) = &self.comment {
            sql.push_str(&format!("/* {} */ ", comment));
        }
        sql.push_str("insert into ");
        sql.push_str(&self.table);
        if self.columns.is_empty() {
            sql.push(' ');
            sql.push_str(dialect.empty_values_clause());
            return sql;
        }
        sql.push_str(" (");
        for (i, (name, _)) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(name);
        }
        sql.push_str(") values (");
        for (i, (_, value)) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(value);
        }
        sql.push(')');
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::AnsiDialect;

    #[test]
    fn test_basic_insert() {
        let mut insert = Insert::new("account");
        insert.add_column("balance").add_column("version").add_column("id");
        assert_eq!(
            insert.to_statement_string(&AnsiDialect),
            "insert into account (balance, version, id) values (?, ?, ?)"
        );
    }

    #[test]
    fn test_custom_write_expression() {
        let mut insert = Insert::new("vault");
        insert.add_column_with_value("secret", "encrypt(?)").add_column("id");
        assert_eq!(
            insert.to_statement_string(&AnsiDialect),
            "insert into vault (secret, id) values (encrypt(?), ?)"
        );
    }

    #[test]
    fn test_no_columns_uses_empty_values_clause() {
        let insert = Insert::new("marker");
        assert_eq!(insert.to_statement_string(&AnsiDialect), "insert into marker values ( )");
    }
}
