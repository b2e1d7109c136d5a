/// Builds `update T set .. where ..` strings keyed by primary key (or row-id
/// surrogate) with optional version and value-based optimistic-lock
/// predicates.
#[derive(Debug, Clone)]
pub struct Update {
    table: String,
    assignments: Vec<(String, String)>,
    key_columns: Vec<String>,
    version_column: Option<String>,
    where_fragments: Vec<String>,
    comment: Option<String>,
}

impl Update {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            key_columns: Vec::new(),
            version_column: None,
            where_fragments: Vec::new(),
            comment: None,
        }
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn add_column(&mut self, name: &str) -> &mut Self {
        self.add_column_with_value(name, "?")
    }

    pub fn add_column_with_value(&mut self, name: &str, value_expr: &str) -> &mut Self {
        self.assignments.push((name.to_string(), value_expr.to_string()));
        self
    }

    pub fn add_key_columns(&mut self, names: &[String]) -> &mut Self {
        self.key_columns.extend(names.iter().cloned());
        self
    }

    pub fn set_version_column(&mut self, name: &str) -> &mut Self {
        self.version_column = Some(name.to_string());
        self
    }

    /// Append `name<rhs>` to the WHERE clause; `rhs` is e.g. `"=?"` or
    /// `" is null"`.
    pub fn add_where_column(&mut self, name: &str, rhs: &str) -> &mut Self {
        self.where_fragments.push(format!("{}{}", name, rhs));
        self
    }

    pub fn has_columns(&self) -> bool {
        !self.assignments.is_empty()
    }

    pub fn to_statement_string(&self) -> String {
        let mut sql = String::new();
        if let Some(comment) = &self.comment {
            sql.push_str(&format!("/* {} */ ", comment));
        }
        sql.push_str("update ");
        sql.push_str(&self.table);
        sql.push_str(" set ");
        for (i, (name, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(name);
            sql.push('=');
            sql.push_str(value);
        }
        // the version assignment also participates in the SET list
        if let Some(version) = &self.version_column {
            if !self.assignments.iter().any(|(name, _)| name == version) {
                if !self.assignments.is_empty() {
                    sql.push_str(", ");
                }
                sql.push_str(version);
                sql.push_str("=?");
            }
        }
        sql.push_str(" where ");
        for (i, key) in self.key_columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(" and ");
            }
            sql.push_str(key);
            sql.push_str("=?");
        }
        if let Some(version) = &self.version_column {
            sql.push_str(" and ");
            sql.push_str(version);
            sql.push_str("=?");
        }
        for fragment in &self.where_fragments {
            sql.push_str(" and ");
            sql.push_str(fragment);
        }
        sql
    }
}
