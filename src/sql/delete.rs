/// Builds `delete from T where ..` strings keyed by primary key, with
/// optional version or value-based lock predicates.
#[derive(Debug, Clone)]
pub struct Delete {
    table: String,
    key_columns: Vec<String>,
    version_column: Option<String>,
    where_fragments: Vec<String>,
    comment: Option<String>,
}

impl Delete {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
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

    pub fn add_key_columns(&mut self, names: &[String]) -> &mut Self {
        self.key_columns.extend(names.iter().cloned());
        self
    }

    pub fn set_version_column(&mut self, name: &str) -> &mut Self {
        self.version_column = Some(name.to_string());
        self
    }

    pub fn add_where_fragment(&mut self, fragment: impl Into<String>) -> &mut Self {
        self.where_fragments.push(fragment.into());
        self
    }

    pub fn to_statement_string(&self) -> String {
        let mut sql = String::new();
        if let Some(comment) = &self.comment {
            sql.push_str(&format!("/* {} */ ", comment));
        }
        sql.push_str("delete from ");
        sql.push_str(&self.table);
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
