use std::collections::HashSet;

use crate::dialect::{Dialect, LockOptions};
use crate::meta::topology::JoinKind;
use crate::meta::{EntityMetadata, PropertyMetadata};

/// Single-table projection select: version reads, identity re-selects.
#[derive(Debug, Clone)]
pub struct SimpleSelect {
    table: String,
    columns: Vec<String>,
    conditions: Vec<String>,
    lock: String,
    comment: Option<String>,
}

impl SimpleSelect {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            conditions: Vec::new(),
            lock: String::new(),
            comment: None,
        }
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn add_column(&mut self, name: &str) -> &mut Self {
        self.columns.push(name.to_string());
        self
    }

    pub fn add_columns(&mut self, names: &[String]) -> &mut Self {
        for name in names {
            self.add_column(name);
        }
        self
    }

    pub fn add_condition(&mut self, columns: &[String], rhs: &str) -> &mut Self {
        for column in columns {
            self.conditions.push(format!("{}{}", column, rhs));
        }
        self
    }

    pub fn set_lock(&mut self, fragment: &str) -> &mut Self {
        self.lock = fragment.to_string();
        self
    }

    pub fn to_statement_string(&self) -> String {
        let mut sql = String::new();
        if let Some(comment) = &self.comment {
            sql.push_str(&format!("/* {} */ ", comment));
        }
        sql.push_str("select ");
        sql.push_str(&self.columns.join(", "));
        sql.push_str(" from ");
        sql.push_str(&self.table);
        if !self.conditions.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&self.conditions.join(" and "));
        }
        sql.push_str(&self.lock);
        sql
    }
}

/// Positional layout of an entity select's result row, consumed by the
/// hydration code. Spans are column counts within the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationSlot {
    Identifier { span: usize },
    Discriminator,
    Property { index: usize, span: usize },
}

/// What the select projects.
#[derive(Debug, Clone)]
pub enum Projection {
    /// Identifier, discriminator (when polymorphic) and the included
    /// properties — the full entity hydration shape.
    FullState { include: Vec<bool> },
    /// Identifier columns only (natural-id resolution).
    IdOnly,
    /// A plain subset of properties (lazy fetch groups, natural-id
    /// snapshots).
    Properties(Vec<usize>),
}

/// WHERE-clause shape. Bind order always follows render order.
#[derive(Debug, Clone)]
pub enum KeyFilter {
    /// `id = ?` on the driving alias.
    ById,
    /// `id in (?, .., ?)` — single-column identifiers only.
    ByIdList(usize),
    /// One predicate per property: `col = ?` where the corresponding flag is
    /// true, `col is null` where it is false.
    ByPropertyNullness { indices: Vec<usize>, non_null: Vec<bool> },
    /// Unique-key lookup on one property's columns.
    ByProperty(usize),
}

/// Renders the polymorphic entity selects: snapshot, loader, lazy-group,
/// natural-id and unique-key lookups all come out of here so that the join
/// and aliasing rules stay in one place.
pub struct EntitySelect<'a> {
    meta: &'a EntityMetadata,
    dialect: &'a dyn Dialect,
    projection: Projection,
    filter: KeyFilter,
    include_subclasses: bool,
    treat_as: HashSet<String>,
    only_tables: Option<HashSet<usize>>,
    lock: LockOptions,
    comment: Option<String>,
}

impl<'a> EntitySelect<'a> {
    pub fn new(meta: &'a EntityMetadata, dialect: &'a dyn Dialect) -> Self {
        Self {
            meta,
            dialect,
            projection: Projection::IdOnly,
            filter: KeyFilter::ById,
            include_subclasses: true,
            treat_as: HashSet::new(),
            only_tables: None,
            lock: LockOptions::NONE,
            comment: None,
        }
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn filter(mut self, filter: KeyFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn include_subclasses(mut self, include: bool) -> Self {
        self.include_subclasses = include;
        self
    }

    pub fn treat_as(mut self, treat_as: HashSet<String>) -> Self {
        self.treat_as = treat_as;
        self
    }

    /// Restrict joins to the listed tables (the driving table is always
    /// present); used by fetch-group selects.
    pub fn only_tables(mut self, tables: HashSet<usize>) -> Self {
        self.only_tables = Some(tables);
        self
    }

    pub fn lock(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn build(self) -> (String, Vec<HydrationSlot>) {
        let meta = self.meta;
        let topology = meta.topology.as_ref();
        let root_alias = meta.table_alias(0);
        let alias_of = |j: usize| meta.table_alias(j);

        // select list + hydration layout
        let mut select_items: Vec<String> = Vec::new();
        let mut layout: Vec<HydrationSlot> = Vec::new();
        let mut used_tables: HashSet<usize> = HashSet::new();
        used_tables.insert(0);

        let push_property = |p: &PropertyMetadata,
                                 index: usize,
                                 select_items: &mut Vec<String>,
                                 layout: &mut Vec<HydrationSlot>,
                                 used_tables: &mut HashSet<usize>| {
            if !p.is_selectable() {
                return;
            }
            let alias = alias_of(p.table_index);
            for s in &p.selectables {
                select_items.push(s.read_template().replace("{alias}", &alias));
            }
            used_tables.insert(p.table_index);
            layout.push(HydrationSlot::Property { index, span: p.selectables.len() });
        };

        match &self.projection {
            Projection::FullState { include } => {
                for column in &meta.identifier.columns {
                    select_items.push(format!("{}.{}", root_alias, column));
                }
                layout.push(HydrationSlot::Identifier { span: meta.identifier.column_span() });
                if let Some(fragment) = topology.discriminator_fragment(&alias_of, self.dialect) {
                    select_items.push(fragment);
                    layout.push(HydrationSlot::Discriminator);
                }
                for (i, p) in meta.properties.iter().enumerate() {
                    if include[i] {
                        push_property(p, i, &mut select_items, &mut layout, &mut used_tables);
                    }
                }
            }
            Projection::IdOnly => {
                for column in &meta.identifier.columns {
                    select_items.push(format!("{}.{}", root_alias, column));
                }
                layout.push(HydrationSlot::Identifier { span: meta.identifier.column_span() });
            }
            Projection::Properties(indices) => {
                for &i in indices {
                    push_property(
                        &meta.properties[i],
                        i,
                        &mut select_items,
                        &mut layout,
                        &mut used_tables,
                    );
                }
            }
        }

        // where clause: filter tables are joined too
        let mut conditions: Vec<String> = Vec::new();
        match &self.filter {
            KeyFilter::ById => {
                for column in &meta.identifier.columns {
                    conditions.push(format!("{}.{}=?", root_alias, column));
                }
            }
            KeyFilter::ByIdList(n) => {
                let column = &meta.identifier.columns[0];
                let placeholders = vec!["?"; *n].join(", ");
                conditions.push(format!("{}.{} in ({})", root_alias, column, placeholders));
            }
            KeyFilter::ByPropertyNullness { indices, non_null } => {
                for (&i, &has_value) in indices.iter().zip(non_null.iter()) {
                    let p = &meta.properties[i];
                    let alias = alias_of(p.table_index);
                    used_tables.insert(p.table_index);
                    for s in &p.selectables {
                        let lhs = s.read_template().replace("{alias}", &alias);
                        if has_value {
                            conditions.push(format!("{}=?", lhs));
                        } else {
                            conditions.push(format!("{} is null", lhs));
                        }
                    }
                }
            }
            KeyFilter::ByProperty(i) => {
                let p = &meta.properties[*i];
                let alias = alias_of(p.table_index);
                used_tables.insert(p.table_index);
                for s in &p.selectables {
                    conditions.push(format!("{}=?", s.read_template().replace("{alias}", &alias)));
                }
            }
        }

        // from + joins; nullable/optional tables join left-outer so an absent
        // secondary row does not hide the entity
        let mut from = topology.from_fragment(&root_alias, self.include_subclasses);
        for j in 1..topology.table_span() {
            if let Some(only) = &self.only_tables
                && !only.contains(&j)
                && !used_tables.contains(&j)
            {
                continue;
            }
            let kind = topology.join_kind(j, self.include_subclasses, &self.treat_as);
            let keyword = match kind {
                JoinKind::Inner => "inner join",
                JoinKind::LeftOuter => "left outer join",
                JoinKind::None => {
                    if used_tables.contains(&j) {
                        // a projected or filtered column forces the join in
                        "left outer join"
                    } else {
                        continue;
                    }
                }
            };
            let alias = alias_of(j);
            let table = topology.table(j);
            let mut on = Vec::with_capacity(table.key_columns.len());
            for (key, id) in table.key_columns.iter().zip(&meta.identifier.columns) {
                on.push(format!("{}.{}={}.{}", alias, key, root_alias, id));
            }
            from.push_str(&format!(" {} {} {} on {}", keyword, table.name, alias, on.join(" and ")));
        }

        let lock_fragment = self.dialect.lock_fragment(self.lock.mode, self.lock.timeout);

        let mut sql = String::new();
        if let Some(comment) = &self.comment {
            sql.push_str(&format!("/* {} */ ", comment));
        }
        sql.push_str("select ");
        sql.push_str(&select_items.join(", "));
        sql.push_str(" from ");
        sql.push_str(&from);
        if !conditions.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&conditions.join(" and "));
        }
        sql.push_str(&lock_fragment);
        (sql, layout)
    }
}
