//! Shared test harness: an in-memory `StatementExecutor` that understands
//! the SQL shapes this engine generates (parameterized inserts, updates and
//! deletes, aliased joins, CASE discriminators, IN lists). Backed by plain
//! row maps so scenario tests can run end to end without a database.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use relmap::core::{Row, Value};
use relmap::exec::{BatchKey, ExecResult, PreparedSql, RowCursor, SqlFailure, StatementExecutor};

pub type StoredRow = HashMap<String, Value>;

#[derive(Default)]
struct DbInner {
    tables: HashMap<String, Vec<StoredRow>>,
    log: Vec<String>,
    batches: HashMap<BatchKey, Vec<PreparedSql>>,
    next_identity: i64,
}

/// Handle to the shared in-memory database; clone it to keep inspecting the
/// store after handing an executor to a session.
#[derive(Clone, Default)]
pub struct SharedDb {
    inner: Arc<Mutex<DbInner>>,
}

impl SharedDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executor(&self) -> Box<dyn StatementExecutor> {
        Box::new(MemoryExecutor { db: self.clone() })
    }

    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.inner.lock().unwrap().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn seed_row(&self, table: &str, row: StoredRow) {
        self.inner.lock().unwrap().tables.entry(table.to_string()).or_default().push(row);
    }

    /// Every SQL string executed so far, in order (batch members appear when
    /// flushed).
    pub fn statements(&self) -> Vec<String> {
        self.inner.lock().unwrap().log.clone()
    }

    pub fn statements_matching(&self, needle: &str) -> Vec<String> {
        self.statements().into_iter().filter(|s| s.contains(needle)).collect()
    }

    pub fn clear_log(&self) {
        self.inner.lock().unwrap().log.clear();
    }
}

pub struct MemoryExecutor {
    db: SharedDb,
}

struct VecCursor(std::vec::IntoIter<Row>);

impl RowCursor for VecCursor {
    fn next_row(&mut self) -> ExecResult<Option<Row>> {
        Ok(self.0.next())
    }
}

impl StatementExecutor for MemoryExecutor {
    fn execute_update(&mut self, stmt: &PreparedSql) -> ExecResult<u64> {
        let mut inner = self.db.inner.lock().unwrap();
        inner.log.push(stmt.sql.clone());
        run_update(&mut inner, stmt)
    }

    fn execute_query(&mut self, stmt: &PreparedSql) -> ExecResult<Box<dyn RowCursor>> {
        let mut inner = self.db.inner.lock().unwrap();
        inner.log.push(stmt.sql.clone());
        let rows = run_select(&inner, stmt)?;
        Ok(Box::new(VecCursor(rows.into_iter())))
    }

    fn execute_insert_returning(&mut self, stmt: &PreparedSql) -> ExecResult<Row> {
        let mut inner = self.db.inner.lock().unwrap();
        inner.log.push(stmt.sql.clone());
        // identity columns are named `id` by convention in the tests
        inner.next_identity += 1;
        let generated = Value::Integer(inner.next_identity);
        run_insert(&mut inner, stmt, Some(("id", generated.clone())))?;
        Ok(vec![generated])
    }

    fn add_to_batch(&mut self, key: &BatchKey, stmt: &PreparedSql) -> ExecResult<()> {
        let mut inner = self.db.inner.lock().unwrap();
        inner.batches.entry(key.clone()).or_default().push(stmt.clone());
        Ok(())
    }

    fn execute_batch(&mut self, key: &BatchKey) -> ExecResult<Vec<u64>> {
        let mut inner = self.db.inner.lock().unwrap();
        let queued = inner.batches.remove(key).unwrap_or_default();
        let mut counts = Vec::with_capacity(queued.len());
        for stmt in queued {
            inner.log.push(stmt.sql.clone());
            counts.push(run_update(&mut inner, &stmt)?);
        }
        Ok(counts)
    }

    fn abort_batch(&mut self, key: &BatchKey) {
        self.db.inner.lock().unwrap().batches.remove(key);
    }
}

// ---------------------------------------------------------------------------
// statement interpretation
// ---------------------------------------------------------------------------

fn strip_comment(sql: &str) -> &str {
    match sql.strip_prefix("/*") {
        Some(rest) => rest.split_once("*/ ").map(|(_, tail)| tail).unwrap_or(sql),
        None => sql,
    }
}

fn strip_lock(sql: &str) -> &str {
    for marker in [" for update", " for share"] {
        if let Some(pos) = sql.find(marker) {
            return &sql[..pos];
        }
    }
    sql
}

fn run_update(inner: &mut DbInner, stmt: &PreparedSql) -> ExecResult<u64> {
    let sql = strip_comment(&stmt.sql);
    if sql.starts_with("insert into ") {
        run_insert(inner, stmt, None)?;
        Ok(1)
    } else if sql.starts_with("update ") {
        run_sql_update(inner, stmt)
    } else if sql.starts_with("delete from ") {
        run_delete(inner, stmt)
    } else {
        Err(SqlFailure::new(format!("unsupported update statement: {}", sql)))
    }
}

fn run_insert(
    inner: &mut DbInner,
    stmt: &PreparedSql,
    extra: Option<(&str, Value)>,
) -> ExecResult<()> {
    let sql = strip_comment(&stmt.sql);
    let body = sql.strip_prefix("insert into ").unwrap();
    let mut params: VecDeque<Value> = stmt.params.iter().cloned().collect();
    let mut row = StoredRow::new();

    let table = if let Some(table) = body.strip_suffix(" values ( )") {
        table
    } else if let Some((table, rest)) = body.split_once(" (") {
        let (columns, values) = rest
            .split_once(") values (")
            .ok_or_else(|| SqlFailure::new(format!("malformed insert: {}", sql)))?;
        let values = values.strip_suffix(')').unwrap_or(values);
        for (column, value_expr) in columns.split(", ").zip(values.split(", ")) {
            let value = if value_expr.contains('?') {
                params.pop_front().ok_or_else(|| SqlFailure::new("missing bind parameter"))?
            } else {
                parse_literal(value_expr)?
            };
            row.insert(unquote(column), value);
        }
        table
    } else {
        // "insert into T values ( )"
        body.split_once(' ')
            .map(|(table, _)| table)
            .ok_or_else(|| SqlFailure::new(format!("malformed insert: {}", sql)))?
    };

    if let Some((column, value)) = extra {
        row.insert(column.to_string(), value);
    }
    inner.tables.entry(unquote(table)).or_default().push(row);
    Ok(())
}

fn run_sql_update(inner: &mut DbInner, stmt: &PreparedSql) -> ExecResult<u64> {
    let sql = strip_comment(&stmt.sql);
    let body = sql.strip_prefix("update ").unwrap();
    let (table, rest) = body
        .split_once(" set ")
        .ok_or_else(|| SqlFailure::new(format!("malformed update: {}", sql)))?;
    let (assignments, where_clause) = rest
        .split_once(" where ")
        .ok_or_else(|| SqlFailure::new(format!("update without where: {}", sql)))?;

    let mut params: VecDeque<Value> = stmt.params.iter().cloned().collect();
    let mut changes: Vec<(String, Value)> = Vec::new();
    for assignment in assignments.split(", ") {
        let (column, value_expr) = assignment
            .split_once('=')
            .ok_or_else(|| SqlFailure::new(format!("malformed assignment: {}", assignment)))?;
        let value = if value_expr.contains('?') {
            params.pop_front().ok_or_else(|| SqlFailure::new("missing bind parameter"))?
        } else {
            parse_literal(value_expr)?
        };
        changes.push((unquote(column), value));
    }
    let predicates = parse_predicates(where_clause, &mut params)?;

    let rows = inner.tables.entry(unquote(table)).or_default();
    let mut affected = 0u64;
    for row in rows.iter_mut() {
        if predicates.iter().all(|p| p.matches(row)) {
            for (column, value) in &changes {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
    }
    Ok(affected)
}

fn run_delete(inner: &mut DbInner, stmt: &PreparedSql) -> ExecResult<u64> {
    let sql = strip_comment(&stmt.sql);
    let body = sql.strip_prefix("delete from ").unwrap();
    let (table, where_clause) = body
        .split_once(" where ")
        .ok_or_else(|| SqlFailure::new(format!("delete without where: {}", sql)))?;
    let mut params: VecDeque<Value> = stmt.params.iter().cloned().collect();
    let predicates = parse_predicates(where_clause, &mut params)?;

    let rows = inner.tables.entry(unquote(table)).or_default();
    let before = rows.len();
    rows.retain(|row| !predicates.iter().all(|p| p.matches(row)));
    Ok((before - rows.len()) as u64)
}

// one WHERE conjunct, pre-bound
enum Predicate {
    Eq(String, Value),
    IsNull(String),
    In(String, Vec<Value>),
}

impl Predicate {
    fn matches(&self, row: &StoredRow) -> bool {
        match self {
            Self::Eq(column, value) => row.get(column).map(|v| v == value).unwrap_or(false),
            Self::IsNull(column) => {
                row.get(column).map(|v| v == &Value::Null).unwrap_or(true)
            }
            Self::In(column, values) => {
                row.get(column).map(|v| values.contains(v)).unwrap_or(false)
            }
        }
    }
}

fn parse_predicates(
    where_clause: &str,
    params: &mut VecDeque<Value>,
) -> ExecResult<Vec<Predicate>> {
    let mut predicates = Vec::new();
    for conjunct in where_clause.split(" and ") {
        let conjunct = conjunct.trim();
        if let Some(column) = conjunct.strip_suffix(" is null") {
            predicates.push(Predicate::IsNull(local_column(column)));
        } else if let Some((column, list)) = conjunct.split_once(" in (") {
            let list = list.strip_suffix(')').unwrap_or(list);
            let mut values = Vec::new();
            for item in list.split(", ") {
                if item.contains('?') {
                    values.push(
                        params
                            .pop_front()
                            .ok_or_else(|| SqlFailure::new("missing bind parameter"))?,
                    );
                } else {
                    values.push(parse_literal(item)?);
                }
            }
            predicates.push(Predicate::In(local_column(column), values));
        } else if let Some((column, rhs)) = conjunct.split_once('=') {
            let rhs = rhs.trim();
            let value = if rhs.contains('?') {
                params.pop_front().ok_or_else(|| SqlFailure::new("missing bind parameter"))?
            } else {
                parse_literal(rhs)?
            };
            predicates.push(Predicate::Eq(local_column(column.trim()), value));
        } else {
            return Err(SqlFailure::new(format!("unsupported predicate: {}", conjunct)));
        }
    }
    Ok(predicates)
}

// strip an alias qualifier: "a0_.balance" -> "balance"
fn local_column(column: &str) -> String {
    unquote(column.rsplit('.').next().unwrap_or(column))
}

fn unquote(ident: &str) -> String {
    ident.trim().trim_matches('"').to_string()
}

fn parse_literal(expr: &str) -> ExecResult<Value> {
    let expr = expr.trim();
    if expr.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    if expr == "true" || expr == "false" {
        return Ok(Value::Boolean(expr == "true"));
    }
    if let Some(text) = expr.strip_prefix('\'') {
        let text = text.strip_suffix('\'').unwrap_or(text);
        return Ok(Value::Text(text.replace("''", "'")));
    }
    expr.parse::<i64>()
        .map(Value::Integer)
        .map_err(|_| SqlFailure::new(format!("unsupported literal: {}", expr)))
}

// ---------------------------------------------------------------------------
// select interpretation
// ---------------------------------------------------------------------------

/// Alias -> row binding for one joined tuple; a missing alias means the
/// outer-joined row was absent.
type Tuple = HashMap<String, StoredRow>;

fn run_select(inner: &DbInner, stmt: &PreparedSql) -> ExecResult<Vec<Row>> {
    let sql = strip_lock(strip_comment(&stmt.sql));
    let body = sql
        .strip_prefix("select ")
        .ok_or_else(|| SqlFailure::new(format!("unsupported query: {}", sql)))?;
    let (select_list, rest) = body
        .split_once(" from ")
        .ok_or_else(|| SqlFailure::new(format!("malformed select: {}", sql)))?;
    let (from_part, where_part) = match rest.split_once(" where ") {
        Some((from, where_clause)) => (from, Some(where_clause)),
        None => (rest, None),
    };

    if from_part.starts_with('(') {
        return Err(SqlFailure::new("subquery selects are not supported by the test executor"));
    }

    let mut params: VecDeque<Value> = stmt.params.iter().cloned().collect();
    let tuples = join_tuples(inner, from_part)?;
    let predicates = match where_part {
        Some(clause) => parse_tuple_predicates(clause, &mut params)?,
        None => Vec::new(),
    };

    let mut results = Vec::new();
    for tuple in tuples {
        if predicates.iter().all(|p| p.matches(&tuple)) {
            let mut row = Vec::new();
            for item in select_list.split(", ") {
                row.push(eval_select_item(item, &tuple)?);
            }
            results.push(row);
        }
    }
    Ok(results)
}

fn join_tuples(inner: &DbInner, from_part: &str) -> ExecResult<Vec<Tuple>> {
    // "person p0_ left outer join employee p1_ on a=b and c=d inner join ..."
    let mut segments: Vec<(&str, bool)> = Vec::new();
    let mut remaining = from_part;
    let mut current_outer = false;
    loop {
        let next_left = remaining.find(" left outer join ");
        let next_inner = remaining.find(" inner join ");
        let (pos, len, outer) = match (next_left, next_inner) {
            (Some(l), Some(i)) if l < i => (l, " left outer join ".len(), true),
            (Some(l), None) => (l, " left outer join ".len(), true),
            (_, Some(i)) => (i, " inner join ".len(), false),
            (None, None) => {
                segments.push((remaining, current_outer));
                break;
            }
        };
        segments.push((&remaining[..pos], current_outer));
        remaining = &remaining[pos + len..];
        current_outer = outer;
    }

    let (base, _) = segments[0];
    // unaliased single-table selects alias the table to itself
    let (base_table, base_alias) = base.rsplit_once(' ').unwrap_or((base, base));
    let base_rows = inner.tables.get(&unquote(base_table)).cloned().unwrap_or_default();
    let mut tuples: Vec<Tuple> = base_rows
        .into_iter()
        .map(|row| {
            let mut t = Tuple::new();
            t.insert(base_alias.to_string(), row);
            t
        })
        .collect();

    for &(segment, outer) in &segments[1..] {
        let (head, on_clause) = segment
            .split_once(" on ")
            .ok_or_else(|| SqlFailure::new(format!("join without on: {}", segment)))?;
        let (table, alias) = head
            .rsplit_once(' ')
            .ok_or_else(|| SqlFailure::new(format!("malformed join: {}", head)))?;
        let join_rows = inner.tables.get(&unquote(table)).cloned().unwrap_or_default();

        let mut pairs = Vec::new();
        for condition in on_clause.split(" and ") {
            let (left, right) = condition
                .split_once('=')
                .ok_or_else(|| SqlFailure::new(format!("malformed join condition: {}", condition)))?;
            pairs.push((left.trim().to_string(), right.trim().to_string()));
        }

        let mut joined = Vec::new();
        for tuple in tuples {
            let mut matched = false;
            for row in &join_rows {
                let mut probe = tuple.clone();
                probe.insert(alias.to_string(), row.clone());
                let hit = pairs.iter().all(|(left, right)| {
                    match (eval_column(left, &probe), eval_column(right, &probe)) {
                        (Some(a), Some(b)) => a == b && a != Value::Null,
                        _ => false,
                    }
                });
                if hit {
                    joined.push(probe);
                    matched = true;
                }
            }
            if !matched {
                if outer {
                    joined.push(tuple);
                } // inner join: tuple dropped
            }
        }
        tuples = joined;
    }
    Ok(tuples)
}

enum TuplePredicate {
    Eq(String, Value),
    IsNull(String),
    In(String, Vec<Value>),
}

impl TuplePredicate {
    fn matches(&self, tuple: &Tuple) -> bool {
        match self {
            Self::Eq(column, value) => {
                eval_column(column, tuple).map(|v| &v == value).unwrap_or(false)
            }
            Self::IsNull(column) => {
                eval_column(column, tuple).map(|v| v == Value::Null).unwrap_or(true)
            }
            Self::In(column, values) => eval_column(column, tuple)
                .map(|v| values.contains(&v))
                .unwrap_or(false),
        }
    }
}

fn parse_tuple_predicates(
    where_clause: &str,
    params: &mut VecDeque<Value>,
) -> ExecResult<Vec<TuplePredicate>> {
    let mut predicates = Vec::new();
    for conjunct in where_clause.split(" and ") {
        let conjunct = conjunct.trim();
        if let Some(column) = conjunct.strip_suffix(" is null") {
            predicates.push(TuplePredicate::IsNull(column.trim().to_string()));
        } else if let Some((column, list)) = conjunct.split_once(" in (") {
            let list = list.strip_suffix(')').unwrap_or(list);
            let mut values = Vec::new();
            for item in list.split(", ") {
                if item.contains('?') {
                    values.push(
                        params
                            .pop_front()
                            .ok_or_else(|| SqlFailure::new("missing bind parameter"))?,
                    );
                } else {
                    values.push(parse_literal(item)?);
                }
            }
            predicates.push(TuplePredicate::In(column.trim().to_string(), values));
        } else if let Some((column, rhs)) = conjunct.split_once('=') {
            let rhs = rhs.trim();
            let value = if rhs.contains('?') {
                params.pop_front().ok_or_else(|| SqlFailure::new("missing bind parameter"))?
            } else {
                parse_literal(rhs)?
            };
            predicates.push(TuplePredicate::Eq(column.trim().to_string(), value));
        } else {
            return Err(SqlFailure::new(format!("unsupported predicate: {}", conjunct)));
        }
    }
    Ok(predicates)
}

/// Resolve a possibly alias-qualified column against a joined tuple. An
/// absent outer-joined alias reads as null; `None` means the reference is
/// not a column at all.
fn eval_column(reference: &str, tuple: &Tuple) -> Option<Value> {
    let reference = reference.trim();
    if let Some((alias, column)) = reference.split_once('.') {
        // an absent outer-joined alias reads as null
        return Some(match tuple.get(alias) {
            Some(row) => row.get(&unquote(column)).cloned().unwrap_or(Value::Null),
            None => Value::Null,
        });
    }
    // unaliased single-table select
    tuple
        .values()
        .next()
        .map(|row| row.get(&unquote(reference)).cloned().unwrap_or(Value::Null))
}

fn eval_select_item(item: &str, tuple: &Tuple) -> ExecResult<Value> {
    let item = item.trim();
    if let Some(case) = item.strip_prefix("case ") {
        // "when <col> is not null then <literal> ... end"
        let case = case.strip_suffix(" end").unwrap_or(case);
        for arm in case.split("when ").filter(|s| !s.is_empty()) {
            let (probe, result) = arm
                .split_once(" is not null then ")
                .ok_or_else(|| SqlFailure::new(format!("unsupported case arm: {}", arm)))?;
            let probed = eval_column(probe, tuple).unwrap_or(Value::Null);
            if probed != Value::Null {
                return parse_literal(result.trim());
            }
        }
        return Ok(Value::Null);
    }
    match eval_column(item, tuple) {
        Some(value) => Ok(value),
        None => parse_literal(item),
    }
}
