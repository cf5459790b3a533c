//! # In-Memory Backend
//!
//! Thread-safe table store used by tests and by the server when no database
//! is configured.
//!
//! ## Transactions
//!
//! A transaction copies each table on first touch and works on the copy.
//! Writes are recorded in an operation log. `commit` takes the write lock,
//! replays the log against fresh copies of the live tables, and swaps them in
//! only if every operation applied; otherwise nothing changes. Dropping a
//! transaction discards its copies.
//!
//! Updates replay only the columns the transaction changed, so two
//! transactions editing different columns of one row both take effect, and
//! the later commit wins for a column both touched.
//!
//! Primary keys are allocated from per-table sequences at insert time, not at
//! commit, so concurrent transactions never hand out the same key. Sequences
//! are not rolled back.
//!
//! All locks are `parking_lot` and are never held across `.await`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ferrest_core::Row;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::backend::{Isolation, Storage, Transaction};
use crate::error::StoreError;
use crate::query::{Direction, Filter, Ordering, Query, TableRef};

// ── Keys & Tables ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Key::Int)
                .ok_or_else(|| StoreError::InvalidRecord(format!("non-integer key {n}"))),
            Value::String(s) => Ok(Key::Text(s.clone())),
            other => Err(StoreError::InvalidRecord(format!("unusable key {other}"))),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::from(*n),
            Key::Text(s) => Value::String(s.clone()),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MemTable {
    rows: BTreeMap<Key, Row>,
}

#[derive(Debug)]
enum Op {
    Insert { table: String, key: Key, row: Row },
    Update { table: String, key: Key, changes: Row },
    Delete { table: String, key: Key },
}

impl Op {
    fn table(&self) -> &str {
        match self {
            Op::Insert { table, .. } | Op::Update { table, .. } | Op::Delete { table, .. } => table,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: RwLock<HashMap<String, MemTable>>,
    sequences: Mutex<HashMap<String, i64>>,
    unique: RwLock<HashMap<String, Vec<String>>>,
}

impl Inner {
    fn next_id(&self, table: &str) -> i64 {
        let mut seq = self.sequences.lock();
        let current = seq.entry(table.to_string()).or_insert(0);
        *current += 1;
        *current
    }

    fn observe_key(&self, table: &str, key: &Key) {
        if let Key::Int(n) = key {
            let mut seq = self.sequences.lock();
            let current = seq.entry(table.to_string()).or_insert(0);
            if *current < *n {
                *current = *n;
            }
        }
    }

    fn unique_columns(&self, table: &str) -> Vec<String> {
        self.unique.read().get(table).cloned().unwrap_or_default()
    }
}

// ── Storage ─────────────────────────────────────────────────────────────────

/// Shared in-memory store. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a unique column. Enforced on insert, update and commit.
    pub fn with_unique(self, table: &str, column: &str) -> Self {
        self.inner
            .unique
            .write()
            .entry(table.to_string())
            .or_default()
            .push(column.to_string());
        self
    }

    /// Number of committed rows in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.inner
            .tables
            .read()
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self, _isolation: Isolation) -> Result<Box<dyn Transaction>, StoreError> {
        // Tables are copied on first touch, which already gives every
        // statement a stable view of that table.
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            working: HashMap::new(),
            ops: Vec::new(),
        }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── Transaction ─────────────────────────────────────────────────────────────

/// A unit of work against a [`MemoryStorage`].
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    working: HashMap<String, MemTable>,
    ops: Vec<Op>,
}

impl MemoryTransaction {
    fn working_table(&mut self, name: &str) -> &mut MemTable {
        let inner = &self.inner;
        self.working
            .entry(name.to_string())
            .or_insert_with(|| inner.tables.read().get(name).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn fetch(&mut self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let table = self.working_table(&query.table.name);
        let mut rows: Vec<Row> = table
            .rows
            .values()
            .filter(|row| matches_all(&query.filters, row))
            .cloned()
            .collect();
        // Stable sort over primary-key order breaks ties by key.
        rows.sort_by(|a, b| compare_rows(a, b, &query.order));
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(limit)
            .collect())
    }

    async fn count(&mut self, query: &Query) -> Result<u64, StoreError> {
        let table = self.working_table(&query.table.name);
        Ok(table
            .rows
            .values()
            .filter(|row| matches_all(&query.filters, row))
            .count() as u64)
    }

    async fn insert(&mut self, table: &TableRef, mut row: Row) -> Result<Row, StoreError> {
        let key = match row.get(&table.primary_key) {
            Some(v) if !v.is_null() => {
                let key = Key::from_value(v)?;
                self.inner.observe_key(&table.name, &key);
                key
            }
            _ => {
                let key = Key::Int(self.inner.next_id(&table.name));
                row.insert(table.primary_key.clone(), key.to_value());
                key
            }
        };
        let unique = self.inner.unique_columns(&table.name);
        let working = self.working_table(&table.name);
        if working.rows.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "duplicate primary key {key} in '{}'",
                table.name
            )));
        }
        check_unique(&table.name, working, &unique, &key, &row)?;
        working.rows.insert(key.clone(), row.clone());
        self.ops.push(Op::Insert {
            table: table.name.clone(),
            key,
            row: row.clone(),
        });
        Ok(row)
    }

    async fn update(&mut self, table: &TableRef, key: &Value, mut changes: Row) -> Result<Row, StoreError> {
        let key = Key::from_value(key)?;
        changes.remove(&table.primary_key);
        let unique = self.inner.unique_columns(&table.name);
        let working = self.working_table(&table.name);
        let mut merged = working.rows.get(&key).cloned().ok_or_else(|| StoreError::NotFound {
            table: table.name.clone(),
            key: key.to_string(),
        })?;
        for (column, value) in &changes {
            merged.insert(column.clone(), value.clone());
        }
        check_unique(&table.name, working, &unique, &key, &merged)?;
        working.rows.insert(key.clone(), merged.clone());
        self.ops.push(Op::Update {
            table: table.name.clone(),
            key,
            changes,
        });
        Ok(merged)
    }

    async fn delete(&mut self, table: &TableRef, key: &Value) -> Result<(), StoreError> {
        let key = Key::from_value(key)?;
        let working = self.working_table(&table.name);
        if working.rows.remove(&key).is_none() {
            return Err(StoreError::NotFound {
                table: table.name.clone(),
                key: key.to_string(),
            });
        }
        self.ops.push(Op::Delete {
            table: table.name.clone(),
            key,
        });
        Ok(())
    }

    async fn delete_where(&mut self, query: &Query) -> Result<u64, StoreError> {
        let working = self.working_table(&query.table.name);
        let keys: Vec<Key> = working
            .rows
            .iter()
            .filter(|(_, row)| matches_all(&query.filters, row))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            working.rows.remove(key);
        }
        let removed = keys.len() as u64;
        self.ops.extend(keys.into_iter().map(|key| Op::Delete {
            table: query.table.name.clone(),
            key,
        }));
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        if this.ops.is_empty() {
            return Ok(());
        }
        let unique = this.inner.unique.read().clone();
        let mut live = this.inner.tables.write();

        let mut staged: HashMap<String, MemTable> = HashMap::new();
        for op in &this.ops {
            let name = op.table();
            if !staged.contains_key(name) {
                staged.insert(name.to_string(), live.get(name).cloned().unwrap_or_default());
            }
        }
        for op in this.ops {
            apply(&mut staged, &unique, op)?;
        }
        live.extend(staged);
        Ok(())
    }
}

fn apply(
    staged: &mut HashMap<String, MemTable>,
    unique: &HashMap<String, Vec<String>>,
    op: Op,
) -> Result<(), StoreError> {
    let no_constraints = Vec::new();
    match op {
        Op::Insert { table, key, row } => {
            let cols = unique.get(&table).unwrap_or(&no_constraints);
            let target = staged.entry(table.clone()).or_default();
            if target.rows.contains_key(&key) {
                return Err(StoreError::Conflict(format!(
                    "duplicate primary key {key} in '{table}'"
                )));
            }
            check_unique(&table, target, cols, &key, &row)?;
            target.rows.insert(key, row);
        }
        Op::Update { table, key, changes } => {
            let cols = unique.get(&table).unwrap_or(&no_constraints);
            let target = staged.entry(table.clone()).or_default();
            let mut merged = target.rows.get(&key).cloned().ok_or_else(|| {
                StoreError::Conflict(format!(
                    "record {key} in '{table}' was removed by a concurrent transaction"
                ))
            })?;
            for (column, value) in changes {
                merged.insert(column, value);
            }
            check_unique(&table, target, cols, &key, &merged)?;
            target.rows.insert(key, merged);
        }
        Op::Delete { table, key } => {
            staged.entry(table).or_default().rows.remove(&key);
        }
    }
    Ok(())
}

fn check_unique(
    table_name: &str,
    table: &MemTable,
    columns: &[String],
    key: &Key,
    row: &Row,
) -> Result<(), StoreError> {
    for column in columns {
        let Some(value) = row.get(column) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let clash = table
            .rows
            .iter()
            .any(|(other, existing)| other != key && existing.get(column) == Some(value));
        if clash {
            return Err(StoreError::Conflict(format!(
                "duplicate value for {table_name}.{column}"
            )));
        }
    }
    Ok(())
}

// ── Evaluation ──────────────────────────────────────────────────────────────

fn matches_all(filters: &[Filter], row: &Row) -> bool {
    filters.iter().all(|f| matches(f, row))
}

fn matches(filter: &Filter, row: &Row) -> bool {
    match filter {
        Filter::Eq { column, value } => row.get(column).unwrap_or(&Value::Null) == value,
        Filter::In { column, values } => {
            let current = row.get(column).unwrap_or(&Value::Null);
            values.iter().any(|v| v == current)
        }
        Filter::Search { columns, term } => {
            let needle = term.to_lowercase();
            columns.iter().any(|c| contains_ci(row.get(c), &needle))
        }
    }
}

fn contains_ci(value: Option<&Value>, needle: &str) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => s.to_lowercase().contains(needle),
        Some(other) => other.to_string().to_lowercase().contains(needle),
    }
}

fn compare_rows(a: &Row, b: &Row, order: &[Ordering]) -> CmpOrdering {
    for ordering in order {
        let cmp = compare_values(a.get(&ordering.column), b.get(&ordering.column));
        let cmp = match ordering.direction {
            Direction::Asc => cmp,
            Direction::Desc => cmp.reverse(),
        };
        if cmp != CmpOrdering::Equal {
            return cmp;
        }
    }
    CmpOrdering::Equal
}

/// Nulls sort after every value, matching PostgreSQL's default.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Null, Value::Null) => CmpOrdering::Equal,
        (Value::Null, _) => CmpOrdering::Greater,
        (_, Value::Null) => CmpOrdering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> TableRef {
        TableRef::new("auth_user", "id")
    }

    fn user(username: &str, first_name: &str) -> Row {
        let mut row = Row::new();
        row.insert("username".into(), json!(username));
        row.insert("first_name".into(), json!(first_name));
        row
    }

    async fn seeded() -> MemoryStorage {
        let store = MemoryStorage::new().with_unique("auth_user", "username");
        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        for (u, f) in [("alice", "Alice"), ("bob", "Robert"), ("carol", "Caroline"), ("dave", "David")] {
            tx.insert(&users(), user(u, f)).await.unwrap();
        }
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn insert_assigns_sequential_keys() {
        let store = seeded().await;
        let rows = store.fetch(&Query::table(users())).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = seeded().await;
        {
            let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
            tx.insert(&users(), user("eve", "Eve")).await.unwrap();
            tx.delete(&users(), &json!(1)).await.unwrap();
        }
        assert_eq!(store.row_count("auth_user"), 4);
        assert!(store
            .fetch_one(&Query::table(users()).by_key(json!(1)))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn uncommitted_writes_visible_inside_transaction_only() {
        let store = seeded().await;
        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        tx.insert(&users(), user("eve", "Eve")).await.unwrap();
        assert_eq!(tx.count(&Query::table(users())).await.unwrap(), 5);
        assert_eq!(store.row_count("auth_user"), 4);
        tx.commit().await.unwrap();
        assert_eq!(store.row_count("auth_user"), 5);
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_or_combined() {
        let store = seeded().await;
        let fields = vec!["first_name".to_string(), "username".to_string()];
        let q = Query::table(users()).search(&fields, "ROB");
        let rows = store.fetch(&q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], "bob");

        // "ca" matches username "carol" and first_name "Caroline" on one row only.
        let q = Query::table(users()).search(&fields, "ca");
        assert_eq!(store.fetch(&q).await.unwrap().len(), 1);

        // "a" hits alice, carol and dave; bob/Robert has no "a".
        let q = Query::table(users()).search(&fields, "a");
        assert_eq!(store.fetch(&q).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn ordering_descending_and_pagination() {
        let store = seeded().await;
        let q = Query::table(users())
            .order_by(Ordering::desc("username"))
            .offset(1)
            .limit(2);
        let rows = store.fetch(&q).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["username"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["carol", "bob"]);

        let mut tx = store.begin(Isolation::Snapshot).await.unwrap();
        assert_eq!(tx.count(&q).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn update_merges_changes_and_keeps_key() {
        let store = seeded().await;
        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        let mut changes = Row::new();
        changes.insert("first_name".into(), json!("Ally"));
        changes.insert("id".into(), json!(99));
        let row = tx.update(&users(), &json!(1), changes).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(row["id"], json!(1));
        assert_eq!(row["username"], "alice");
        assert_eq!(row["first_name"], "Ally");
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let store = seeded().await;
        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        let err = tx.update(&users(), &json!(42), Row::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unique_violation_inside_transaction() {
        let store = seeded().await;
        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        let err = tx.insert(&users(), user("alice", "Other")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_unique_insert_conflicts_at_commit() {
        let store = MemoryStorage::new().with_unique("auth_user", "username");
        let mut first = store.begin(Isolation::ReadCommitted).await.unwrap();
        let mut second = store.begin(Isolation::ReadCommitted).await.unwrap();
        first.insert(&users(), user("zed", "Z")).await.unwrap();
        second.insert(&users(), user("zed", "Zed")).await.unwrap();
        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.row_count("auth_user"), 1);
    }

    #[tokio::test]
    async fn concurrent_partial_updates_both_apply() {
        let store = seeded().await;
        let mut first = store.begin(Isolation::ReadCommitted).await.unwrap();
        let mut second = store.begin(Isolation::ReadCommitted).await.unwrap();

        let mut a = Row::new();
        a.insert("first_name".into(), json!("Al"));
        first.update(&users(), &json!(1), a).await.unwrap();

        let mut b = Row::new();
        b.insert("email".into(), json!("al@example.com"));
        second.update(&users(), &json!(1), b).await.unwrap();

        first.commit().await.unwrap();
        second.commit().await.unwrap();

        let row = store
            .fetch_one(&Query::table(users()).by_key(json!(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["first_name"], "Al");
        assert_eq!(row["email"], "al@example.com");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_unique_inserts_commit_once() {
        let store = MemoryStorage::new().with_unique("auth_user", "username");
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.spawn(async move {
                let mut tx = store.begin(Isolation::ReadCommitted).await?;
                tx.insert(&users(), user("zed", &format!("Zed {i}"))).await?;
                tx.commit().await
            });
        }

        let (mut committed, mut conflicts) = (0, 0);
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(()) => committed += 1,
                Err(StoreError::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected store error: {other}"),
            }
        }
        assert_eq!((committed, conflicts), (1, 15));
        assert_eq!(store.row_count("auth_user"), 1);
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let store = seeded().await;
        let mut racer = store.begin(Isolation::ReadCommitted).await.unwrap();
        racer.insert(&users(), user("zoe", "Zoe")).await.unwrap();

        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        tx.delete(&users(), &json!(2)).await.unwrap();
        tx.insert(&users(), user("zoe", "Zoey")).await.unwrap();

        racer.commit().await.unwrap();
        assert!(tx.commit().await.is_err());
        // The delete in the failed transaction must not have landed.
        assert!(store
            .fetch_one(&Query::table(users()).by_key(json!(2)))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn delete_where_removes_matching_rows() {
        let store = seeded().await;
        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        let removed = tx
            .delete_where(&Query::table(users()).filter_in("username", vec![json!("bob"), json!("dave")]))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.row_count("auth_user"), 2);
    }

    #[test]
    fn nulls_sort_last_ascending() {
        assert_eq!(compare_values(None, Some(&json!(1))), CmpOrdering::Greater);
        assert_eq!(compare_values(Some(&json!(2)), Some(&json!(10))), CmpOrdering::Less);
        assert_eq!(compare_values(Some(&json!("b")), Some(&json!("a"))), CmpOrdering::Greater);
    }
}
