//! # PostgreSQL Backend
//!
//! Renders [`Query`] values to SQL with `sqlx::QueryBuilder`. Rows travel as
//! JSON in both directions so the backend works over any table shape without
//! compile-time row types:
//!
//! - reads select `to_jsonb(t)` for each row;
//! - writes populate a typed record with `jsonb_populate_record(NULL::<table>, $1)`
//!   and return the stored row with `RETURNING to_jsonb(t)`.
//!
//! Table and column names are checked to be plain identifiers and quoted;
//! every value is a bind parameter. List reads always order by the primary
//! key last so pagination is stable.
//!
//! Schema management is out of scope: tables must already exist.

use std::time::Duration;

use async_trait::async_trait;
use ferrest_core::Row;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::types::Json;
use sqlx::QueryBuilder;

use crate::backend::{Isolation, Storage, Transaction};
use crate::error::StoreError;
use crate::query::{Direction, Filter, Query, TableRef};

type Sql = QueryBuilder<'static, Postgres>;

/// Open a connection pool.
pub async fn connect(url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;
    tracing::info!("Connected to PostgreSQL");
    Ok(pool)
}

// ── Storage ─────────────────────────────────────────────────────────────────

/// PostgreSQL-backed [`Storage`].
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin(&self, isolation: Isolation) -> Result<Box<dyn Transaction>, StoreError> {
        let mut tx = self.pool.begin().await?;
        if isolation == Isolation::Snapshot {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                .execute(&mut *tx)
                .await?;
        }
        Ok(Box::new(PgTransaction { tx }))
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// An open PostgreSQL transaction. Rolled back on drop unless committed.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn fetch(&mut self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let mut sql = select_sql(query)?;
        let values: Vec<Value> = sql.build_query_scalar::<Value>().fetch_all(&mut *self.tx).await?;
        values.into_iter().map(into_row).collect()
    }

    async fn count(&mut self, query: &Query) -> Result<u64, StoreError> {
        let mut sql = count_sql(query)?;
        let count: i64 = sql.build_query_scalar::<i64>().fetch_one(&mut *self.tx).await?;
        Ok(count.max(0) as u64)
    }

    async fn insert(&mut self, table: &TableRef, row: Row) -> Result<Row, StoreError> {
        let mut sql = insert_sql(table, row)?;
        let value: Value = sql.build_query_scalar::<Value>().fetch_one(&mut *self.tx).await?;
        into_row(value)
    }

    async fn update(&mut self, table: &TableRef, key: &Value, changes: Row) -> Result<Row, StoreError> {
        let mut sql = match update_sql(table, key, changes)? {
            Some(sql) => sql,
            None => select_sql(&Query::table(table.clone()).by_key(key.clone()).limit(1))?,
        };
        let value: Option<Value> = sql
            .build_query_scalar::<Value>()
            .fetch_optional(&mut *self.tx)
            .await?;
        match value {
            Some(value) => into_row(value),
            None => Err(StoreError::NotFound {
                table: table.name.clone(),
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&mut self, table: &TableRef, key: &Value) -> Result<(), StoreError> {
        let mut sql = delete_sql(table, key)?;
        let result = sql.build().execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                table: table.name.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_where(&mut self, query: &Query) -> Result<u64, StoreError> {
        let mut sql = Sql::new(format!("DELETE FROM {} AS t", quote_ident(&query.table.name)?));
        push_where(&mut sql, &query.filters)?;
        let result = sql.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}

// ── SQL Rendering ───────────────────────────────────────────────────────────

fn into_row(value: Value) -> Result<Row, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidRecord(format!(
            "expected a JSON object row, got {other}"
        ))),
    }
}

fn sorted_keys(row: &Row) -> Vec<&str> {
    let mut keys: Vec<&str> = row.keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

fn quote_ident(name: &str) -> Result<String, StoreError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn push_where(sql: &mut Sql, filters: &[Filter]) -> Result<(), StoreError> {
    for (i, filter) in filters.iter().enumerate() {
        sql.push(if i == 0 { " WHERE " } else { " AND " });
        match filter {
            Filter::Eq { column, value } => {
                sql.push(format!("to_jsonb(t.{}) = ", quote_ident(column)?));
                sql.push_bind(Json(value.clone()));
            }
            Filter::In { column, values } => {
                if values.is_empty() {
                    sql.push("FALSE");
                    continue;
                }
                sql.push(format!(
                    "to_jsonb(t.{}) IN (SELECT jsonb_array_elements(",
                    quote_ident(column)?
                ));
                sql.push_bind(Json(Value::Array(values.clone())));
                sql.push("))");
            }
            Filter::Search { columns, term } => {
                if columns.is_empty() {
                    sql.push("TRUE");
                    continue;
                }
                sql.push("(");
                for (j, column) in columns.iter().enumerate() {
                    if j > 0 {
                        sql.push(" OR ");
                    }
                    sql.push(format!("CAST(t.{} AS TEXT) ILIKE ", quote_ident(column)?));
                    sql.push_bind(format!("%{}%", escape_like(term)));
                }
                sql.push(")");
            }
        }
    }
    Ok(())
}

fn select_sql(query: &Query) -> Result<Sql, StoreError> {
    let mut sql = Sql::new(format!(
        "SELECT to_jsonb(t) FROM {} AS t",
        quote_ident(&query.table.name)?
    ));
    push_where(&mut sql, &query.filters)?;

    let pk = &query.table.primary_key;
    let mut keys = Vec::with_capacity(query.order.len() + 1);
    for ordering in &query.order {
        let dir = match ordering.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        keys.push(format!("t.{} {dir}", quote_ident(&ordering.column)?));
    }
    if !query.order.iter().any(|o| &o.column == pk) {
        keys.push(format!("t.{} ASC", quote_ident(pk)?));
    }
    sql.push(" ORDER BY ");
    sql.push(keys.join(", "));

    if let Some(limit) = query.limit {
        sql.push(" LIMIT ");
        sql.push_bind(limit as i64);
    }
    if query.offset > 0 {
        sql.push(" OFFSET ");
        sql.push_bind(query.offset as i64);
    }
    Ok(sql)
}

fn count_sql(query: &Query) -> Result<Sql, StoreError> {
    let mut sql = Sql::new(format!(
        "SELECT COUNT(*) FROM {} AS t",
        quote_ident(&query.table.name)?
    ));
    push_where(&mut sql, &query.filters)?;
    Ok(sql)
}

fn insert_sql(table: &TableRef, mut row: Row) -> Result<Sql, StoreError> {
    if row.get(&table.primary_key).is_some_and(Value::is_null) {
        row.remove(&table.primary_key);
    }
    let name = quote_ident(&table.name)?;
    if row.is_empty() {
        return Ok(Sql::new(format!(
            "INSERT INTO {name} AS t DEFAULT VALUES RETURNING to_jsonb(t)"
        )));
    }
    let columns = sorted_keys(&row)
        .into_iter()
        .map(quote_ident)
        .collect::<Result<Vec<_>, _>>()?;
    let projected: Vec<String> = columns.iter().map(|c| format!("r.{c}")).collect();
    let mut sql = Sql::new(format!(
        "INSERT INTO {name} AS t ({}) SELECT {} FROM jsonb_populate_record(NULL::{name}, ",
        columns.join(", "),
        projected.join(", "),
    ));
    sql.push_bind(Json(Value::Object(row)));
    sql.push(") AS r RETURNING to_jsonb(t)");
    Ok(sql)
}

/// `None` when there is nothing to change.
fn update_sql(table: &TableRef, key: &Value, mut changes: Row) -> Result<Option<Sql>, StoreError> {
    changes.remove(&table.primary_key);
    if changes.is_empty() {
        return Ok(None);
    }
    let name = quote_ident(&table.name)?;
    let assignments = sorted_keys(&changes)
        .into_iter()
        .map(|c| quote_ident(c).map(|q| format!("{q} = r.{q}")))
        .collect::<Result<Vec<_>, _>>()?;
    let mut sql = Sql::new(format!(
        "UPDATE {name} AS t SET {} FROM jsonb_populate_record(NULL::{name}, ",
        assignments.join(", ")
    ));
    sql.push_bind(Json(Value::Object(changes)));
    sql.push(format!(") AS r WHERE to_jsonb(t.{}) = ", quote_ident(&table.primary_key)?));
    sql.push_bind(Json(key.clone()));
    sql.push(" RETURNING to_jsonb(t)");
    Ok(Some(sql))
}

fn delete_sql(table: &TableRef, key: &Value) -> Result<Sql, StoreError> {
    let mut sql = Sql::new(format!(
        "DELETE FROM {} AS t WHERE to_jsonb(t.{}) = ",
        quote_ident(&table.name)?,
        quote_ident(&table.primary_key)?
    ));
    sql.push_bind(Json(key.clone()));
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Ordering;
    use serde_json::json;

    fn users() -> TableRef {
        TableRef::new("auth_user", "id")
    }

    #[test]
    fn select_renders_search_order_and_page() {
        let fields = vec!["first_name".to_string(), "username".to_string()];
        let q = Query::table(users())
            .search(&fields, "al")
            .order_by(Ordering::desc("username"))
            .offset(10)
            .limit(5);
        let sql = select_sql(&q).unwrap();
        assert_eq!(
            sql.sql(),
            "SELECT to_jsonb(t) FROM \"auth_user\" AS t \
             WHERE (CAST(t.\"first_name\" AS TEXT) ILIKE $1 OR CAST(t.\"username\" AS TEXT) ILIKE $2) \
             ORDER BY t.\"username\" DESC, t.\"id\" ASC LIMIT $3 OFFSET $4"
        );
    }

    #[test]
    fn select_by_key_without_order() {
        let q = Query::table(users()).by_key(json!(3)).limit(1);
        let sql = select_sql(&q).unwrap();
        assert_eq!(
            sql.sql(),
            "SELECT to_jsonb(t) FROM \"auth_user\" AS t WHERE to_jsonb(t.\"id\") = $1 \
             ORDER BY t.\"id\" ASC LIMIT $2"
        );
    }

    #[test]
    fn count_ignores_ordering() {
        let q = Query::table(users())
            .filter_eq("is_active", json!(true))
            .order_by(Ordering::asc("username"))
            .limit(10);
        let sql = count_sql(&q.unpaginated()).unwrap();
        assert_eq!(
            sql.sql(),
            "SELECT COUNT(*) FROM \"auth_user\" AS t WHERE to_jsonb(t.\"is_active\") = $1"
        );
    }

    #[test]
    fn membership_filter_uses_json_array() {
        let q = Query::table(TableRef::new("auth_group", "id")).filter_in("id", vec![json!(1), json!(2)]);
        let sql = select_sql(&q).unwrap();
        assert!(sql
            .sql()
            .contains("to_jsonb(t.\"id\") IN (SELECT jsonb_array_elements($1))"));

        let none = Query::table(TableRef::new("auth_group", "id")).filter_in("id", vec![]);
        assert!(select_sql(&none).unwrap().sql().contains("WHERE FALSE"));
    }

    #[test]
    fn insert_projects_payload_columns() {
        let mut row = Row::new();
        row.insert("id".into(), Value::Null);
        row.insert("username".into(), json!("alice"));
        row.insert("email".into(), json!("a@example.com"));
        let sql = insert_sql(&users(), row).unwrap();
        assert_eq!(
            sql.sql(),
            "INSERT INTO \"auth_user\" AS t (\"email\", \"username\") SELECT r.\"email\", r.\"username\" \
             FROM jsonb_populate_record(NULL::\"auth_user\", $1) AS r RETURNING to_jsonb(t)"
        );
    }

    #[test]
    fn update_sets_only_changed_columns() {
        let mut changes = Row::new();
        changes.insert("email".into(), json!("x@y.com"));
        changes.insert("id".into(), json!(9));
        let sql = update_sql(&users(), &json!(4), changes).unwrap().unwrap();
        assert_eq!(
            sql.sql(),
            "UPDATE \"auth_user\" AS t SET \"email\" = r.\"email\" \
             FROM jsonb_populate_record(NULL::\"auth_user\", $1) AS r \
             WHERE to_jsonb(t.\"id\") = $2 RETURNING to_jsonb(t)"
        );
        assert!(update_sql(&users(), &json!(4), Row::new()).unwrap().is_none());
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(quote_ident("auth_user").is_ok());
        assert_eq!(
            quote_ident("name; DROP TABLE x").unwrap_err(),
            StoreError::InvalidIdentifier("name; DROP TABLE x".into())
        );
        let q = Query::table(users()).order_by(Ordering::asc("bad\"col"));
        assert!(select_sql(&q).is_err());
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
