//! # Storage Traits
//!
//! Every read and write goes through a [`Transaction`]. Dropping a
//! transaction without calling [`Transaction::commit`] rolls it back, so a
//! failure anywhere between fetch and commit leaves no partial state.

use async_trait::async_trait;
use ferrest_core::Row;
use serde_json::Value;

use crate::error::StoreError;
use crate::query::{Query, TableRef};

/// Isolation requested when opening a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    #[default]
    ReadCommitted,
    /// Every statement sees the same snapshot. Used when a count and a page
    /// must agree.
    Snapshot,
}

/// A unit of work against the store.
#[async_trait]
pub trait Transaction: Send {
    /// Rows matching `query`, ordered and paginated, ties broken by primary key.
    async fn fetch(&mut self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Number of rows matching the query's filters. Ordering and pagination
    /// are ignored.
    async fn count(&mut self, query: &Query) -> Result<u64, StoreError>;

    /// Insert a row and return it as stored (with its primary key assigned).
    async fn insert(&mut self, table: &TableRef, row: Row) -> Result<Row, StoreError>;

    /// Overwrite the given columns of one row and return the full row.
    async fn update(&mut self, table: &TableRef, key: &Value, changes: Row) -> Result<Row, StoreError>;

    /// Remove one row by primary key.
    async fn delete(&mut self, table: &TableRef, key: &Value) -> Result<(), StoreError>;

    /// Remove every row matching the query's filters. Returns the number removed.
    async fn delete_where(&mut self, query: &Query) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// First row matching `query`.
    async fn fetch_one(&mut self, query: &Query) -> Result<Option<Row>, StoreError> {
        let single = query.clone().limit(1);
        Ok(self.fetch(&single).await?.into_iter().next())
    }
}

/// A transactional record store.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn begin(&self, isolation: Isolation) -> Result<Box<dyn Transaction>, StoreError>;

    /// Short backend name for logs and readiness output.
    fn backend(&self) -> &'static str;

    /// Check the backend can serve requests.
    async fn ping(&self) -> Result<(), StoreError>;

    /// One-shot read outside an explicit transaction.
    async fn fetch(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let mut tx = self.begin(Isolation::ReadCommitted).await?;
        tx.fetch(query).await
    }

    /// One-shot single-row read outside an explicit transaction.
    async fn fetch_one(&self, query: &Query) -> Result<Option<Row>, StoreError> {
        let mut tx = self.begin(Isolation::ReadCommitted).await?;
        tx.fetch_one(query).await
    }
}
