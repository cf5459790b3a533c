//! # ferrest-store — Storage Boundary
//!
//! The dispatcher and token service never speak SQL. They build a [`Query`]
//! and run it inside a [`Transaction`] obtained from a [`Storage`]:
//!
//! ```text
//! Storage::begin(isolation) ──▶ Transaction
//!                                 ├── fetch / fetch_one / count
//!                                 ├── insert / update / delete / delete_where
//!                                 └── commit   (drop = rollback)
//! ```
//!
//! Two backends ship with the crate:
//!
//! - [`MemoryStorage`]: process-local tables, for tests and development.
//! - [`PgStorage`]: PostgreSQL through `sqlx`.
//!
//! Records are JSON objects ([`ferrest_core::Row`]) keyed by column name.

pub mod backend;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;

pub use backend::{Isolation, Storage, Transaction};
pub use error::StoreError;
pub use memory::MemoryStorage;
pub use postgres::PgStorage;
pub use query::{Direction, Filter, Ordering, Query, TableRef};
