//! # ferrest-core — Foundational Types
//!
//! Shared vocabulary for every other crate in the workspace. Nothing in here
//! performs I/O; the types are plain data that the storage, schema, policy,
//! auth and API layers agree on.
//!
//! ## Key Types
//!
//! - [`Identity`]: the authenticated principal for a request. Anonymous
//!   callers are represented as `Option::<Identity>::None`, never as a
//!   sentinel identity.
//! - [`OperationKind`]: the six dispatchable operations on a resource.
//! - [`EntityDescription`]: a structural, ahead-of-time description of a
//!   persisted entity (columns and relationships). Schema derivation and
//!   query construction are driven entirely from this data.
//! - [`Catalog`]: name-indexed registry of entity descriptions so that
//!   relationships can be resolved by target name.
//!
//! ## Crate Policy
//!
//! - Leaf of the dependency DAG: no `ferrest-*` dependencies.
//! - No `unsafe`, no `.unwrap()` outside tests.

pub mod entity;
pub mod error;
pub mod identity;
pub mod operation;

pub use entity::{
    timestamp, Catalog, Column, ColumnDefault, ColumnType, EntityDescription, Join, Relationship,
    Row,
};
pub use error::CatalogError;
pub use identity::{GroupRef, Identity, IdentityId};
pub use operation::OperationKind;
