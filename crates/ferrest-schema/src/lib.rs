//! # ferrest-schema
//!
//! Derives request and response shapes from entity descriptions.
//!
//! A [`SchemaRequest`] names an entity, an intent (read, read with
//! relationships, create, update) and a field selection. The
//! [`SchemaDeriver`] turns it into a [`ViewSchema`] that:
//!
//! - renders as JSON Schema (Draft 2020-12) for the OpenAPI document,
//! - validates incoming payloads, rejecting unknown fields,
//! - projects stored rows into response objects.
//!
//! Derived schemas are immutable and cached for the life of the process.

pub mod derive;
pub mod error;
pub mod validate;
pub mod view;

pub use derive::{derive, SchemaDeriver, SchemaRequest};
pub use error::SchemaError;
pub use validate::{ValidationViolations, Violation};
pub use view::{FieldKind, FieldSchema, Primitive, SchemaIntent, ViewSchema};
