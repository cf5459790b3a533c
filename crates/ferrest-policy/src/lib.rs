//! # ferrest-policy
//!
//! Composable access policies. A resource binds one [`Expr`]; before any
//! operation runs, the dispatcher evaluates it against the caller's
//! identity, the operation kind, the resource's base query and the request
//! parameters. A denial carries every failure message the tree produced.

pub mod builtin;
pub mod expr;
pub mod permission;

pub use builtin::{AllowAll, InGroup, IsActive, IsAuthenticated, IsStaff, IsSuperuser, ReadOnly};
pub use expr::{and, not, or, Expr, Verdict};
pub use permission::{failure_message, Check, Permission, PermissionContext};
