//! # Permission Predicates
//!
//! A [`Permission`] inspects the request context and decides whether an
//! operation may proceed. Implementations are plain structs; composition
//! lives in [`crate::expr`].

use async_trait::async_trait;
use ferrest_core::{Identity, OperationKind};
use ferrest_store::{Query, Storage};
use serde_json::Value;

/// Everything a predicate may look at.
#[derive(Clone, Copy)]
pub struct PermissionContext<'a> {
    /// `None` for anonymous callers.
    pub identity: Option<&'a Identity>,
    pub operation: OperationKind,
    /// The resource's base query.
    pub target: &'a Query,
    /// Request parameters other than the identity: path key, list
    /// parameters, request body.
    pub params: &'a Value,
    pub storage: &'a dyn Storage,
}

impl std::fmt::Debug for PermissionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionContext")
            .field("identity", &self.identity.map(|i| i.id))
            .field("operation", &self.operation)
            .field("target", &self.target)
            .field("params", &self.params)
            .field("storage", &self.storage.backend())
            .finish()
    }
}

/// Outcome of a single predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Allow,
    /// Denied. An empty message list falls back to the predicate's default
    /// message.
    Deny(Vec<String>),
}

impl Check {
    pub fn from_bool(allowed: bool) -> Self {
        if allowed {
            Self::Allow
        } else {
            Self::Deny(Vec::new())
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Default failure message for a named predicate.
pub fn failure_message(name: &str) -> String {
    format!("The permission '{name}' has failed.")
}

/// An asynchronous allow/deny predicate.
#[async_trait]
pub trait Permission: Send + Sync {
    /// Name used in failure messages and the expression text.
    fn name(&self) -> &str;

    async fn check(&self, ctx: &PermissionContext<'_>) -> Check;
}
