//! # Identity
//!
//! The principal a request acts on behalf of. Loaded once per request from
//! the persisted store and immutable afterwards.

use serde::{Deserialize, Serialize};

/// Stable numeric identifier of an identity (the `auth_user.id` column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

impl IdentityId {
    /// Access the inner integer.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for IdentityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A named role the identity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: i64,
    pub name: String,
}

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Unique login handle.
    pub handle: String,
    pub email: String,
    pub active: bool,
    pub staff: bool,
    pub superuser: bool,
    /// Group memberships in association order.
    pub groups: Vec<GroupRef>,
}

impl Identity {
    /// Whether the identity is a member of the named group.
    pub fn in_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.name == name)
    }

    /// The first group's name, reported as the login role.
    pub fn primary_role(&self) -> Option<&str> {
        self.groups.first().map(|g| g.name.as_str())
    }
}
