//! Built-in predicates over the caller's identity and the operation kind.

use async_trait::async_trait;

use crate::permission::{Check, Permission, PermissionContext};

/// Always allows.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Permission for AllowAll {
    fn name(&self) -> &str {
        "AllowAll"
    }

    async fn check(&self, _ctx: &PermissionContext<'_>) -> Check {
        Check::Allow
    }
}

/// Allows any resolved identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct IsAuthenticated;

#[async_trait]
impl Permission for IsAuthenticated {
    fn name(&self) -> &str {
        "IsAuthenticated"
    }

    async fn check(&self, ctx: &PermissionContext<'_>) -> Check {
        Check::from_bool(ctx.identity.is_some())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IsActive;

#[async_trait]
impl Permission for IsActive {
    fn name(&self) -> &str {
        "IsActive"
    }

    async fn check(&self, ctx: &PermissionContext<'_>) -> Check {
        Check::from_bool(ctx.identity.is_some_and(|i| i.active))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IsStaff;

#[async_trait]
impl Permission for IsStaff {
    fn name(&self) -> &str {
        "IsStaff"
    }

    async fn check(&self, ctx: &PermissionContext<'_>) -> Check {
        Check::from_bool(ctx.identity.is_some_and(|i| i.staff))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IsSuperuser;

#[async_trait]
impl Permission for IsSuperuser {
    fn name(&self) -> &str {
        "IsSuperuser"
    }

    async fn check(&self, ctx: &PermissionContext<'_>) -> Check {
        Check::from_bool(ctx.identity.is_some_and(|i| i.superuser))
    }
}

/// Allows members of one named group.
#[derive(Debug, Clone)]
pub struct InGroup {
    group: String,
    name: String,
}

impl InGroup {
    pub fn new(group: impl Into<String>) -> Self {
        let group = group.into();
        let name = format!("InGroup({group})");
        Self { group, name }
    }
}

#[async_trait]
impl Permission for InGroup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &PermissionContext<'_>) -> Check {
        Check::from_bool(ctx.identity.is_some_and(|i| i.in_group(&self.group)))
    }
}

/// Allows only list and get.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadOnly;

#[async_trait]
impl Permission for ReadOnly {
    fn name(&self) -> &str {
        "ReadOnly"
    }

    async fn check(&self, ctx: &PermissionContext<'_>) -> Check {
        Check::from_bool(ctx.operation.is_safe())
    }
}
