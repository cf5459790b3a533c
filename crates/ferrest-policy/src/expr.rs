//! # Permission Expressions
//!
//! An [`Expr`] is an immutable tree of predicates joined by AND, OR and NOT.
//! Trees are built once at startup and shared by every request; all state
//! produced while evaluating (failure messages) lives in the evaluation, not
//! in the tree.
//!
//! ```ignore
//! let policy = Expr::leaf::<IsAuthenticated>() & (Expr::leaf::<IsStaff>() | !Expr::leaf::<ReadOnly>());
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::permission::{failure_message, Check, Permission, PermissionContext};

type Factory = Arc<dyn Fn() -> Box<dyn Permission> + Send + Sync>;

/// A composed permission policy.
#[derive(Clone)]
pub enum Expr {
    /// A zero-argument predicate, instantiated afresh per evaluation.
    Leaf { name: String, factory: Factory },
    /// A configured predicate instance shared across evaluations.
    Shared(Arc<dyn Permission>),
    /// Allows iff every child allows. Every child is evaluated.
    And(Vec<Expr>),
    /// Allows iff any child allows.
    Or(Vec<Expr>),
    /// Allows iff the child denies.
    Not(Box<Expr>),
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    /// De-duplicated failure messages. Always empty when allowed.
    pub messages: BTreeSet<String>,
}

type EvalFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

impl Expr {
    pub fn leaf<P>() -> Self
    where
        P: Permission + Default + 'static,
    {
        let name = P::default().name().to_string();
        Self::Leaf {
            name,
            factory: Arc::new(|| Box::new(P::default()) as Box<dyn Permission>),
        }
    }

    pub fn shared<P>(permission: P) -> Self
    where
        P: Permission + 'static,
    {
        Self::Shared(Arc::new(permission))
    }

    /// Evaluate against one request context.
    pub async fn evaluate(&self, ctx: &PermissionContext<'_>) -> Verdict {
        let mut messages = BTreeSet::new();
        let allowed = self.eval(ctx, &mut messages).await;
        if allowed {
            messages.clear();
        }
        tracing::trace!(policy = %self, operation = %ctx.operation, allowed, "permission expression evaluated");
        Verdict { allowed, messages }
    }

    // A node that allows leaves `messages` untouched.
    fn eval<'a>(&'a self, ctx: &'a PermissionContext<'a>, messages: &'a mut BTreeSet<String>) -> EvalFuture<'a> {
        Box::pin(async move {
            match self {
                Self::Leaf { name, factory } => {
                    let permission = factory();
                    record(name, permission.check(ctx).await, messages)
                }
                Self::Shared(permission) => record(permission.name(), permission.check(ctx).await, messages),
                Self::And(children) => {
                    let mut allowed = true;
                    for child in children {
                        if !child.eval(ctx, messages).await {
                            allowed = false;
                        }
                    }
                    allowed
                }
                Self::Or(children) => {
                    let mut failed = BTreeSet::new();
                    let mut allowed = false;
                    for child in children {
                        if child.eval(ctx, &mut failed).await {
                            allowed = true;
                        }
                    }
                    if !allowed {
                        messages.append(&mut failed);
                    }
                    allowed
                }
                Self::Not(child) => {
                    let mut discarded = BTreeSet::new();
                    if child.eval(ctx, &mut discarded).await {
                        messages.insert(failure_message(&format!("~({child})")));
                        false
                    } else {
                        true
                    }
                }
            }
        })
    }
}

fn record(name: &str, check: Check, messages: &mut BTreeSet<String>) -> bool {
    match check {
        Check::Allow => true,
        Check::Deny(reasons) if reasons.is_empty() => {
            messages.insert(failure_message(name));
            false
        }
        Check::Deny(reasons) => {
            messages.extend(reasons);
            false
        }
    }
}

// ── Builders ────────────────────────────────────────────────────────────────

pub fn and(children: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::And(children.into_iter().collect())
}

pub fn or(children: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Or(children.into_iter().collect())
}

pub fn not(child: Expr) -> Expr {
    Expr::Not(Box::new(child))
}

impl std::ops::BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        Expr::And(vec![self, rhs])
    }
}

impl std::ops::BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        Expr::Or(vec![self, rhs])
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

// ── Rendering ───────────────────────────────────────────────────────────────

fn join(f: &mut fmt::Formatter<'_>, children: &[Expr], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf { name, .. } => f.write_str(name),
            Self::Shared(permission) => f.write_str(permission.name()),
            Self::And(children) => join(f, children, "&"),
            Self::Or(children) => join(f, children, "|"),
            Self::Not(child) => write!(f, "~({child})"),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{AllowAll, InGroup, IsAuthenticated, IsStaff, ReadOnly};
    use async_trait::async_trait;
    use ferrest_core::{GroupRef, Identity, IdentityId, OperationKind};
    use ferrest_store::{MemoryStorage, Query, TableRef};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        storage: MemoryStorage,
        target: Query,
        params: Value,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                storage: MemoryStorage::new(),
                target: Query::table(TableRef::new("auth_user", "id")),
                params: json!({}),
            }
        }

        fn ctx<'a>(&'a self, identity: Option<&'a Identity>, operation: OperationKind) -> PermissionContext<'a> {
            PermissionContext {
                identity,
                operation,
                target: &self.target,
                params: &self.params,
                storage: &self.storage,
            }
        }
    }

    fn bob() -> Identity {
        Identity {
            id: IdentityId(3),
            handle: "bob".into(),
            email: String::new(),
            active: true,
            staff: false,
            superuser: false,
            groups: vec![GroupRef {
                id: 1,
                name: "editors".into(),
            }],
        }
    }

    #[derive(Default)]
    struct Never;

    #[async_trait]
    impl Permission for Never {
        fn name(&self) -> &str {
            "Never"
        }

        async fn check(&self, _ctx: &PermissionContext<'_>) -> Check {
            Check::Deny(vec![])
        }
    }

    #[derive(Default)]
    struct Grumpy;

    #[async_trait]
    impl Permission for Grumpy {
        fn name(&self) -> &str {
            "Grumpy"
        }

        async fn check(&self, _ctx: &PermissionContext<'_>) -> Check {
            Check::Deny(vec!["not today".into()])
        }
    }

    static INSTANCES: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    impl Default for Counted {
        fn default() -> Self {
            INSTANCES.fetch_add(1, Ordering::SeqCst);
            Counted
        }
    }

    #[async_trait]
    impl Permission for Counted {
        fn name(&self) -> &str {
            "Counted"
        }

        async fn check(&self, _ctx: &PermissionContext<'_>) -> Check {
            Check::Allow
        }
    }

    #[tokio::test]
    async fn and_collects_every_failure() {
        let fx = Fixture::new();
        let expr = Expr::leaf::<Never>() & Expr::leaf::<Grumpy>();
        let verdict = expr.evaluate(&fx.ctx(None, OperationKind::Read)).await;
        assert!(!verdict.allowed);
        assert_eq!(
            verdict.messages.into_iter().collect::<Vec<_>>(),
            vec!["The permission 'Never' has failed.".to_string(), "not today".to_string()]
        );
    }

    #[tokio::test]
    async fn and_deduplicates_messages() {
        let fx = Fixture::new();
        let expr = and([Expr::leaf::<Never>(), Expr::leaf::<Never>(), Expr::leaf::<AllowAll>()]);
        let verdict = expr.evaluate(&fx.ctx(None, OperationKind::Read)).await;
        assert_eq!(verdict.messages.len(), 1);
    }

    #[tokio::test]
    async fn or_discards_messages_when_any_child_allows() {
        let fx = Fixture::new();
        let expr = Expr::leaf::<Never>() | Expr::leaf::<AllowAll>();
        let verdict = expr.evaluate(&fx.ctx(None, OperationKind::Read)).await;
        assert!(verdict.allowed);
        assert!(verdict.messages.is_empty());

        // An allowing OR nested under a failing AND contributes nothing.
        let nested = (Expr::leaf::<Never>() | Expr::leaf::<AllowAll>()) & Expr::leaf::<Grumpy>();
        let verdict = nested.evaluate(&fx.ctx(None, OperationKind::Read)).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.messages.into_iter().collect::<Vec<_>>(), vec!["not today".to_string()]);
    }

    #[tokio::test]
    async fn or_reports_all_children_when_everything_denies() {
        let fx = Fixture::new();
        let expr = or([Expr::leaf::<Never>(), Expr::leaf::<Grumpy>()]);
        let verdict = expr.evaluate(&fx.ctx(None, OperationKind::Read)).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.messages.len(), 2);
    }

    #[tokio::test]
    async fn not_inverts_and_names_the_child() {
        let fx = Fixture::new();
        let user = bob();

        let expr = !Expr::leaf::<IsAuthenticated>();
        let verdict = expr.evaluate(&fx.ctx(Some(&user), OperationKind::Read)).await;
        assert!(!verdict.allowed);
        assert!(verdict
            .messages
            .contains("The permission '~(IsAuthenticated)' has failed."));

        let verdict = expr.evaluate(&fx.ctx(None, OperationKind::Read)).await;
        assert!(verdict.allowed);
        assert!(verdict.messages.is_empty());
    }

    #[tokio::test]
    async fn leaves_are_instantiated_per_evaluation() {
        let fx = Fixture::new();
        let expr = Expr::leaf::<Counted>();
        let before = INSTANCES.load(Ordering::SeqCst);
        for _ in 0..3 {
            assert!(expr.evaluate(&fx.ctx(None, OperationKind::Get)).await.allowed);
        }
        assert_eq!(INSTANCES.load(Ordering::SeqCst) - before, 3);
    }

    #[tokio::test]
    async fn shared_instances_carry_configuration() {
        let fx = Fixture::new();
        let user = bob();
        let editors = Expr::shared(InGroup::new("editors"));
        let admins = Expr::shared(InGroup::new("admins"));
        assert!(editors.evaluate(&fx.ctx(Some(&user), OperationKind::Update)).await.allowed);
        let verdict = admins.evaluate(&fx.ctx(Some(&user), OperationKind::Update)).await;
        assert!(!verdict.allowed);
        assert!(verdict.messages.contains("The permission 'InGroup(admins)' has failed."));
    }

    #[test]
    fn expression_text() {
        let expr = Expr::leaf::<IsAuthenticated>() & (Expr::leaf::<IsStaff>() | !Expr::leaf::<ReadOnly>());
        assert_eq!(expr.to_string(), "(IsAuthenticated & (IsStaff | ~(ReadOnly)))");
        assert_eq!(
            and([Expr::leaf::<AllowAll>(), Expr::leaf::<IsStaff>(), Expr::leaf::<ReadOnly>()]).to_string(),
            "(AllowAll & IsStaff & ReadOnly)"
        );
        assert_eq!(not(Expr::leaf::<AllowAll>()).to_string(), "~(AllowAll)");
    }
}
