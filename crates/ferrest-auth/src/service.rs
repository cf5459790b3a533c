//! # Token Service
//!
//! The session lifecycle:
//!
//! ```text
//! login ──▶ access + refresh (Outstanding Token committed first)
//!              │
//!              ├── refresh ──▶ new access      (refresh reusable until expiry)
//!              │
//!              └── logout ───▶ Revocation Record (idempotent)
//!                                 │
//!                                 └── refresh ──▶ TokenRevoked
//! ```
//!
//! Refresh tokens are not rotated. Expiry is checked when a token is
//! presented; nothing sweeps expired records.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ferrest_core::{timestamp, Identity, IdentityId, Row};
use ferrest_store::{Isolation, Query, Storage, StoreError};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::accounts::{self, Account};
use crate::error::{AuthError, TokenError};
use crate::jwt::{Claims, JwtCodec, TokenKind};
use crate::passwords;

/// Tokens handed out by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginTokens {
    pub access: String,
    pub refresh: String,
    /// Name of the identity's first group.
    pub role: Option<String>,
}

/// A freshly minted refresh token and its bookkeeping fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedRefresh {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    Revoked,
    /// The token was revoked by an earlier logout.
    AlreadyRevoked,
}

/// Issues, redeems and revokes tokens against the account tables.
pub struct TokenService {
    codec: JwtCodec,
    storage: Arc<dyn Storage>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("codec", &self.codec)
            .field("storage", &self.storage.backend())
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl TokenService {
    pub fn new(codec: JwtCodec, storage: Arc<dyn Storage>) -> Self {
        Self {
            codec,
            storage,
            access_ttl: Duration::minutes(5),
            refresh_ttl: Duration::days(1),
        }
    }

    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    pub fn codec(&self) -> &JwtCodec {
        &self.codec
    }

    // ── Issuance ────────────────────────────────────────────────────────

    pub fn issue_access(&self, identity: IdentityId) -> Result<String, AuthError> {
        let claims = Claims {
            identity_id: identity,
            expires_at: (Utc::now() + self.access_ttl).timestamp(),
            kind: TokenKind::Access,
            jti: None,
        };
        self.codec.encode(&claims)
    }

    /// Mint a refresh token. The caller must persist its Outstanding Token
    /// record before handing the token out.
    pub fn issue_refresh(&self, identity: IdentityId) -> Result<IssuedRefresh, AuthError> {
        let jti = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.refresh_ttl;
        let claims = Claims {
            identity_id: identity,
            expires_at: expires_at.timestamp(),
            kind: TokenKind::Refresh,
            jti: Some(jti.clone()),
        };
        Ok(IssuedRefresh {
            token: self.codec.encode(&claims)?,
            jti,
            expires_at,
        })
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        self.codec.decode(token)
    }

    fn decode_refresh(&self, token: &str) -> Result<(Claims, String), AuthError> {
        let claims = self.codec.decode(token)?;
        if claims.kind != TokenKind::Refresh {
            return Err(TokenError::WrongKind {
                expected: TokenKind::Refresh,
                found: claims.kind,
            }
            .into());
        }
        let jti = claims.jti.clone().ok_or(TokenError::MissingJti)?;
        Ok((claims, jti))
    }

    // ── Login ───────────────────────────────────────────────────────────

    /// Check a handle and password. Unknown handles and wrong passwords are
    /// the same error.
    pub async fn authenticate(&self, handle: &str, password: &str) -> Result<Account, AuthError> {
        let mut tx = self.storage.begin(Isolation::ReadCommitted).await?;
        let account = accounts::find_account(tx.as_mut(), handle).await?;
        drop(tx);

        let Some(account) = account else {
            tracing::warn!(handle = %handle, "login failed: unknown handle");
            return Err(AuthError::InvalidCredentials);
        };
        if !passwords::verify_blocking(password.to_string(), account.password_hash.clone()).await {
            tracing::warn!(user_id = %account.identity.id, "login failed: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(account)
    }

    /// Authenticate, then issue an access and a refresh token. The
    /// Outstanding Token row and the `last_login` stamp commit together
    /// before anything is returned.
    pub async fn login(&self, handle: &str, password: &str) -> Result<LoginTokens, AuthError> {
        let account = self.authenticate(handle, password).await?;
        let id = account.identity.id;

        let access = self.issue_access(id)?;
        let refresh = self.issue_refresh(id)?;
        let now = Utc::now();

        let mut outstanding = Row::new();
        outstanding.insert("token".into(), json!(refresh.token));
        outstanding.insert("jti".into(), json!(refresh.jti));
        outstanding.insert("created_at".into(), timestamp(now));
        outstanding.insert("expires_at".into(), timestamp(refresh.expires_at));
        outstanding.insert("user_id".into(), json!(id.get()));

        let mut stamp = Row::new();
        stamp.insert("last_login".into(), timestamp(now));

        let mut tx = self.storage.begin(Isolation::ReadCommitted).await?;
        tx.insert(&accounts::outstanding_table(), outstanding).await?;
        tx.update(&accounts::user_table(), &json!(id.get()), stamp).await?;
        tx.commit().await?;

        tracing::info!(user_id = %id, jti = %refresh.jti, "login succeeded");
        Ok(LoginTokens {
            access,
            refresh: refresh.token,
            role: account.identity.primary_role().map(str::to_string),
        })
    }

    /// Form login for interactive API explorers: access token only.
    pub async fn sw_login(&self, handle: &str, password: &str) -> Result<String, AuthError> {
        let account = self.authenticate(handle, password).await?;
        self.issue_access(account.identity.id)
    }

    // ── Redemption ──────────────────────────────────────────────────────

    /// Redeem a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let (claims, jti) = self.decode_refresh(refresh_token)?;

        let mut tx = self.storage.begin(Isolation::Snapshot).await?;
        let Some(record) = find_outstanding(tx.as_mut(), &jti).await? else {
            tracing::warn!(jti = %jti, "refresh rejected: token not recognized");
            return Err(AuthError::TokenNotRecognized);
        };
        if is_revoked(tx.as_mut(), &record).await? {
            tracing::warn!(jti = %jti, "refresh rejected: token revoked");
            return Err(AuthError::TokenRevoked);
        }
        drop(tx);

        let owner = record
            .get("user_id")
            .and_then(Value::as_i64)
            .map(IdentityId)
            .unwrap_or(claims.identity_id);
        self.issue_access(owner)
    }

    /// Revoke a refresh token. Revoking twice is not an error.
    pub async fn logout(&self, refresh_token: &str) -> Result<LogoutOutcome, AuthError> {
        let (_, jti) = self.decode_refresh(refresh_token)?;

        let mut tx = self.storage.begin(Isolation::ReadCommitted).await?;
        let Some(record) = find_outstanding(tx.as_mut(), &jti).await? else {
            return Err(AuthError::TokenNotFound);
        };
        if is_revoked(tx.as_mut(), &record).await? {
            return Ok(LogoutOutcome::AlreadyRevoked);
        }

        let mut revocation = Row::new();
        revocation.insert("token_id".into(), record.get("id").cloned().unwrap_or(Value::Null));
        revocation.insert("blacklisted_at".into(), accounts::now());

        let written = match tx.insert(&accounts::revoked_table(), revocation).await {
            Ok(_) => tx.commit().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => {
                tracing::info!(jti = %jti, "refresh token revoked");
                Ok(LogoutOutcome::Revoked)
            }
            // A concurrent logout won the unique constraint.
            Err(StoreError::Conflict(_)) => Ok(LogoutOutcome::AlreadyRevoked),
            Err(e) => Err(e.into()),
        }
    }

    // ── Identity resolution ─────────────────────────────────────────────

    /// Resolve the caller from an optional bearer token. Only access tokens
    /// identify a caller.
    pub async fn resolve_identity(&self, bearer: Option<&str>) -> Result<Option<Identity>, AuthError> {
        let Some(token) = bearer else {
            return Ok(None);
        };
        let claims = self.codec.decode(token)?;
        if claims.kind != TokenKind::Access {
            return Err(TokenError::WrongKind {
                expected: TokenKind::Access,
                found: claims.kind,
            }
            .into());
        }

        let mut tx = self.storage.begin(Isolation::ReadCommitted).await?;
        match accounts::load_identity(tx.as_mut(), claims.identity_id).await? {
            Some(identity) => Ok(Some(identity)),
            None => Err(AuthError::IdentityNotFound(claims.identity_id)),
        }
    }
}

async fn find_outstanding(tx: &mut dyn ferrest_store::Transaction, jti: &str) -> Result<Option<Row>, StoreError> {
    tx.fetch_one(&Query::table(accounts::outstanding_table()).filter_eq("jti", json!(jti)))
        .await
}

async fn is_revoked(tx: &mut dyn ferrest_store::Transaction, record: &Row) -> Result<bool, StoreError> {
    let Some(token_id) = record.get("id").cloned() else {
        return Ok(false);
    };
    let revocation = tx
        .fetch_one(&Query::table(accounts::revoked_table()).filter_eq("token_id", token_id))
        .await?;
    Ok(revocation.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{create_account, join_group, memory_storage, NewAccount};
    use crate::jwt::Algorithm;
    use crate::passwords::PasswordHasher;
    use ferrest_store::MemoryStorage;

    struct Harness {
        store: MemoryStorage,
        service: TokenService,
        alice: IdentityId,
    }

    async fn harness() -> Harness {
        let store = memory_storage();
        let hasher = PasswordHasher::new(1000);
        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        let row = create_account(
            tx.as_mut(),
            NewAccount {
                username: "alice".into(),
                password_hash: hasher.hash("wonderland"),
                email: "alice@example.com".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let alice = IdentityId(row["id"].as_i64().unwrap());
        join_group(tx.as_mut(), alice, "editors").await.unwrap();
        create_account(
            tx.as_mut(),
            NewAccount {
                username: "bob".into(),
                password_hash: hasher.hash("builder1"),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let codec = JwtCodec::new(Algorithm::HS256, b"service-test-secret".to_vec());
        let service = TokenService::new(codec, Arc::new(store.clone()));
        Harness { store, service, alice }
    }

    #[tokio::test]
    async fn login_persists_outstanding_token() {
        let h = harness().await;
        let tokens = h.service.login("alice", "wonderland").await.unwrap();
        assert_eq!(tokens.role.as_deref(), Some("editors"));

        let access = h.service.decode(&tokens.access).unwrap();
        assert_eq!(access.identity_id, h.alice);
        assert_eq!(access.kind, TokenKind::Access);

        let refresh = h.service.decode(&tokens.refresh).unwrap();
        assert_eq!(refresh.kind, TokenKind::Refresh);
        let jti = refresh.jti.unwrap();
        let record = h
            .store
            .fetch_one(&Query::table(accounts::outstanding_table()).filter_eq("jti", json!(jti)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["user_id"], json!(h.alice.get()));
        assert_eq!(record["token"], json!(tokens.refresh));

        let user = h
            .store
            .fetch_one(&Query::table(accounts::user_table()).by_key(json!(h.alice.get())))
            .await
            .unwrap()
            .unwrap();
        assert!(user["last_login"].is_string());
    }

    #[tokio::test]
    async fn login_without_groups_has_no_role() {
        let h = harness().await;
        let tokens = h.service.login("bob", "builder1").await.unwrap();
        assert_eq!(tokens.role, None);
    }

    #[tokio::test]
    async fn bad_credentials_are_indistinguishable() {
        let h = harness().await;
        assert!(matches!(
            h.service.login("alice", "wrong").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            h.service.login("mallory", "wonderland").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert_eq!(h.store.row_count(accounts::tables::OUTSTANDING_TOKEN), 0);
    }

    #[tokio::test]
    async fn alice_login_refresh_logout_refresh() {
        let h = harness().await;
        let tokens = h.service.login("alice", "wonderland").await.unwrap();

        let access = h.service.refresh(&tokens.refresh).await.unwrap();
        assert_eq!(h.service.decode(&access).unwrap().identity_id, h.alice);
        // Refresh tokens are reusable until revoked.
        assert!(h.service.refresh(&tokens.refresh).await.is_ok());

        assert_eq!(h.service.logout(&tokens.refresh).await.unwrap(), LogoutOutcome::Revoked);
        assert!(matches!(
            h.service.refresh(&tokens.refresh).await,
            Err(AuthError::TokenRevoked)
        ));
        assert_eq!(
            h.service.logout(&tokens.refresh).await.unwrap(),
            LogoutOutcome::AlreadyRevoked
        );
        assert_eq!(h.store.row_count(accounts::tables::REVOKED_TOKEN), 1);
    }

    #[tokio::test]
    async fn unknown_refresh_tokens() {
        let h = harness().await;
        // Correctly signed, never persisted.
        let stray = h.service.issue_refresh(h.alice).unwrap();
        assert!(matches!(
            h.service.refresh(&stray.token).await,
            Err(AuthError::TokenNotRecognized)
        ));
        assert!(matches!(
            h.service.logout(&stray.token).await,
            Err(AuthError::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn access_tokens_cannot_refresh_or_logout() {
        let h = harness().await;
        let tokens = h.service.login("alice", "wonderland").await.unwrap();
        for result in [
            h.service.refresh(&tokens.access).await.map(|_| ()),
            h.service.logout(&tokens.access).await.map(|_| ()),
        ] {
            assert!(matches!(
                result,
                Err(AuthError::InvalidToken(TokenError::WrongKind { .. }))
            ));
        }
    }

    #[tokio::test]
    async fn resolve_identity_states() {
        let h = harness().await;
        assert!(h.service.resolve_identity(None).await.unwrap().is_none());

        let tokens = h.service.login("alice", "wonderland").await.unwrap();
        let identity = h
            .service
            .resolve_identity(Some(&tokens.access))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.handle, "alice");
        assert!(identity.in_group("editors"));

        assert!(matches!(
            h.service.resolve_identity(Some(&tokens.refresh)).await,
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            h.service.resolve_identity(Some("garbage")).await,
            Err(AuthError::InvalidToken(_))
        ));

        let ghost = h.service.issue_access(IdentityId(999)).unwrap();
        assert!(matches!(
            h.service.resolve_identity(Some(&ghost)).await,
            Err(AuthError::IdentityNotFound(IdentityId(999)))
        ));
    }

    #[tokio::test]
    async fn expired_refresh_is_invalid() {
        let h = harness().await;
        let service = TokenService::new(h.service.codec().clone(), Arc::new(h.store.clone()))
            .with_refresh_ttl(Duration::seconds(-1));
        let tokens = service.login("alice", "wonderland").await.unwrap();
        assert!(matches!(
            service.refresh(&tokens.refresh).await,
            Err(AuthError::InvalidToken(TokenError::Expired))
        ));
    }

    #[tokio::test]
    async fn sw_login_issues_access_only() {
        let h = harness().await;
        let access = h.service.sw_login("alice", "wonderland").await.unwrap();
        assert_eq!(h.service.decode(&access).unwrap().kind, TokenKind::Access);
        assert_eq!(h.store.row_count(accounts::tables::OUTSTANDING_TOKEN), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_logouts_revoke_exactly_once() {
        let h = harness().await;
        let tokens = h.service.login("alice", "wonderland").await.unwrap();
        let service = Arc::new(h.service);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let service = Arc::clone(&service);
            let refresh = tokens.refresh.clone();
            tasks.spawn(async move { service.logout(&refresh).await });
        }
        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.unwrap().unwrap());
        }

        let revoked = outcomes.iter().filter(|o| **o == LogoutOutcome::Revoked).count();
        assert_eq!(revoked, 1, "{outcomes:?}");
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, LogoutOutcome::Revoked | LogoutOutcome::AlreadyRevoked)));
        assert_eq!(h.store.row_count(accounts::tables::REVOKED_TOKEN), 1);
        assert!(matches!(
            service.refresh(&tokens.refresh).await,
            Err(AuthError::TokenRevoked)
        ));
    }
}
