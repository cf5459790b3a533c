//! # User Resource
//!
//! Accounts in `auth_user`. Passwords arrive in plaintext on create and
//! update and are hashed before they reach the store; no read schema ever
//! carries the `password` column.
//!
//! `POST /user` changes the caller's own password:
//!
//! ```text
//! {"old_password": "...", "new_password": "..."}  →  {}
//! ```

use async_trait::async_trait;
use ferrest_auth::accounts::{self, entities};
use ferrest_auth::passwords;
use ferrest_core::{Identity, Row};
use ferrest_policy::{AllowAll, Expr, IsAuthenticated};
use ferrest_schema::{SchemaDeriver, SchemaIntent, SchemaRequest};
use ferrest_store::{Isolation, Query, Transaction};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::extractors::{check_length, Validate};
use crate::resource::{CustomOperation, Resource, ResourceError, ResourceHooks};
use crate::state::AppState;

pub const PASSWORD_MIN: usize = 6;
pub const PASSWORD_MAX: usize = 128;

pub fn resource(deriver: &SchemaDeriver) -> Result<Resource, ResourceError> {
    Resource::builder("user", entities::USER)
        .protect_by(Expr::leaf::<IsAuthenticated>() & Expr::leaf::<AllowAll>())
        .search(["first_name", "username"])
        .ordering(["username", "first_name", "last_name"])
        .default_ordering("date_joined")
        .create_schema(
            SchemaRequest::new(entities::USER, "UserCreateReq", SchemaIntent::Create).include([
                "username",
                "password",
                "email",
                "first_name",
                "last_name",
            ]),
        )
        .update_schema(
            SchemaRequest::new(entities::USER, "UserUpdateReq", SchemaIntent::Update).exclude([
                "date_joined",
                "last_login",
                "id",
                "username",
            ]),
        )
        .hooks(PasswordHooks)
        .post(ChangePassword)
        .build(deriver)
}

// ── Hooks ───────────────────────────────────────────────────────────────────

struct PasswordHooks;

impl PasswordHooks {
    async fn hash_in_place(state: &AppState, row: &mut Row) -> Result<(), AppError> {
        let Some(plaintext) = row.get("password").and_then(Value::as_str) else {
            return Ok(());
        };
        check_length("password", plaintext, PASSWORD_MIN, PASSWORD_MAX)?;
        let hashed = state.hasher.hash_blocking(plaintext.to_string()).await?;
        row.insert("password".into(), Value::String(hashed));
        Ok(())
    }
}

#[async_trait]
impl ResourceHooks for PasswordHooks {
    async fn before_create(&self, state: &AppState, row: &mut Row) -> Result<(), AppError> {
        Self::hash_in_place(state, row).await
    }

    async fn before_update(&self, state: &AppState, _key: &Value, changes: &mut Row) -> Result<(), AppError> {
        Self::hash_in_place(state, changes).await
    }

    /// Remove the rows that reference the user: group links, then token
    /// revocations and outstanding tokens.
    async fn before_delete(&self, tx: &mut dyn Transaction, key: &Value) -> Result<(), AppError> {
        tx.delete_where(&Query::table(accounts::user_groups_table()).filter_eq("user_id", key.clone()))
            .await?;

        let outstanding = Query::table(accounts::outstanding_table()).filter_eq("user_id", key.clone());
        let token_ids: Vec<Value> = tx
            .fetch(&outstanding)
            .await?
            .iter()
            .filter_map(|t| t.get("id").cloned())
            .collect();
        if !token_ids.is_empty() {
            tx.delete_where(&Query::table(accounts::revoked_table()).filter_in("token_id", token_ids))
                .await?;
        }
        let removed = tx.delete_where(&outstanding).await?;
        tracing::debug!(user_id = %key, tokens = removed, "user references removed");
        Ok(())
    }
}

// ── Password change ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangePasswordRequest {
    old_password: String,
    new_password: String,
}

impl Validate for ChangePasswordRequest {
    fn validate(&self) -> Result<(), AppError> {
        check_length("new_password", &self.new_password, PASSWORD_MIN, PASSWORD_MAX)
    }
}

struct ChangePassword;

#[async_trait]
impl CustomOperation for ChangePassword {
    fn summary(&self) -> &str {
        "Change the caller's password"
    }

    fn request_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "old_password": { "type": "string" },
                "new_password": {
                    "type": "string",
                    "minLength": PASSWORD_MIN,
                    "maxLength": PASSWORD_MAX,
                },
            },
            "required": ["old_password", "new_password"],
            "additionalProperties": false,
        })
    }

    async fn execute(&self, state: &AppState, caller: Option<&Identity>, body: Value) -> Result<Value, AppError> {
        let Some(caller) = caller else {
            return Err(AppError::Forbidden(vec![ferrest_policy::failure_message("IsAuthenticated")]));
        };
        let request: ChangePasswordRequest =
            serde_json::from_value(body).map_err(|e| AppError::BadRequest(e.to_string()))?;
        request.validate()?;

        let mut tx = state.storage.begin(Isolation::ReadCommitted).await?;
        let account = accounts::find_account(tx.as_mut(), &caller.handle)
            .await?
            .ok_or_else(|| AppError::IdentityNotFound(caller.id.to_string()))?;
        if !passwords::verify_blocking(request.old_password, account.password_hash).await {
            tracing::warn!(user_id = %caller.id, "password change rejected: old password mismatch");
            return Err(AppError::InvalidCredentials);
        }

        let hashed = state.hasher.hash_blocking(request.new_password).await?;
        let mut changes = Row::new();
        changes.insert("password".into(), Value::String(hashed));
        tx.update(&accounts::user_table(), &json!(caller.id.get()), changes)
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %caller.id, "password changed");
        Ok(json!({}))
    }
}
