//! # Account Directory
//!
//! Entity descriptions for the identity and token tables, plus the reads
//! the token service needs: an account by handle, an identity by id, and
//! group memberships through the association table.
//!
//! Table names are Django's (`auth_user`, `auth_group`, `auth_user_groups`,
//! `token_blacklist_*`), so an existing Django database can be served.

use std::collections::HashMap;

use ferrest_core::{
    timestamp, Catalog, CatalogError, Column, ColumnType, EntityDescription, GroupRef, Identity, IdentityId, Join,
    Relationship, Row,
};
use ferrest_store::{MemoryStorage, Query, StoreError, TableRef, Transaction};
use serde_json::{json, Value};

/// Entity names in the catalog.
pub mod entities {
    pub const USER: &str = "User";
    pub const GROUP: &str = "Group";
    pub const OUTSTANDING_TOKEN: &str = "OutstandingToken";
    pub const REVOKED_TOKEN: &str = "RevokedToken";
}

/// Backing table names.
pub mod tables {
    pub const USER: &str = "auth_user";
    pub const GROUP: &str = "auth_group";
    pub const USER_GROUPS: &str = "auth_user_groups";
    pub const OUTSTANDING_TOKEN: &str = "token_blacklist_outstandingtoken";
    pub const REVOKED_TOKEN: &str = "token_blacklist_blacklistedtoken";
}

// ── Entity descriptions ─────────────────────────────────────────────────────

pub fn user_entity() -> EntityDescription {
    EntityDescription::new(entities::USER, tables::USER)
        .column(Column::new("id", ColumnType::Integer))
        .column(Column::new("password", ColumnType::string(128)).write_only())
        .column(Column::new("last_login", ColumnType::DateTime).nullable())
        .column(Column::new("is_superuser", ColumnType::Boolean).default_value(json!(false)))
        .column(Column::new("username", ColumnType::string(150)))
        .column(Column::new("first_name", ColumnType::string(150)).default_value(json!("")))
        .column(Column::new("last_name", ColumnType::string(150)).default_value(json!("")))
        .column(Column::new("email", ColumnType::string(254)).default_value(json!("")))
        .column(Column::new("is_staff", ColumnType::Boolean).default_value(json!(false)))
        .column(Column::new("is_active", ColumnType::Boolean).default_value(json!(true)))
        .column(Column::new("date_joined", ColumnType::DateTime).default_now())
        .relationship(Relationship::new(
            "groups",
            entities::GROUP,
            Join::Association {
                table: tables::USER_GROUPS.into(),
                local: "user_id".into(),
                remote: "group_id".into(),
            },
        ))
        .relationship(Relationship::new(
            "tokens",
            entities::OUTSTANDING_TOKEN,
            Join::Reverse {
                column: "user_id".into(),
            },
        ))
}

pub fn group_entity() -> EntityDescription {
    EntityDescription::new(entities::GROUP, tables::GROUP)
        .column(Column::new("id", ColumnType::Integer))
        .column(Column::new("name", ColumnType::string(150)))
        .relationship(Relationship::new(
            "users",
            entities::USER,
            Join::Association {
                table: tables::USER_GROUPS.into(),
                local: "group_id".into(),
                remote: "user_id".into(),
            },
        ))
}

pub fn outstanding_token_entity() -> EntityDescription {
    EntityDescription::new(entities::OUTSTANDING_TOKEN, tables::OUTSTANDING_TOKEN)
        .column(Column::new("id", ColumnType::Integer))
        .column(Column::new("token", ColumnType::Text).write_only())
        .column(Column::new("jti", ColumnType::string(255)))
        .column(Column::new("created_at", ColumnType::DateTime).nullable().default_now())
        .column(Column::new("expires_at", ColumnType::DateTime))
        .column(Column::new("user_id", ColumnType::Integer))
        .relationship(Relationship::new(
            "user",
            entities::USER,
            Join::ForeignKey {
                column: "user_id".into(),
            },
        ))
}

pub fn revoked_token_entity() -> EntityDescription {
    EntityDescription::new(entities::REVOKED_TOKEN, tables::REVOKED_TOKEN)
        .column(Column::new("id", ColumnType::Integer))
        .column(Column::new("token_id", ColumnType::Integer))
        .column(Column::new("blacklisted_at", ColumnType::DateTime).nullable().default_now())
        .relationship(Relationship::new(
            "token",
            entities::OUTSTANDING_TOKEN,
            Join::ForeignKey {
                column: "token_id".into(),
            },
        ))
}

/// Register the four account entities.
pub fn register(catalog: &mut Catalog) -> Result<(), CatalogError> {
    catalog.register(user_entity())?;
    catalog.register(group_entity())?;
    catalog.register(outstanding_token_entity())?;
    catalog.register(revoked_token_entity())?;
    Ok(())
}

/// An in-memory store enforcing the account tables' unique constraints.
pub fn memory_storage() -> MemoryStorage {
    MemoryStorage::new()
        .with_unique(tables::USER, "username")
        .with_unique(tables::GROUP, "name")
        .with_unique(tables::OUTSTANDING_TOKEN, "jti")
        .with_unique(tables::REVOKED_TOKEN, "token_id")
}

pub fn user_table() -> TableRef {
    TableRef::new(tables::USER, "id")
}

pub fn group_table() -> TableRef {
    TableRef::new(tables::GROUP, "id")
}

pub fn user_groups_table() -> TableRef {
    TableRef::new(tables::USER_GROUPS, "id")
}

pub fn outstanding_table() -> TableRef {
    TableRef::new(tables::OUTSTANDING_TOKEN, "id")
}

pub fn revoked_table() -> TableRef {
    TableRef::new(tables::REVOKED_TOKEN, "id")
}

// ── Reads ───────────────────────────────────────────────────────────────────

/// An identity together with its stored password hash.
#[derive(Clone)]
pub struct Account {
    pub identity: Identity,
    pub password_hash: String,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("identity", &self.identity)
            .field("password_hash", &"[REDACTED]")
            .finish()
    }
}

/// Build an identity from an `auth_user` row.
pub fn identity_from_row(row: &Row, groups: Vec<GroupRef>) -> Option<Identity> {
    let flag = |name: &str, default: bool| row.get(name).and_then(Value::as_bool).unwrap_or(default);
    Some(Identity {
        id: IdentityId(row.get("id")?.as_i64()?),
        handle: row.get("username")?.as_str()?.to_string(),
        email: row.get("email").and_then(Value::as_str).unwrap_or_default().to_string(),
        active: flag("is_active", true),
        staff: flag("is_staff", false),
        superuser: flag("is_superuser", false),
        groups,
    })
}

/// Groups of one user, in association order.
pub async fn groups_of(tx: &mut dyn Transaction, user_id: IdentityId) -> Result<Vec<GroupRef>, StoreError> {
    let links = tx
        .fetch(&Query::table(user_groups_table()).filter_eq("user_id", json!(user_id.get())))
        .await?;
    let group_ids: Vec<Value> = links.iter().filter_map(|l| l.get("group_id").cloned()).collect();
    if group_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = tx
        .fetch(&Query::table(group_table()).filter_in("id", group_ids.clone()))
        .await?;
    let by_id: HashMap<i64, String> = rows
        .iter()
        .filter_map(|r| {
            let id = r.get("id")?.as_i64()?;
            let name = r.get("name")?.as_str()?.to_string();
            Some((id, name))
        })
        .collect();

    Ok(group_ids
        .iter()
        .filter_map(Value::as_i64)
        .filter_map(|id| by_id.get(&id).map(|name| GroupRef { id, name: name.clone() }))
        .collect())
}

async fn hydrate(tx: &mut dyn Transaction, row: Option<Row>) -> Result<Option<Account>, StoreError> {
    let Some(row) = row else {
        return Ok(None);
    };
    let Some(id) = row.get("id").and_then(Value::as_i64) else {
        return Err(StoreError::InvalidRecord(format!("{} row without integer id", tables::USER)));
    };
    let groups = groups_of(tx, IdentityId(id)).await?;
    let password_hash = row
        .get("password")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let identity = identity_from_row(&row, groups)
        .ok_or_else(|| StoreError::InvalidRecord(format!("{} row {id} is missing username", tables::USER)))?;
    Ok(Some(Account {
        identity,
        password_hash,
    }))
}

/// Look up an account by login handle.
pub async fn find_account(tx: &mut dyn Transaction, handle: &str) -> Result<Option<Account>, StoreError> {
    let row = tx
        .fetch_one(&Query::table(user_table()).filter_eq("username", json!(handle)))
        .await?;
    hydrate(tx, row).await
}

/// Load an identity with its groups.
pub async fn load_identity(tx: &mut dyn Transaction, id: IdentityId) -> Result<Option<Identity>, StoreError> {
    let row = tx.fetch_one(&Query::table(user_table()).by_key(json!(id.get()))).await?;
    Ok(hydrate(tx, row).await?.map(|a| a.identity))
}

// ── Writes ──────────────────────────────────────────────────────────────────

/// Fields for a new `auth_user` row. Unset columns take their defaults.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub staff: bool,
    pub superuser: bool,
}

/// Insert a user row and return it as stored.
pub async fn create_account(tx: &mut dyn Transaction, account: NewAccount) -> Result<Row, StoreError> {
    let mut row = Row::new();
    row.insert("username".into(), json!(account.username));
    row.insert("password".into(), json!(account.password_hash));
    row.insert("email".into(), json!(account.email));
    row.insert("is_staff".into(), json!(account.staff));
    row.insert("is_superuser".into(), json!(account.superuser));
    user_entity().apply_defaults(&mut row);
    tx.insert(&user_table(), row).await
}

/// Add a user to a group, creating the group if needed.
pub async fn join_group(tx: &mut dyn Transaction, user_id: IdentityId, group: &str) -> Result<GroupRef, StoreError> {
    let existing = tx
        .fetch_one(&Query::table(group_table()).filter_eq("name", json!(group)))
        .await?;
    let row = match existing {
        Some(row) => row,
        None => {
            let mut row = Row::new();
            row.insert("name".into(), json!(group));
            tx.insert(&group_table(), row).await?
        }
    };
    let group_id = row
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| StoreError::InvalidRecord(format!("{} row without integer id", tables::GROUP)))?;

    let mut link = Row::new();
    link.insert("user_id".into(), json!(user_id.get()));
    link.insert("group_id".into(), json!(group_id));
    tx.insert(&user_groups_table(), link).await?;

    Ok(GroupRef {
        id: group_id,
        name: group.to_string(),
    })
}

/// Current time as stored in date-time columns.
pub fn now() -> Value {
    timestamp(chrono::Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrest_store::{Isolation, Storage};

    #[test]
    fn account_entities_register_and_resolve() {
        let mut catalog = Catalog::new();
        register(&mut catalog).unwrap();
        assert_eq!(catalog.len(), 4);
        catalog.validate().unwrap();
        assert!(catalog.get(entities::USER).unwrap().find_column("password").unwrap().write_only);
    }

    #[tokio::test]
    async fn identity_carries_groups_in_link_order() {
        let store = memory_storage();
        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        let row = create_account(
            tx.as_mut(),
            NewAccount {
                username: "dana".into(),
                password_hash: "x".into(),
                email: "dana@example.com".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let id = IdentityId(row["id"].as_i64().unwrap());
        join_group(tx.as_mut(), id, "reviewers").await.unwrap();
        join_group(tx.as_mut(), id, "authors").await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        let identity = load_identity(tx.as_mut(), id).await.unwrap().unwrap();
        assert_eq!(identity.handle, "dana");
        assert!(identity.active);
        assert!(!identity.staff);
        assert_eq!(identity.primary_role(), Some("reviewers"));
        assert_eq!(identity.groups.len(), 2);

        let account = find_account(tx.as_mut(), "dana").await.unwrap().unwrap();
        assert_eq!(account.password_hash, "x");
        assert!(!format!("{account:?}").contains("\"x\""));
        assert!(find_account(tx.as_mut(), "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let store = memory_storage();
        let mut tx = store.begin(Isolation::ReadCommitted).await.unwrap();
        let dup = || NewAccount {
            username: "erin".into(),
            password_hash: "x".into(),
            ..Default::default()
        };
        create_account(tx.as_mut(), dup()).await.unwrap();
        let err = create_account(tx.as_mut(), dup()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
