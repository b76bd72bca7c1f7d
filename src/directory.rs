//! User directory collaborator interface.
//!
//! The federation core resolves local users through this trait; the real
//! implementation sits on the platform's relational store. The in-memory
//! implementation here backs tests and single-node deployments.

use crate::errors::{Result, SsoError};
use crate::mapping::Role;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A local platform user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: String,
    /// Owning tenant
    pub organization_id: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub role: Role,
    /// Provider-asserted subject recorded for future correlation
    pub federated_subject: Option<String>,
    /// Provider that auto-provisioned this account, if any
    pub provisioned_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Fields for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub organization_id: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    pub role: Role,
    pub federated_subject: Option<String>,
    pub provisioned_by: Option<String>,
}

/// Mutable fields refreshed on login.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub role: Option<Role>,
    pub federated_subject: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
}

/// User directory contract.
///
/// `create` racing a concurrent `find_by_email` for the same address must
/// reject the duplicate, never silently overwrite.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>>;
    async fn create(&self, fields: NewUser) -> Result<LocalUser>;
    async fn update(&self, user_id: &str, update: UserUpdate) -> Result<()>;
}

/// In-memory directory keyed by user ID with a unique email index.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: DashMap<String, LocalUser>,
    email_index: DashMap<String, String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user directly, for tests and bootstrap.
    pub fn insert(&self, user: LocalUser) {
        self.email_index
            .insert(user.email.to_ascii_lowercase(), user.id.clone());
        self.users.insert(user.id.clone(), user);
    }

    /// Look up by ID.
    pub fn get(&self, user_id: &str) -> Option<LocalUser> {
        self.users.get(user_id).map(|u| u.clone())
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>> {
        let id = match self.email_index.get(&email.to_ascii_lowercase()) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn create(&self, fields: NewUser) -> Result<LocalUser> {
        let user = LocalUser {
            id: Uuid::new_v4().to_string(),
            organization_id: fields.organization_id,
            email: fields.email.clone(),
            given_name: fields.given_name,
            family_name: fields.family_name,
            role: fields.role,
            federated_subject: fields.federated_subject,
            provisioned_by: fields.provisioned_by,
            created_at: Utc::now(),
            last_login: None,
        };

        // The entry guard makes the uniqueness check and the index insert a
        // single atomic step, so a racing create for the same email loses.
        let key = fields.email.to_ascii_lowercase();
        match self.email_index.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SsoError::directory(format!(
                "email '{}' already exists",
                fields.email
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.id.clone());
                self.users.insert(user.id.clone(), user.clone());
                Ok(user)
            }
        }
    }

    async fn update(&self, user_id: &str, update: UserUpdate) -> Result<()> {
        let mut user = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| SsoError::directory(format!("user '{user_id}' not found")))?;

        if let Some(given_name) = update.given_name {
            user.given_name = given_name;
        }
        if let Some(family_name) = update.family_name {
            user.family_name = family_name;
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(subject) = update.federated_subject {
            user.federated_subject = Some(subject);
        }
        if let Some(last_login) = update.last_login {
            user.last_login = Some(last_login);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            organization_id: "org-a".into(),
            email: email.into(),
            given_name: "Ada".into(),
            family_name: "Lovelace".into(),
            role: Role::Member,
            federated_subject: Some("subj-1".into()),
            provisioned_by: Some("p1".into()),
        }
    }

    #[tokio::test]
    async fn create_then_find_round_trip() {
        let dir = InMemoryDirectory::new();
        let created = dir.create(new_user("ada@example.com")).await.unwrap();
        let found = dir.find_by_email("ADA@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.role, Role::Member);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let dir = InMemoryDirectory::new();
        dir.create(new_user("ada@example.com")).await.unwrap();
        let err = dir.create(new_user("ada@example.com")).await.unwrap_err();
        assert_eq!(err.kind(), "directory_error");
    }

    #[tokio::test]
    async fn update_refreshes_mutable_fields_only() {
        let dir = InMemoryDirectory::new();
        let created = dir.create(new_user("ada@example.com")).await.unwrap();

        dir.update(
            &created.id,
            UserUpdate {
                given_name: Some("Augusta".into()),
                role: Some(Role::Admin),
                last_login: Some(Utc::now()),
                ..UserUpdate::default()
            },
        )
        .await
        .unwrap();

        let updated = dir.get(&created.id).unwrap();
        assert_eq!(updated.given_name, "Augusta");
        assert_eq!(updated.role, Role::Admin);
        assert!(updated.last_login.is_some());
        assert_eq!(updated.email, "ada@example.com");
    }
}
