//! Token collaborator interfaces.
//!
//! Tokens are opaque to the federation core: the issuer signs and encodes
//! them however the platform requires, and the refresh-token store persists
//! them. The core only sequences issuance, storage, and bulk revocation.

use crate::directory::LocalUser;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access/refresh token pair issued for one login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
}

/// Issues opaque access and refresh tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_access_token(&self, user: &LocalUser) -> Result<String>;
    async fn issue_refresh_token(&self, user_id: &str) -> Result<String>;
}

/// Persists refresh tokens and supports per-user bulk revocation.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn store(&self, user_id: &str, token: &str) -> Result<()>;
    /// Revoke every refresh token held for the user. Returns how many were
    /// dropped; revoking for an unknown user is a no-op, not an error.
    async fn revoke_all(&self, user_id: &str) -> Result<u64>;
}

/// Issuer producing random opaque tokens. Fine for single-node deployments;
/// platforms with signed-token requirements supply their own issuer.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueTokenIssuer;

#[async_trait]
impl TokenIssuer for OpaqueTokenIssuer {
    async fn issue_access_token(&self, user: &LocalUser) -> Result<String> {
        Ok(format!("at-{}-{}", user.id, Uuid::new_v4().simple()))
    }

    async fn issue_refresh_token(&self, user_id: &str) -> Result<String> {
        Ok(format!("rt-{}-{}", user_id, Uuid::new_v4().simple()))
    }
}

/// In-memory refresh-token store.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: DashMap<String, Vec<String>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding token count for a user.
    pub fn count_for_user(&self, user_id: &str) -> usize {
        self.tokens.get(user_id).map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryTokenStore {
    async fn store(&self, user_id: &str, token: &str) -> Result<()> {
        self.tokens
            .entry(user_id.to_string())
            .or_default()
            .push(token.to_string());
        Ok(())
    }

    async fn revoke_all(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .tokens
            .remove(user_id)
            .map(|(_, tokens)| tokens.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn revoke_all_drops_every_token_for_the_user() {
        let store = InMemoryTokenStore::new();
        store.store("u1", "rt-1").await.unwrap();
        store.store("u1", "rt-2").await.unwrap();
        store.store("u2", "rt-3").await.unwrap();

        assert_eq!(store.revoke_all("u1").await.unwrap(), 2);
        assert_eq!(store.count_for_user("u1"), 0);
        assert_eq!(store.count_for_user("u2"), 1);

        // unknown user is a no-op
        assert_eq!(store.revoke_all("nobody").await.unwrap(), 0);
    }
}
