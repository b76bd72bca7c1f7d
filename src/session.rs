//! Federated session lifecycle and Single Logout.
//!
//! The session map is shared mutable state touched by every request.
//! Creation, activity touches, and termination are each atomic per session
//! key; a terminate racing a create for the same ID either removes the fresh
//! entry or finds nothing, never leaving a session observably both active
//! and terminated.

use crate::audit::{AuditEvent, AuditEventKind, AuditOutcome, AuditSink};
use crate::errors::{Result, SsoError};
use crate::providers::{saml, ProviderRegistry};
use crate::tokens::RefreshTokenStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One active federated login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoSession {
    /// Caller-supplied session ID
    pub id: String,
    pub user_id: String,
    pub provider_id: String,
    pub organization_id: String,
    pub login_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Subject the provider asserted, used as NameID in Single Logout
    pub federated_subject: String,
    /// Mapped attribute values snapshotted at login
    pub attribute_snapshot: HashMap<String, String>,
    /// Group memberships snapshotted at login
    pub group_snapshot: Vec<String>,
}

/// Outcome of a Single Logout request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleLogoutResult {
    /// Provider-bound logout redirect, present only for SAML providers with
    /// a configured SLO endpoint
    pub logout_url: Option<String>,
    pub success: bool,
}

/// Owns the active-session dictionary and drives termination and Single
/// Logout.
pub struct SessionManager {
    sessions: DashMap<String, SsoSession>,
    /// Session IDs per user, including slots reserved for logins still in
    /// flight. All cap decisions happen under this map's per-user entry.
    user_index: DashMap<String, Vec<String>>,
    registry: Arc<ProviderRegistry>,
    token_store: Arc<dyn RefreshTokenStore>,
    audit: Arc<dyn AuditSink>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        token_store: Arc<dyn RefreshTokenStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            user_index: DashMap::new(),
            registry,
            token_store,
            audit,
        }
    }

    /// Claim a session slot for a login in flight, enforcing the provider's
    /// concurrency cap. Count and claim happen under the user's index entry,
    /// so two racing logins can never both squeeze past the limit.
    pub(crate) fn reserve_slot(
        &self,
        user_id: &str,
        session_id: &str,
        max: Option<u32>,
    ) -> Result<()> {
        let mut ids = self.user_index.entry(user_id.to_string()).or_default();
        if let Some(max) = max {
            if ids.len() as u32 >= max {
                return Err(SsoError::SessionLimitExceeded {
                    user_id: user_id.to_string(),
                    max,
                });
            }
        }
        ids.push(session_id.to_string());
        Ok(())
    }

    /// Give back a reserved slot after a login failed between reservation
    /// and session creation.
    pub(crate) fn release_slot(&self, user_id: &str, session_id: &str) {
        if let Some(mut ids) = self.user_index.get_mut(user_id) {
            ids.retain(|id| id != session_id);
        }
    }

    /// Insert a session created by the orchestrator, filling its reserved
    /// slot (or claiming one, for callers that skipped reservation).
    pub(crate) fn insert(&self, session: SsoSession) {
        {
            let mut ids = self.user_index.entry(session.user_id.clone()).or_default();
            if !ids.iter().any(|id| id == &session.id) {
                ids.push(session.id.clone());
            }
        }
        self.sessions.insert(session.id.clone(), session);
    }

    /// Remove a session and its slot without any of `terminate`'s side
    /// effects.
    fn remove_session(&self, session_id: &str) -> Option<SsoSession> {
        let (_, session) = self.sessions.remove(session_id)?;
        self.release_slot(&session.user_id, session_id);
        Some(session)
    }

    /// Look up a session by ID.
    pub fn get(&self, session_id: &str) -> Option<SsoSession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Number of live sessions.
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Live sessions for one user.
    pub fn sessions_for_user(&self, user_id: &str) -> Vec<SsoSession> {
        self.sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.clone())
            .collect()
    }

    /// Record activity on a session. Returns false for unknown sessions.
    pub fn touch(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Terminate a session.
    ///
    /// Idempotent: an unknown session ID reports `true`, since "already
    /// logged out" is not a failure. Termination is deliberately broad: it
    /// delegates to [`Self::revoke_all_sessions_for_user`], dropping every
    /// session and refresh token the user holds.
    pub async fn terminate(&self, session_id: &str) -> Result<bool> {
        let Some(session) = self.remove_session(session_id) else {
            return Ok(true);
        };

        self.revoke_all_sessions_for_user(&session.user_id).await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventKind::SessionTerminated,
                    AuditOutcome::Success,
                    "session terminated",
                )
                .with_provider(session.provider_id.clone())
                .with_actor(session.user_id.clone())
                .with_session(session_id),
            )
            .await;
        tracing::info!(session = %session_id, user = %session.user_id, "session terminated");
        Ok(true)
    }

    /// Drop every session and refresh token held by a user.
    ///
    /// This is the whole blast radius of `terminate`: the source system
    /// revokes all of a user's refresh tokens on any session termination,
    /// and that behavior is preserved under a name that says so.
    pub async fn revoke_all_sessions_for_user(&self, user_id: &str) -> Result<u64> {
        let ids: Vec<String> = self
            .user_index
            .get(user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let mut dropped = 0u64;
        for id in ids {
            if self.remove_session(&id).is_some() {
                dropped += 1;
            }
        }
        // Clears any slots still reserved by logins in flight as well; a
        // revocation is meant to cut the user off wholesale.
        self.user_index.remove(user_id);

        let revoked = self.token_store.revoke_all(user_id).await?;
        tracing::debug!(
            user = %user_id,
            sessions_dropped = dropped,
            tokens_revoked = revoked,
            "revoked all sessions for user"
        );
        Ok(dropped)
    }

    /// Initiate Single Logout for a session.
    ///
    /// Clears local state unconditionally (idempotent for unknown sessions)
    /// and, when the session's provider is SAML with a configured logout
    /// endpoint, returns a provider-bound logout redirect carrying the
    /// caller's redirect URL as relay state. Non-SAML providers report
    /// success with no logout URL.
    pub async fn initiate_single_logout(
        &self,
        session_id: &str,
        redirect_url: Option<&str>,
    ) -> Result<SingleLogoutResult> {
        let Some(session) = self.get(session_id) else {
            return Ok(SingleLogoutResult {
                logout_url: None,
                success: true,
            });
        };

        let logout_url = match self.registry.get(&session.provider_id) {
            Some(config) if config.protocol.supports_single_logout() => config
                .saml_params()
                .map(|params| {
                    saml::build_logout_redirect(params, &session.federated_subject, redirect_url)
                })
                .transpose()?
                .flatten(),
            _ => None,
        };

        self.terminate(session_id).await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventKind::SingleLogoutInitiated,
                    AuditOutcome::Success,
                    "single logout initiated",
                )
                .with_provider(session.provider_id)
                .with_actor(session.user_id)
                .with_session(session_id)
                .with_metadata("provider_logout", logout_url.is_some().to_string()),
            )
            .await;

        Ok(SingleLogoutResult {
            logout_url,
            success: true,
        })
    }

    /// Remove sessions idle past their provider's timeout. Returns how many
    /// were removed. Sessions whose provider no longer resolves fall back to
    /// the longest configured timeout semantics of "never expire here"; the
    /// registry never hard-deletes providers, so that path is theoretical.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|session| {
                self.registry
                    .get(&session.provider_id)
                    .map(|config| {
                        let idle = now.signed_duration_since(session.last_activity);
                        idle.to_std()
                            .map(|idle| idle > config.session_timeout)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false)
            })
            .map(|session| session.id.clone())
            .collect();

        let mut removed = 0;
        for id in &expired {
            if self.remove_session(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "swept expired sessions");
        }
        removed
    }
}
