//! The federation orchestrator: the top-level authentication flow.
//!
//! `authenticate` validates the provider, maps the asserted identity,
//! provisions or refreshes the local user, issues tokens, creates the
//! session, and finishes through a single unconditional finalizer that
//! updates metrics and emits the audit event on every return path, success
//! or failure. Audit and metric emission are required side effects, not
//! cleanup.

use crate::audit::{AuditEvent, AuditEventKind, AuditOutcome, AuditSink};
use crate::directory::{LocalUser, NewUser, UserDirectory, UserUpdate};
use crate::errors::{Result, SsoError};
use crate::mapping::{resolve_role, Role};
use crate::metrics::SsoMetrics;
use crate::profile::FederatedProfile;
use crate::providers::{
    ProviderConfig, ProviderRegistry, RoleSyncPolicy, TARGET_EMAIL, TARGET_FAMILY_NAME,
    TARGET_GIVEN_NAME,
};
use crate::session::{SessionManager, SsoSession};
use crate::tokens::{RefreshTokenStore, TokenIssuer, TokenPair};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default bound on collaborator calls (directory, token issuer, token
/// store) made during one authentication.
const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// What a successful authentication hands back to the HTTP layer.
#[derive(Debug, Clone)]
pub struct AuthenticationOutcome {
    pub user: LocalUser,
    pub tokens: TokenPair,
    pub session: SsoSession,
    /// Whether this login auto-provisioned the account
    pub provisioned: bool,
}

/// Top-level federation flow. One instance per process, shared by all
/// requests.
pub struct FederationOrchestrator {
    registry: Arc<ProviderRegistry>,
    directory: Arc<dyn UserDirectory>,
    token_issuer: Arc<dyn TokenIssuer>,
    token_store: Arc<dyn RefreshTokenStore>,
    sessions: Arc<SessionManager>,
    metrics: Arc<SsoMetrics>,
    audit: Arc<dyn AuditSink>,
    collaborator_timeout: Duration,
}

impl FederationOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        directory: Arc<dyn UserDirectory>,
        token_issuer: Arc<dyn TokenIssuer>,
        token_store: Arc<dyn RefreshTokenStore>,
        sessions: Arc<SessionManager>,
        metrics: Arc<SsoMetrics>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            directory,
            token_issuer,
            token_store,
            sessions,
            metrics,
            audit,
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
        }
    }

    /// Bound every collaborator call made during authentication.
    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    /// Authenticate a federated profile against a provider, creating a
    /// session under the caller-supplied session ID.
    ///
    /// Every outcome, success or any failure including early exits,
    /// updates the login metrics and emits exactly one audit event carrying
    /// the provider ID, the user ID when known, and the elapsed time.
    pub async fn authenticate(
        &self,
        provider_id: &str,
        profile: &FederatedProfile,
        session_id: &str,
    ) -> Result<AuthenticationOutcome> {
        let started = Instant::now();
        let mut observed_user: Option<String> = None;

        let result = self
            .authenticate_inner(provider_id, profile, session_id, &mut observed_user)
            .await;

        // Unconditional finalizer: metrics and audit fire on every path.
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        self.metrics
            .record_login(provider_id, result.is_ok(), elapsed.as_secs_f64() * 1000.0);

        let event = match &result {
            Ok(outcome) => {
                let mut event = AuditEvent::new(
                    AuditEventKind::LoginSuccess,
                    AuditOutcome::Success,
                    format!("federated login via provider '{provider_id}'"),
                )
                .with_provider(provider_id)
                .with_actor(outcome.user.id.clone())
                .with_session(session_id)
                .with_metadata("role", outcome.user.role.to_string())
                .with_metadata("provisioned", outcome.provisioned.to_string())
                .with_elapsed_ms(elapsed_ms);
                // Providers flagged for compliance review get the mapped
                // attribute and group snapshots on the login record.
                let verbose = self
                    .registry
                    .get(provider_id)
                    .map(|config| config.compliance_audit)
                    .unwrap_or(false);
                if verbose {
                    event = event
                        .with_metadata("groups", outcome.session.group_snapshot.join(","))
                        .with_metadata(
                            "attributes",
                            serde_json::to_string(&outcome.session.attribute_snapshot)
                                .unwrap_or_default(),
                        );
                }
                event
            }
            Err(err) => {
                let mut event = AuditEvent::new(
                    AuditEventKind::LoginFailure,
                    AuditOutcome::Failure,
                    format!("federated login failed: {}", err.kind()),
                )
                .with_provider(provider_id)
                .with_session(session_id)
                .with_metadata("error_kind", err.kind())
                .with_elapsed_ms(elapsed_ms);
                if let Some(user_id) = &observed_user {
                    event = event.with_actor(user_id.clone());
                }
                event
            }
        };
        self.audit.record(event).await;

        result
    }

    async fn authenticate_inner(
        &self,
        provider_id: &str,
        profile: &FederatedProfile,
        session_id: &str,
        observed_user: &mut Option<String>,
    ) -> Result<AuthenticationOutcome> {
        // Step 1: the provider must exist and be active.
        let provider = self.registry.get_active(provider_id)?;

        // Step 2: map the asserted profile to local user fields.
        let email = self.mapped_field(&provider, profile, TARGET_EMAIL, profile.email.as_deref());
        if email.is_empty() {
            return Err(SsoError::invalid_field(
                "email",
                "provider assertion carried no email",
            ));
        }
        let given_name = self.mapped_field(
            &provider,
            profile,
            TARGET_GIVEN_NAME,
            profile.given_name.as_deref(),
        );
        let family_name = self.mapped_field(
            &provider,
            profile,
            TARGET_FAMILY_NAME,
            profile.family_name.as_deref(),
        );
        let resolved_role = resolve_role(profile, &provider.role_mappings);

        // Step 3: resolve or provision the local account.
        let existing = self
            .bounded("user_lookup", self.directory.find_by_email(&email))
            .await?;

        let (user, provisioned) = match existing {
            Some(user) => {
                *observed_user = Some(user.id.clone());

                // Step 4: tenant isolation, before any mutation.
                if user.organization_id != provider.organization_id {
                    return Err(SsoError::OrganizationMismatch {
                        provider_org: provider.organization_id.clone(),
                        user_org: user.organization_id.clone(),
                    });
                }

                let user = self.refresh_user(&provider, user, &given_name, &family_name, resolved_role, profile).await?;
                (user, false)
            }
            None if provider.auto_provision => {
                let user = self
                    .bounded(
                        "user_create",
                        self.directory.create(NewUser {
                            organization_id: provider.organization_id.clone(),
                            email: email.clone(),
                            given_name: given_name.clone(),
                            family_name: family_name.clone(),
                            role: resolved_role,
                            federated_subject: Some(profile.subject.clone()),
                            provisioned_by: Some(provider.id.clone()),
                        }),
                    )
                    .await?;
                *observed_user = Some(user.id.clone());

                self.audit
                    .record(
                        AuditEvent::new(
                            AuditEventKind::UserProvisioned,
                            AuditOutcome::Success,
                            "user auto-provisioned on first federated login",
                        )
                        .with_provider(provider.id.clone())
                        .with_actor(user.id.clone())
                        .with_metadata("role", resolved_role.to_string()),
                    )
                    .await;
                tracing::info!(user = %user.id, provider = %provider.id, "auto-provisioned user");
                (user, true)
            }
            None => return Err(SsoError::UserNotProvisioned { email }),
        };

        // Step 5: reserve the user's session slot under the provider's
        // concurrency cap. This happens before any token exists, so a login
        // the cap rejects never leaves a live credential behind.
        self.sessions
            .reserve_slot(&user.id, session_id, provider.max_concurrent_sessions)?;

        // Step 6: issue and persist tokens. A failure here gives the
        // reserved slot back.
        let tokens = match self.issue_tokens(&user).await {
            Ok(tokens) => tokens,
            Err(err) => {
                self.sessions.release_slot(&user.id, session_id);
                return Err(err);
            }
        };

        // Step 7: materialize the session into its reserved slot, last, so a
        // failed step never leaves a partially-created session behind.
        let mut attribute_snapshot = HashMap::new();
        attribute_snapshot.insert(TARGET_EMAIL.to_string(), email);
        attribute_snapshot.insert(TARGET_GIVEN_NAME.to_string(), given_name);
        attribute_snapshot.insert(TARGET_FAMILY_NAME.to_string(), family_name);

        let now = Utc::now();
        let session = SsoSession {
            id: session_id.to_string(),
            user_id: user.id.clone(),
            provider_id: provider.id.clone(),
            organization_id: provider.organization_id.clone(),
            login_at: now,
            last_activity: now,
            federated_subject: profile.subject.clone(),
            attribute_snapshot,
            group_snapshot: profile.groups.clone(),
        };
        self.sessions.insert(session.clone());

        Ok(AuthenticationOutcome {
            user,
            tokens,
            session,
            provisioned,
        })
    }

    async fn issue_tokens(&self, user: &LocalUser) -> Result<TokenPair> {
        let access_token = self
            .bounded("access_token", self.token_issuer.issue_access_token(user))
            .await?;
        let refresh_token = self
            .bounded(
                "refresh_token",
                self.token_issuer.issue_refresh_token(&user.id),
            )
            .await?;
        self.bounded(
            "refresh_token_store",
            self.token_store.store(&user.id, &refresh_token),
        )
        .await?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            issued_at: Utc::now(),
        })
    }

    /// Refresh mutable profile fields on an existing account and apply the
    /// provider's role-sync policy. Role changes are audited so either
    /// policy is observable.
    async fn refresh_user(
        &self,
        provider: &ProviderConfig,
        user: LocalUser,
        given_name: &str,
        family_name: &str,
        resolved_role: Role,
        profile: &FederatedProfile,
    ) -> Result<LocalUser> {
        let mut update = UserUpdate {
            last_login: Some(Utc::now()),
            federated_subject: Some(profile.subject.clone()),
            ..UserUpdate::default()
        };
        if provider.jit_update_profile {
            if !given_name.is_empty() {
                update.given_name = Some(given_name.to_string());
            }
            if !family_name.is_empty() {
                update.family_name = Some(family_name.to_string());
            }
        }

        let role_changed = provider.role_sync_policy == RoleSyncPolicy::OnEveryLogin
            && user.role != resolved_role;
        if role_changed {
            update.role = Some(resolved_role);
        }

        self.bounded("user_update", self.directory.update(&user.id, update.clone()))
            .await?;

        if role_changed {
            self.audit
                .record(
                    AuditEvent::new(
                        AuditEventKind::RoleAssigned,
                        AuditOutcome::Success,
                        "role re-mapped from provider assertion",
                    )
                    .with_provider(provider.id.clone())
                    .with_actor(user.id.clone())
                    .with_metadata("previous_role", user.role.to_string())
                    .with_metadata("new_role", resolved_role.to_string()),
                )
                .await;
        }

        let mut user = user;
        if let Some(given_name) = update.given_name {
            user.given_name = given_name;
        }
        if let Some(family_name) = update.family_name {
            user.family_name = family_name;
        }
        if role_changed {
            user.role = resolved_role;
        }
        user.last_login = update.last_login;
        Ok(user)
    }

    fn mapped_field(
        &self,
        provider: &ProviderConfig,
        profile: &FederatedProfile,
        target: &str,
        fallback: Option<&str>,
    ) -> String {
        match provider.mapped_attribute(target) {
            Some(source) => profile.attribute(source, fallback),
            None => fallback.unwrap_or("").to_string(),
        }
    }

    /// Run a collaborator call under the configured bound. On timeout the
    /// step is treated as failed; the caller decides whether to retry, the
    /// core never does.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.collaborator_timeout, fut)
            .await
            .map_err(|_| SsoError::UpstreamTimeout {
                operation,
                timeout: self.collaborator_timeout,
            })?
    }

    /// Read-only metrics snapshot, the `GetMetrics` surface.
    pub fn metrics_snapshot(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.snapshot()
    }
}
