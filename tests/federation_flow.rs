//! End-to-end tests of the federation flow: registration through
//! authentication, session lifecycle, and the adaptive MFA decision.

use chrono::{TimeZone, Utc};
use sso_federation::{
    AdaptiveMfaEngine, AuditEventKind, AuditSink, FederatedProfile, FederationOrchestrator,
    InMemoryDirectory, InMemoryTokenStore, LocalUser, MemoryAuditSink, MfaEnrollments, OidcParams,
    OpaqueTokenIssuer, ProtocolParams, ProviderConfig, ProviderProtocol, ProviderRegistry,
    ProviderStatus, RiskContext, RiskEngine, RiskLevel, Role, RoleMappingRule, RoleSyncPolicy,
    SamlParams, SessionManager, SsoError, SsoMetrics,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    orchestrator: Arc<FederationOrchestrator>,
    registry: Arc<ProviderRegistry>,
    sessions: Arc<SessionManager>,
    directory: Arc<InMemoryDirectory>,
    token_store: Arc<InMemoryTokenStore>,
    metrics: Arc<SsoMetrics>,
    audit: Arc<MemoryAuditSink>,
}

fn harness() -> Harness {
    let metrics = Arc::new(SsoMetrics::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let audit_dyn: Arc<dyn AuditSink> = audit.clone();
    let registry = Arc::new(ProviderRegistry::new(metrics.clone(), audit_dyn.clone()));
    let token_store = Arc::new(InMemoryTokenStore::new());
    let sessions = Arc::new(SessionManager::new(
        registry.clone(),
        token_store.clone(),
        audit_dyn.clone(),
    ));
    let directory = Arc::new(InMemoryDirectory::new());
    let orchestrator = Arc::new(FederationOrchestrator::new(
        registry.clone(),
        directory.clone(),
        Arc::new(OpaqueTokenIssuer),
        token_store.clone(),
        sessions.clone(),
        metrics.clone(),
        audit_dyn,
    ));
    Harness {
        orchestrator,
        registry,
        sessions,
        directory,
        token_store,
        metrics,
        audit,
    }
}

fn default_mappings() -> HashMap<String, String> {
    HashMap::from([
        ("email".to_string(), "email".to_string()),
        ("given_name".to_string(), "given_name".to_string()),
        ("family_name".to_string(), "family_name".to_string()),
    ])
}

fn oidc_provider(id: &str, org: &str) -> ProviderConfig {
    ProviderConfig {
        id: id.to_string(),
        organization_id: org.to_string(),
        name: "Corporate OIDC".to_string(),
        protocol: ProviderProtocol::Oidc,
        status: ProviderStatus::Active,
        auto_provision: true,
        jit_update_profile: true,
        role_sync_policy: RoleSyncPolicy::OnEveryLogin,
        params: ProtocolParams::Oidc(OidcParams {
            issuer_url: "https://login.example.com".to_string(),
            client_id: "platform".to_string(),
            client_secret: "s3cret".to_string(),
            scopes: vec!["openid".to_string(), "email".to_string()],
        }),
        attribute_mappings: default_mappings(),
        role_mappings: vec![RoleMappingRule::for_group("admins", Role::Admin, 10)],
        session_timeout: Duration::from_secs(8 * 3600),
        max_concurrent_sessions: None,
        compliance_audit: false,
    }
}

fn saml_provider(id: &str, org: &str) -> ProviderConfig {
    ProviderConfig {
        protocol: ProviderProtocol::Saml,
        params: ProtocolParams::Saml(SamlParams {
            sso_url: "https://idp.example.com/sso".to_string(),
            entity_id: "https://idp.example.com".to_string(),
            certificate: "-----BEGIN CERTIFICATE-----\nMIIBtest\n-----END CERTIFICATE-----"
                .to_string(),
            slo_url: Some("https://idp.example.com/slo".to_string()),
            sp_entity_id: "https://platform.example.com/saml".to_string(),
            acs_url: "https://platform.example.com/saml/acs".to_string(),
        }),
        ..oidc_provider(id, org)
    }
}

fn admin_profile(subject: &str, email: &str) -> FederatedProfile {
    FederatedProfile::new(subject)
        .with_email(email)
        .with_given_name("Alex")
        .with_family_name("Rivera")
        .with_groups(vec!["admins".to_string()])
}

#[tokio::test]
async fn oidc_login_auto_provisions_admin_and_creates_session() {
    let h = harness();
    h.registry.register(oidc_provider("idp-1", "org-1")).await.unwrap();

    let outcome = h
        .orchestrator
        .authenticate("idp-1", &admin_profile("sub-1", "alex@example.com"), "sess-1")
        .await
        .unwrap();

    assert!(outcome.provisioned);
    assert_eq!(outcome.user.role, Role::Admin);
    assert_eq!(outcome.user.email, "alex@example.com");
    assert_eq!(outcome.user.organization_id, "org-1");
    assert!(outcome.tokens.access_token.starts_with("at-"));

    let session = h.sessions.get("sess-1").unwrap();
    assert_eq!(session.user_id, outcome.user.id);
    assert_eq!(session.provider_id, "idp-1");
    assert_eq!(session.group_snapshot, vec!["admins".to_string()]);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.total_logins, 1);
    assert_eq!(snapshot.successful_logins, 1);
    assert_eq!(snapshot.failed_logins, 0);
    assert!(snapshot.avg_login_latency_ms >= 0.0);

    assert_eq!(h.audit.events_of_kind(AuditEventKind::UserProvisioned).len(), 1);
    let logins = h.audit.events_of_kind(AuditEventKind::LoginSuccess);
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].provider_id.as_deref(), Some("idp-1"));
}

#[tokio::test]
async fn unknown_user_without_auto_provision_is_rejected() {
    let h = harness();
    let mut config = oidc_provider("idp-1", "org-1");
    config.auto_provision = false;
    h.registry.register(config).await.unwrap();

    let err = h
        .orchestrator
        .authenticate("idp-1", &admin_profile("sub-9", "nobody@example.com"), "sess-1")
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::UserNotProvisioned { .. }));

    // The finalizer still fires on failure.
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.failed_logins, 1);
    assert_eq!(snapshot.successful_logins, 0);
    let failures = h.audit.events_of_kind(AuditEventKind::LoginFailure);
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].metadata.get("error_kind").map(String::as_str),
        Some("user_not_provisioned")
    );
    assert!(h.sessions.get("sess-1").is_none());
}

#[tokio::test]
async fn cross_organization_login_is_rejected_without_mutation() {
    let h = harness();
    h.registry.register(oidc_provider("idp-1", "org-1")).await.unwrap();

    let stranger = LocalUser {
        id: "user-77".to_string(),
        organization_id: "org-2".to_string(),
        email: "alex@example.com".to_string(),
        given_name: "Old".to_string(),
        family_name: "Name".to_string(),
        role: Role::Member,
        federated_subject: None,
        provisioned_by: None,
        created_at: Utc::now(),
        last_login: None,
    };
    h.directory.insert(stranger);

    let err = h
        .orchestrator
        .authenticate("idp-1", &admin_profile("sub-1", "alex@example.com"), "sess-1")
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::OrganizationMismatch { .. }));

    // The account in the other tenant is untouched.
    let user = h.directory.get("user-77").unwrap();
    assert_eq!(user.given_name, "Old");
    assert_eq!(user.role, Role::Member);
    assert!(user.last_login.is_none());
    assert_eq!(h.token_store.count_for_user("user-77"), 0);
}

#[tokio::test]
async fn deactivated_provider_rejects_logins_but_still_audits() {
    let h = harness();
    h.registry.register(oidc_provider("idp-1", "org-1")).await.unwrap();
    h.registry.deactivate("idp-1").await.unwrap();

    let err = h
        .orchestrator
        .authenticate("idp-1", &admin_profile("sub-1", "alex@example.com"), "sess-1")
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::ProviderUnavailable { .. }));

    assert_eq!(h.metrics.snapshot().failed_logins, 1);
    assert_eq!(h.audit.events_of_kind(AuditEventKind::LoginFailure).len(), 1);
}

#[tokio::test]
async fn role_is_resynced_on_every_login_by_default() {
    let h = harness();
    h.registry.register(oidc_provider("idp-1", "org-1")).await.unwrap();

    let first = h
        .orchestrator
        .authenticate("idp-1", &admin_profile("sub-1", "alex@example.com"), "sess-1")
        .await
        .unwrap();
    assert_eq!(first.user.role, Role::Admin);

    // Group membership revoked upstream; next login demotes.
    let demoted = FederatedProfile::new("sub-1").with_email("alex@example.com");
    let second = h
        .orchestrator
        .authenticate("idp-1", &demoted, "sess-2")
        .await
        .unwrap();
    assert!(!second.provisioned);
    assert_eq!(second.user.role, Role::Viewer);

    let role_events = h.audit.events_of_kind(AuditEventKind::RoleAssigned);
    assert_eq!(role_events.len(), 1);
    assert_eq!(
        role_events[0].metadata.get("new_role").map(String::as_str),
        Some("viewer")
    );
}

#[tokio::test]
async fn first_provision_only_policy_preserves_manual_role_grants() {
    let h = harness();
    let mut config = oidc_provider("idp-1", "org-1");
    config.role_sync_policy = RoleSyncPolicy::OnFirstProvisionOnly;
    h.registry.register(config).await.unwrap();

    let first = h
        .orchestrator
        .authenticate("idp-1", &admin_profile("sub-1", "alex@example.com"), "sess-1")
        .await
        .unwrap();
    assert_eq!(first.user.role, Role::Admin);

    let demoted = FederatedProfile::new("sub-1").with_email("alex@example.com");
    let second = h
        .orchestrator
        .authenticate("idp-1", &demoted, "sess-2")
        .await
        .unwrap();
    assert_eq!(second.user.role, Role::Admin);
    assert!(h.audit.events_of_kind(AuditEventKind::RoleAssigned).is_empty());
}

#[tokio::test]
async fn concurrent_session_cap_is_enforced_per_user() {
    let h = harness();
    let mut config = oidc_provider("idp-1", "org-1");
    config.max_concurrent_sessions = Some(1);
    h.registry.register(config).await.unwrap();

    let profile = admin_profile("sub-1", "alex@example.com");
    let first = h.orchestrator.authenticate("idp-1", &profile, "sess-1").await.unwrap();

    let err = h
        .orchestrator
        .authenticate("idp-1", &profile, "sess-2")
        .await
        .unwrap_err();
    assert!(matches!(err, SsoError::SessionLimitExceeded { max: 1, .. }));
    assert!(h.sessions.get("sess-2").is_none());
    // a rejected login must not persist a refresh token either
    assert_eq!(h.token_store.count_for_user(&first.user.id), 1);
}

#[tokio::test]
async fn compliance_flagged_provider_records_snapshot_metadata() {
    let h = harness();
    let mut flagged = oidc_provider("idp-audited", "org-1");
    flagged.compliance_audit = true;
    h.registry.register(flagged).await.unwrap();
    h.registry.register(oidc_provider("idp-plain", "org-1")).await.unwrap();

    h.orchestrator
        .authenticate("idp-audited", &admin_profile("sub-1", "alex@example.com"), "sess-1")
        .await
        .unwrap();
    h.orchestrator
        .authenticate("idp-plain", &admin_profile("sub-2", "sam@example.com"), "sess-2")
        .await
        .unwrap();

    let logins = h.audit.events_of_kind(AuditEventKind::LoginSuccess);
    assert_eq!(logins.len(), 2);
    let audited = logins.iter().find(|e| e.provider_id.as_deref() == Some("idp-audited")).unwrap();
    assert_eq!(audited.metadata.get("groups").map(String::as_str), Some("admins"));
    assert!(audited.metadata.get("attributes").unwrap().contains("alex@example.com"));

    let plain = logins.iter().find(|e| e.provider_id.as_deref() == Some("idp-plain")).unwrap();
    assert!(!plain.metadata.contains_key("groups"));
    assert!(!plain.metadata.contains_key("attributes"));
}

#[tokio::test]
async fn racing_logins_never_exceed_the_session_cap() {
    let h = harness();
    let mut config = oidc_provider("idp-1", "org-1");
    config.max_concurrent_sessions = Some(3);
    h.registry.register(config).await.unwrap();

    let profile = admin_profile("sub-1", "alex@example.com");
    // provision the account first so every racer hits the same user
    let first = h.orchestrator.authenticate("idp-1", &profile, "sess-0").await.unwrap();

    let mut handles = Vec::new();
    for i in 1..9 {
        let orchestrator = Arc::clone(&h.orchestrator);
        let profile = profile.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .authenticate("idp-1", &profile, &format!("sess-{i}"))
                .await
        }));
    }
    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }

    assert_eq!(successes, 2);
    assert_eq!(h.sessions.active_count(), 3);
    assert_eq!(h.token_store.count_for_user(&first.user.id), 3);
}

#[tokio::test]
async fn terminating_one_session_revokes_every_session_and_token_for_the_user() {
    let h = harness();
    h.registry.register(oidc_provider("idp-1", "org-1")).await.unwrap();

    let profile = admin_profile("sub-1", "alex@example.com");
    let outcome = h.orchestrator.authenticate("idp-1", &profile, "sess-1").await.unwrap();
    h.orchestrator.authenticate("idp-1", &profile, "sess-2").await.unwrap();
    assert_eq!(h.token_store.count_for_user(&outcome.user.id), 2);

    assert!(h.sessions.terminate("sess-1").await.unwrap());
    assert!(h.sessions.get("sess-1").is_none());
    assert!(h.sessions.get("sess-2").is_none());
    assert_eq!(h.token_store.count_for_user(&outcome.user.id), 0);

    // Terminating an unknown session is idempotent.
    assert!(h.sessions.terminate("sess-1").await.unwrap());
}

#[tokio::test]
async fn saml_single_logout_builds_redirect_with_relay_state() {
    let h = harness();
    h.registry.register(saml_provider("idp-saml", "org-1")).await.unwrap();

    h.orchestrator
        .authenticate("idp-saml", &admin_profile("sub-1", "alex@example.com"), "sess-1")
        .await
        .unwrap();

    let result = h
        .sessions
        .initiate_single_logout("sess-1", Some("https://platform.example.com/goodbye"))
        .await
        .unwrap();
    assert!(result.success);
    let url = result.logout_url.unwrap();
    assert!(url.starts_with("https://idp.example.com/slo?"));
    assert!(url.contains("SAMLRequest="));
    assert!(url.contains("RelayState="));

    // Single Logout terminates the local session too.
    assert!(h.sessions.get("sess-1").is_none());
    assert_eq!(
        h.audit.events_of_kind(AuditEventKind::SingleLogoutInitiated).len(),
        1
    );
}

#[tokio::test]
async fn oidc_single_logout_succeeds_locally_without_redirect() {
    let h = harness();
    h.registry.register(oidc_provider("idp-1", "org-1")).await.unwrap();
    h.orchestrator
        .authenticate("idp-1", &admin_profile("sub-1", "alex@example.com"), "sess-1")
        .await
        .unwrap();

    let result = h.sessions.initiate_single_logout("sess-1", None).await.unwrap();
    assert!(result.success);
    assert!(result.logout_url.is_none());
    assert!(h.sessions.get("sess-1").is_none());
}

#[tokio::test]
async fn metrics_stay_consistent_under_concurrent_logins() {
    let h = harness();
    h.registry.register(oidc_provider("idp-1", "org-1")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            let profile = FederatedProfile::new(format!("sub-{i}"))
                .with_email(format!("user{i}@example.com"));
            orchestrator
                .authenticate("idp-1", &profile, &format!("sess-{i}"))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.total_logins, 16);
    assert_eq!(snapshot.successful_logins, 16);
    assert_eq!(snapshot.failed_logins, 0);
    assert_eq!(snapshot.per_provider.len(), 1);
    assert_eq!(snapshot.per_provider[0].total_logins, 16);
    assert_eq!(h.sessions.active_count(), 16);
}

#[tokio::test]
async fn first_login_from_unknown_everything_at_night_requires_mfa() {
    let h = harness();
    let risk = Arc::new(RiskEngine::new());
    let engine = AdaptiveMfaEngine::new(
        Arc::new(MfaEnrollments::new()),
        risk,
        h.audit.clone(),
    );

    // 03:00 UTC, no baseline for the user at all.
    let at = Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap();
    let context = RiskContext::new("203.0.113.9", "curl/8", "fp-unknown", at);

    let decision = engine.decide("user-1", Some("org-1"), &context).await;
    assert!(decision.require_mfa);
    assert_eq!(decision.risk_level, RiskLevel::High);
    assert!(decision.risk_score >= 0.7);
    assert!(decision.reasoning.len() >= 2);
    assert!(!decision.recommended_factors.is_empty());
    assert!(!decision.bypass_allowed);

    assert_eq!(
        h.audit.events_of_kind(AuditEventKind::AdaptiveMfaDecision).len(),
        1
    );
}
