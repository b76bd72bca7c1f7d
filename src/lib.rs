//! Enterprise SSO federation and adaptive MFA engine.
//!
//! This crate is the identity core behind a multi-tenant platform's login
//! surface. It owns the provider registry (SAML, OIDC, OAuth2, LDAP and the
//! named directory products), the federated authentication flow with
//! just-in-time provisioning and role mapping, session lifecycle including
//! SAML Single Logout, and a risk-scored adaptive MFA decision engine.
//!
//! Transport, cryptographic verification of assertions, and durable storage
//! live outside this crate behind the collaborator traits ([`UserDirectory`],
//! [`TokenIssuer`], [`RefreshTokenStore`], [`AuditSink`], [`HttpProber`]).
//! In-memory implementations of each ship here for tests and single-node use.
//!
//! # Quick start
//!
//! ```no_run
//! use sso_federation::{
//!     AuditSink, FederationOrchestrator, InMemoryDirectory, InMemoryTokenStore,
//!     OpaqueTokenIssuer, ProviderRegistry, SessionManager, SsoMetrics,
//!     TracingAuditSink,
//! };
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(SsoMetrics::new());
//! let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
//! let registry = Arc::new(ProviderRegistry::new(metrics.clone(), audit.clone()));
//! let token_store = Arc::new(InMemoryTokenStore::new());
//! let sessions = Arc::new(SessionManager::new(
//!     registry.clone(),
//!     token_store.clone(),
//!     audit.clone(),
//! ));
//! let orchestrator = FederationOrchestrator::new(
//!     registry,
//!     Arc::new(InMemoryDirectory::new()),
//!     Arc::new(OpaqueTokenIssuer),
//!     token_store,
//!     sessions,
//!     metrics,
//!     audit,
//! );
//! ```

pub mod audit;
pub mod directory;
pub mod errors;
pub mod federation;
pub mod mapping;
pub mod metrics;
pub mod mfa;
pub mod profile;
pub mod providers;
pub mod risk;
pub mod session;
pub mod tokens;

pub use audit::{AuditEvent, AuditEventKind, AuditOutcome, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use directory::{InMemoryDirectory, LocalUser, NewUser, UserDirectory, UserUpdate};
pub use errors::{FieldError, Result, SsoError};
pub use federation::{AuthenticationOutcome, FederationOrchestrator};
pub use mapping::{
    ConditionOperator, ConditionSubject, MappingCondition, Role, RoleMappingRule, resolve_role,
};
pub use metrics::{MetricsSnapshot, SsoMetrics};
pub use mfa::{AdaptiveMfaDecision, AdaptiveMfaEngine, FactorKind, MfaEnrollments};
pub use profile::FederatedProfile;
pub use providers::{
    ConnectionTestReport, HttpProber, LdapParams, OAuth2Params, OidcParams, ProtocolParams,
    ProviderConfig, ProviderProtocol, ProviderRegistry, ProviderStatus, ReqwestProber,
    RoleSyncPolicy, SamlParams,
};
pub use risk::{
    RiskAssessment, RiskContext, RiskEngine, RiskLevel, RiskScorer, RiskThresholds, RiskWeights,
};
pub use session::{SessionManager, SingleLogoutResult, SsoSession};
pub use tokens::{
    InMemoryTokenStore, OpaqueTokenIssuer, RefreshTokenStore, TokenIssuer, TokenPair,
};
