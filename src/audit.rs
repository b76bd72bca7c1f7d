//! Audit event emission for federation and session lifecycle.
//!
//! The core emits an audit event on every authentication outcome, session
//! termination, logout, and provider lifecycle change. Durable storage and
//! reporting belong to the sink implementation; from the core's perspective
//! recording is fire-and-forget, bounded by the caller's timeout.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kinds of audit events emitted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    LoginSuccess,
    LoginFailure,
    UserProvisioned,
    RoleAssigned,
    SessionTerminated,
    SingleLogoutInitiated,
    ProviderRegistered,
    ProviderUpdated,
    ProviderDeactivated,
    AdaptiveMfaDecision,
}

/// Outcome attached to an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: String,
    /// What happened
    pub kind: AuditEventKind,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Provider involved, if any
    pub provider_id: Option<String>,
    /// Acting or affected user, if known
    pub actor_id: Option<String>,
    /// Session involved, if any
    pub session_id: Option<String>,
    /// Success or failure
    pub outcome: AuditOutcome,
    /// Short human-readable summary
    pub description: String,
    /// Classified detail; never carries secrets or raw assertions
    pub metadata: HashMap<String, String>,
    /// Wall time of the audited operation, when measured
    pub elapsed_ms: Option<u64>,
}

impl AuditEvent {
    /// Start building an event of the given kind and outcome.
    pub fn new(kind: AuditEventKind, outcome: AuditOutcome, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            provider_id: None,
            actor_id: None,
            session_id: None,
            outcome,
            description: description.into(),
            metadata: HashMap::new(),
            elapsed_ms: None,
        }
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }
}

/// Where audit events go.
///
/// Implementations must tolerate concurrent calls and should return quickly;
/// the core invokes `record` on every code path but never waits beyond its
/// own bound for persistence.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Sink that emits structured tracing events. Suitable as a default when no
/// durable sink is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                kind = ?event.kind,
                provider = event.provider_id.as_deref().unwrap_or("-"),
                actor = event.actor_id.as_deref().unwrap_or("-"),
                session = event.session_id.as_deref().unwrap_or("-"),
                elapsed_ms = event.elapsed_ms,
                "{}",
                event.description
            ),
            AuditOutcome::Failure => tracing::warn!(
                kind = ?event.kind,
                provider = event.provider_id.as_deref().unwrap_or("-"),
                actor = event.actor_id.as_deref().unwrap_or("-"),
                session = event.session_id.as_deref().unwrap_or("-"),
                elapsed_ms = event.elapsed_ms,
                "{}",
                event.description
            ),
        }
    }
}

/// In-memory sink retaining every event, used by tests and single-node
/// deployments that snapshot events elsewhere.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit sink poisoned").clone()
    }

    /// Events of one kind, oldest first.
    pub fn events_of_kind(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().expect("audit sink poisoned").push(event);
    }
}
