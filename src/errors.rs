//! Error types for the federation engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for the federation engine.
pub type Result<T, E = SsoError> = std::result::Result<T, E>;

/// A single field-level validation failure.
///
/// Provider registration returns every failing field at once so an admin can
/// fix the whole configuration in one pass instead of replaying the request
/// per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field, e.g. `saml.sso_url`
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Main error type for the federation engine.
#[derive(Error, Debug)]
pub enum SsoError {
    /// Provider or rule configuration malformed; carries every failing field.
    #[error("validation failed: {}", format_field_errors(.errors))]
    Validation { errors: Vec<FieldError> },

    /// Provider missing or not active. Recoverable by admin re-activation.
    #[error("provider '{provider_id}' is unavailable")]
    ProviderUnavailable { provider_id: String },

    /// No local account exists and the provider disallows auto-provisioning.
    #[error("no provisioned account for '{email}'")]
    UserNotProvisioned { email: String },

    /// The asserted identity belongs to a different tenant than the provider.
    /// Never auto-corrected.
    #[error("organization mismatch: provider belongs to '{provider_org}', user to '{user_org}'")]
    OrganizationMismatch {
        provider_org: String,
        user_org: String,
    },

    /// A collaborator call exceeded its bound. The caller may retry; the core
    /// never retries internally (retrying token issuance could double-issue).
    #[error("upstream call '{operation}' timed out after {timeout:?}")]
    UpstreamTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Risk scoring failed internally. Callers of the adaptive MFA engine
    /// never see this directly; the engine converts it into a fail-safe
    /// require-MFA decision.
    #[error("risk evaluation error: {message}")]
    RiskEvaluation { message: String },

    /// User already has the maximum number of concurrent sessions.
    #[error("user '{user_id}' exceeded the concurrent session limit of {max}")]
    SessionLimitExceeded { user_id: String, max: u32 },

    /// User directory errors
    #[error("directory error: {message}")]
    Directory { message: String },

    /// Token issuance or storage errors
    #[error("token error: {message}")]
    Token { message: String },

    /// Generic internal errors
    #[error("internal error: {message}")]
    Internal { message: String },

    /// JSON errors
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    /// Network/HTTP errors from the admin connection prober
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SsoError {
    /// Create a validation error from a list of field failures.
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation { errors }
    }

    /// Create a validation error for a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![FieldError::new(field, message)],
        }
    }

    /// Create a provider-unavailable error.
    pub fn provider_unavailable(provider_id: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider_id: provider_id.into(),
        }
    }

    /// Create a directory error.
    pub fn directory(message: impl Into<String>) -> Self {
        Self::Directory {
            message: message.into(),
        }
    }

    /// Create a token error.
    pub fn token(message: impl Into<String>) -> Self {
        Self::Token {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a risk-evaluation error.
    pub fn risk(message: impl Into<String>) -> Self {
        Self::RiskEvaluation {
            message: message.into(),
        }
    }

    /// Stable classifier for audit records and metric labels.
    ///
    /// Kept deliberately coarse: audit events must classify every failure
    /// without leaking field-level detail.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_failed",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::UserNotProvisioned { .. } => "user_not_provisioned",
            Self::OrganizationMismatch { .. } => "organization_mismatch",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::RiskEvaluation { .. } => "risk_evaluation_error",
            Self::SessionLimitExceeded { .. } => "session_limit_exceeded",
            Self::Directory { .. } => "directory_error",
            Self::Token { .. } => "token_error",
            Self::Internal { .. } => "internal_error",
            Self::Json(_) => "json_error",
            Self::Url(_) => "url_error",
            Self::Network(_) => "network_error",
        }
    }
}
