//! Identity provider configuration, validation, and protocol dispatch.
//!
//! A [`ProviderConfig`] describes one configured external identity source.
//! The protocol kind is a closed enum; per-protocol behavior (validation,
//! connection tests, metadata generation) lives behind [`ProtocolHandler`]
//! with one implementation per protocol family, dispatched statically.

pub mod ldap;
pub mod oauth2;
pub mod oidc;
pub mod registry;
pub mod saml;

use crate::errors::{FieldError, Result};
use crate::mapping::RoleMappingRule;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use registry::ProviderRegistry;

/// Attribute-mapping target fields every provider must supply.
pub const TARGET_EMAIL: &str = "email";
pub const TARGET_GIVEN_NAME: &str = "given_name";
pub const TARGET_FAMILY_NAME: &str = "family_name";

/// Supported federation protocols and named directory products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderProtocol {
    Saml,
    Oidc,
    OAuth2,
    Ldap,
    /// Microsoft Entra ID / Azure AD (OIDC-based)
    AzureAd,
    /// Okta Workforce Identity (OIDC-based)
    Okta,
    /// Google Workspace (OIDC-based)
    GoogleWorkspace,
}

impl ProviderProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saml => "saml",
            Self::Oidc => "oidc",
            Self::OAuth2 => "oauth2",
            Self::Ldap => "ldap",
            Self::AzureAd => "azure_ad",
            Self::Okta => "okta",
            Self::GoogleWorkspace => "google_workspace",
        }
    }

    /// Whether this protocol supports provider-side Single Logout.
    pub fn supports_single_logout(&self) -> bool {
        matches!(self, Self::Saml)
    }

    /// Named directory products federate over OIDC and share its parameter
    /// bundle.
    pub fn is_oidc_based(&self) -> bool {
        matches!(self, Self::Oidc | Self::AzureAd | Self::Okta | Self::GoogleWorkspace)
    }
}

impl std::fmt::Display for ProviderProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SAML 2.0 connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamlParams {
    /// IdP single-sign-on endpoint
    pub sso_url: String,
    /// IdP entity identifier
    pub entity_id: String,
    /// IdP signing certificate, PEM
    pub certificate: String,
    /// IdP single-logout endpoint, when the IdP supports SLO
    pub slo_url: Option<String>,
    /// Entity ID this service presents to the IdP
    pub sp_entity_id: String,
    /// Assertion consumer service URL on this platform
    pub acs_url: String,
}

/// OIDC connection parameters, also used by the named directory products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcParams {
    /// Issuer URL; discovery document lives at
    /// `{issuer}/.well-known/openid-configuration`
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Plain OAuth2 connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Params {
    pub authorization_url: String,
    pub token_url: String,
    pub userinfo_url: Option<String>,
    pub client_id: String,
    pub client_secret: String,
}

/// LDAP connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapParams {
    pub host: String,
    #[serde(default = "default_ldap_port")]
    pub port: u16,
    pub base_dn: String,
    pub bind_dn: Option<String>,
    #[serde(default)]
    pub use_tls: bool,
}

fn default_ldap_port() -> u16 {
    389
}

/// Protocol-specific parameter bundle. Exactly one variant is populated and
/// it must match the configured protocol kind; validation enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ProtocolParams {
    Saml(SamlParams),
    Oidc(OidcParams),
    OAuth2(OAuth2Params),
    Ldap(LdapParams),
}

impl ProtocolParams {
    fn matches_protocol(&self, protocol: ProviderProtocol) -> bool {
        match self {
            Self::Saml(_) => protocol == ProviderProtocol::Saml,
            Self::Oidc(_) => protocol.is_oidc_based(),
            Self::OAuth2(_) => protocol == ProviderProtocol::OAuth2,
            Self::Ldap(_) => protocol == ProviderProtocol::Ldap,
        }
    }
}

/// Provider lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    Active,
    Inactive,
    Testing,
}

/// Whether roles are re-mapped from provider claims on every login or only
/// when the account is first provisioned. Source-system behavior is
/// `OnEveryLogin`; the policy is explicit so administrators can opt out of
/// having manual role grants overwritten at next login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSyncPolicy {
    #[default]
    OnEveryLogin,
    OnFirstProvisionOnly,
}

/// One configured external identity source. Owned by the
/// [`ProviderRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable provider instance ID; assigned on registration when empty
    pub id: String,
    /// Owning tenant
    pub organization_id: String,
    /// Admin-facing display name
    pub name: String,
    pub protocol: ProviderProtocol,
    pub status: ProviderStatus,
    /// Create local accounts on first successful federated login
    pub auto_provision: bool,
    /// Refresh mutable profile fields from claims on each login
    pub jit_update_profile: bool,
    pub role_sync_policy: RoleSyncPolicy,
    pub params: ProtocolParams,
    /// Target field -> provider attribute name
    pub attribute_mappings: HashMap<String, String>,
    /// Ordered role-mapping rules; replaced as a set on update
    pub role_mappings: Vec<RoleMappingRule>,
    /// Idle timeout for sessions created through this provider
    pub session_timeout: Duration,
    /// Per-user concurrent session cap
    pub max_concurrent_sessions: Option<u32>,
    /// Record verbose audit metadata for logins through this provider
    pub compliance_audit: bool,
}

impl ProviderConfig {
    /// Validate the whole configuration, returning every failing field.
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();

        if self.organization_id.trim().is_empty() {
            errors.push(FieldError::new("organization_id", "must not be empty"));
        }
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "must not be empty"));
        }

        if !self.params.matches_protocol(self.protocol) {
            errors.push(FieldError::new(
                "params",
                format!(
                    "parameter bundle does not match protocol '{}'",
                    self.protocol
                ),
            ));
        } else {
            errors.extend(handler_for(self.protocol).validate_params(self));
        }

        for target in [TARGET_EMAIL, TARGET_GIVEN_NAME, TARGET_FAMILY_NAME] {
            match self.attribute_mappings.get(target) {
                Some(source) if !source.trim().is_empty() => {}
                _ => errors.push(FieldError::new(
                    format!("attribute_mappings.{target}"),
                    "mapping is required",
                )),
            }
        }

        for (index, rule) in self.role_mappings.iter().enumerate() {
            errors.extend(rule.validate(index));
        }

        if self.session_timeout.is_zero() {
            errors.push(FieldError::new("session_timeout", "must be positive"));
        }
        if self.max_concurrent_sessions == Some(0) {
            errors.push(FieldError::new(
                "max_concurrent_sessions",
                "must be at least 1 when set",
            ));
        }

        errors
    }

    /// The provider attribute name mapped to a target field, if configured.
    pub fn mapped_attribute(&self, target: &str) -> Option<&str> {
        self.attribute_mappings.get(target).map(String::as_str)
    }

    /// SAML parameters, when this is a SAML provider.
    pub fn saml_params(&self) -> Option<&SamlParams> {
        match &self.params {
            ProtocolParams::Saml(params) => Some(params),
            _ => None,
        }
    }
}

/// Result of an administrative connection test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestReport {
    pub provider_id: String,
    pub protocol: ProviderProtocol,
    pub reachable: bool,
    pub detail: String,
    pub elapsed: Duration,
}

/// Outbound HTTP prober used only on the admin connection-test path. The
/// production implementation is [`ReqwestProber`]; tests stub it.
#[async_trait]
pub trait HttpProber: Send + Sync {
    /// GET the URL and return the response status code.
    async fn probe(&self, url: &str) -> Result<u16>;
}

/// `reqwest`-backed prober.
#[derive(Debug, Clone, Default)]
pub struct ReqwestProber {
    client: reqwest::Client,
}

impl ReqwestProber {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpProber for ReqwestProber {
    async fn probe(&self, url: &str) -> Result<u16> {
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Per-protocol capability surface.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Validate protocol-specific parameters, reporting per field.
    fn validate_params(&self, config: &ProviderConfig) -> Vec<FieldError>;

    /// Probe the provider's endpoints. `timeout` bounds the whole test; the
    /// caller must not hold shared locks while awaiting this.
    async fn test_connection(
        &self,
        config: &ProviderConfig,
        prober: &dyn HttpProber,
        timeout: Duration,
    ) -> Result<ConnectionTestReport>;

    /// Service-provider metadata document, for protocols that have one.
    fn generate_metadata(&self, config: &ProviderConfig) -> Option<String> {
        let _ = config;
        None
    }
}

/// Static dispatch table over the closed protocol set.
pub fn handler_for(protocol: ProviderProtocol) -> &'static dyn ProtocolHandler {
    match protocol {
        ProviderProtocol::Saml => &saml::SamlHandler,
        ProviderProtocol::OAuth2 => &oauth2::OAuth2Handler,
        ProviderProtocol::Ldap => &ldap::LdapHandler,
        ProviderProtocol::Oidc
        | ProviderProtocol::AzureAd
        | ProviderProtocol::Okta
        | ProviderProtocol::GoogleWorkspace => &oidc::OidcHandler,
    }
}

/// Run a probe under the caller-supplied bound, normalizing the timeout into
/// the error taxonomy.
pub(crate) async fn bounded_probe(
    operation: &'static str,
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<u16>>,
) -> Result<u16> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| crate::errors::SsoError::UpstreamTimeout { operation, timeout })?
}
