//! LDAP protocol handler.
//!
//! Bind-level connectivity belongs to the directory collaborator; this
//! handler validates configuration shape and reports that LDAP cannot be
//! probed over the admin HTTP path.

use super::{ConnectionTestReport, HttpProber, ProtocolHandler, ProtocolParams, ProviderConfig};
use crate::errors::{FieldError, Result, SsoError};
use async_trait::async_trait;
use std::time::Duration;

pub struct LdapHandler;

fn ldap_params(config: &ProviderConfig) -> Option<&super::LdapParams> {
    match &config.params {
        ProtocolParams::Ldap(params) => Some(params),
        _ => None,
    }
}

#[async_trait]
impl ProtocolHandler for LdapHandler {
    fn validate_params(&self, config: &ProviderConfig) -> Vec<FieldError> {
        let Some(params) = ldap_params(config) else {
            return vec![FieldError::new("params", "missing LDAP parameters")];
        };

        let mut errors = Vec::new();
        if params.host.trim().is_empty() {
            errors.push(FieldError::new("ldap.host", "must not be empty"));
        }
        if params.port == 0 {
            errors.push(FieldError::new("ldap.port", "must be nonzero"));
        }
        if params.base_dn.trim().is_empty() {
            errors.push(FieldError::new(
                "ldap.base_dn",
                "base distinguished name must not be empty",
            ));
        } else if !params.base_dn.to_ascii_lowercase().contains("dc=") {
            errors.push(FieldError::new(
                "ldap.base_dn",
                "must contain at least one dc= component",
            ));
        }
        errors
    }

    async fn test_connection(
        &self,
        config: &ProviderConfig,
        _prober: &dyn HttpProber,
        _timeout: Duration,
    ) -> Result<ConnectionTestReport> {
        let params = ldap_params(config)
            .ok_or_else(|| SsoError::internal("LDAP handler called without LDAP params"))?;

        Ok(ConnectionTestReport {
            provider_id: config.id.clone(),
            protocol: config.protocol,
            reachable: false,
            detail: format!(
                "LDAP ({}:{}) is not probeable over HTTP; verify bind credentials via the directory service",
                params.host, params.port
            ),
            elapsed: Duration::ZERO,
        })
    }
}
