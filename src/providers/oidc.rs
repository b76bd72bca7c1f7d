//! OIDC protocol handler, shared by the named directory products.

use super::{
    bounded_probe, ConnectionTestReport, HttpProber, ProtocolHandler, ProtocolParams,
    ProviderConfig,
};
use crate::errors::{FieldError, Result, SsoError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use url::Url;

pub struct OidcHandler;

fn oidc_params(config: &ProviderConfig) -> Option<&super::OidcParams> {
    match &config.params {
        ProtocolParams::Oidc(params) => Some(params),
        _ => None,
    }
}

#[async_trait]
impl ProtocolHandler for OidcHandler {
    fn validate_params(&self, config: &ProviderConfig) -> Vec<FieldError> {
        let Some(params) = oidc_params(config) else {
            return vec![FieldError::new("params", "missing OIDC parameters")];
        };

        let mut errors = Vec::new();
        match Url::parse(&params.issuer_url) {
            Ok(url) if url.scheme() == "https" || url.scheme() == "http" => {}
            Ok(_) => errors.push(FieldError::new(
                "oidc.issuer_url",
                "must be an http(s) URL",
            )),
            Err(_) => errors.push(FieldError::new("oidc.issuer_url", "is not a valid URL")),
        }
        if params.client_id.trim().is_empty() {
            errors.push(FieldError::new("oidc.client_id", "must not be empty"));
        }
        if params.client_secret.trim().is_empty() {
            errors.push(FieldError::new("oidc.client_secret", "must not be empty"));
        }
        errors
    }

    async fn test_connection(
        &self,
        config: &ProviderConfig,
        prober: &dyn HttpProber,
        timeout: Duration,
    ) -> Result<ConnectionTestReport> {
        let params = oidc_params(config)
            .ok_or_else(|| SsoError::internal("OIDC handler called without OIDC params"))?;

        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            params.issuer_url.trim_end_matches('/')
        );

        let started = Instant::now();
        let status = bounded_probe("oidc_discovery", timeout, prober.probe(&discovery_url)).await?;

        Ok(ConnectionTestReport {
            provider_id: config.id.clone(),
            protocol: config.protocol,
            reachable: status == 200,
            detail: format!("discovery document answered HTTP {status}"),
            elapsed: started.elapsed(),
        })
    }
}
