//! Plain OAuth2 protocol handler.

use super::{
    bounded_probe, ConnectionTestReport, HttpProber, ProtocolHandler, ProtocolParams,
    ProviderConfig,
};
use crate::errors::{FieldError, Result, SsoError};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use url::Url;

pub struct OAuth2Handler;

fn oauth2_params(config: &ProviderConfig) -> Option<&super::OAuth2Params> {
    match &config.params {
        ProtocolParams::OAuth2(params) => Some(params),
        _ => None,
    }
}

fn check_url(value: &str, field: &str, errors: &mut Vec<FieldError>) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
        return;
    }
    if Url::parse(value).is_err() {
        errors.push(FieldError::new(field, "is not a valid URL"));
    }
}

#[async_trait]
impl ProtocolHandler for OAuth2Handler {
    fn validate_params(&self, config: &ProviderConfig) -> Vec<FieldError> {
        let Some(params) = oauth2_params(config) else {
            return vec![FieldError::new("params", "missing OAuth2 parameters")];
        };

        let mut errors = Vec::new();
        check_url(&params.authorization_url, "oauth2.authorization_url", &mut errors);
        check_url(&params.token_url, "oauth2.token_url", &mut errors);
        if let Some(userinfo_url) = &params.userinfo_url {
            check_url(userinfo_url, "oauth2.userinfo_url", &mut errors);
        }
        if params.client_id.trim().is_empty() {
            errors.push(FieldError::new("oauth2.client_id", "must not be empty"));
        }
        if params.client_secret.trim().is_empty() {
            errors.push(FieldError::new("oauth2.client_secret", "must not be empty"));
        }
        errors
    }

    async fn test_connection(
        &self,
        config: &ProviderConfig,
        prober: &dyn HttpProber,
        timeout: Duration,
    ) -> Result<ConnectionTestReport> {
        let params = oauth2_params(config)
            .ok_or_else(|| SsoError::internal("OAuth2 handler called without OAuth2 params"))?;

        let started = Instant::now();
        let status = bounded_probe(
            "oauth2_authorize_probe",
            timeout,
            prober.probe(&params.authorization_url),
        )
        .await?;

        // A bare GET on an authorization endpoint typically yields a
        // redirect or a 4xx complaining about missing parameters; only 5xx
        // counts as unreachable.
        Ok(ConnectionTestReport {
            provider_id: config.id.clone(),
            protocol: config.protocol,
            reachable: status < 500,
            detail: format!("authorization endpoint answered HTTP {status}"),
            elapsed: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::oidc_config;
    use crate::providers::{OAuth2Params, ProviderProtocol};

    fn oauth2_config() -> ProviderConfig {
        let mut config = oidc_config("p1", "org-a");
        config.protocol = ProviderProtocol::OAuth2;
        config.params = ProtocolParams::OAuth2(OAuth2Params {
            authorization_url: "https://idp.example.com/authorize".into(),
            token_url: "https://idp.example.com/token".into(),
            userinfo_url: None,
            client_id: "client-1".into(),
            client_secret: "secret-1".into(),
        });
        config
    }

    #[test]
    fn requires_authorization_and_token_urls() {
        let mut config = oauth2_config();
        if let ProtocolParams::OAuth2(params) = &mut config.params {
            params.authorization_url = String::new();
            params.token_url = "not a url".into();
        }
        let errors = OAuth2Handler.validate_params(&config);
        assert!(errors.iter().any(|e| e.field == "oauth2.authorization_url"));
        assert!(errors.iter().any(|e| e.field == "oauth2.token_url"));
    }

    #[test]
    fn valid_config_passes() {
        assert!(oauth2_config().validate().is_empty());
    }
}
