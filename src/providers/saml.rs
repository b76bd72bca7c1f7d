//! SAML 2.0 protocol handler.
//!
//! Signature verification happens in the collaborator that validates inbound
//! assertions; this handler owns configuration validation, SP metadata
//! generation, and the redirect-binding logout request used by Single
//! Logout.

use super::{
    bounded_probe, ConnectionTestReport, HttpProber, ProtocolHandler, ProviderConfig, SamlParams,
};
use crate::errors::{FieldError, Result, SsoError};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use std::time::{Duration, Instant};
use url::Url;
use uuid::Uuid;

pub struct SamlHandler;

#[async_trait]
impl ProtocolHandler for SamlHandler {
    fn validate_params(&self, config: &ProviderConfig) -> Vec<FieldError> {
        let Some(params) = config.saml_params() else {
            return vec![FieldError::new("params", "missing SAML parameters")];
        };

        let mut errors = Vec::new();
        validate_https_url(&params.sso_url, "saml.sso_url", &mut errors);
        if params.entity_id.trim().is_empty() {
            errors.push(FieldError::new("saml.entity_id", "must not be empty"));
        }
        if !has_pem_markers(&params.certificate) {
            errors.push(FieldError::new(
                "saml.certificate",
                "must be PEM with BEGIN/END CERTIFICATE markers",
            ));
        }
        if let Some(slo_url) = &params.slo_url {
            validate_https_url(slo_url, "saml.slo_url", &mut errors);
        }
        if params.sp_entity_id.trim().is_empty() {
            errors.push(FieldError::new("saml.sp_entity_id", "must not be empty"));
        }
        validate_https_url(&params.acs_url, "saml.acs_url", &mut errors);
        errors
    }

    async fn test_connection(
        &self,
        config: &ProviderConfig,
        prober: &dyn HttpProber,
        timeout: Duration,
    ) -> Result<ConnectionTestReport> {
        let params = config
            .saml_params()
            .ok_or_else(|| SsoError::internal("SAML handler called without SAML params"))?;

        let started = Instant::now();
        let status = bounded_probe("saml_sso_probe", timeout, prober.probe(&params.sso_url)).await?;

        // IdPs commonly answer a bare GET on the SSO endpoint with a
        // redirect or a 4xx; anything below 500 proves reachability.
        let reachable = status < 500;
        Ok(ConnectionTestReport {
            provider_id: config.id.clone(),
            protocol: config.protocol,
            reachable,
            detail: format!("SSO endpoint answered HTTP {status}"),
            elapsed: started.elapsed(),
        })
    }

    fn generate_metadata(&self, config: &ProviderConfig) -> Option<String> {
        let params = config.saml_params()?;
        Some(sp_metadata_xml(params))
    }
}

/// Service-provider entity descriptor handed to IdP administrators.
fn sp_metadata_xml(params: &SamlParams) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{sp_entity_id}">
  <md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:NameIDFormat>urn:oasis:names:tc:SAML:2.0:nameid-format:persistent</md:NameIDFormat>
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{acs_url}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        sp_entity_id = xml_escape(&params.sp_entity_id),
        acs_url = xml_escape(&params.acs_url),
    )
}

/// Build the provider-bound logout redirect for Single Logout.
///
/// Produces a redirect-binding URL on the IdP's SLO endpoint with the
/// base64-encoded `LogoutRequest` as `SAMLRequest` and, when the caller
/// supplied a post-logout destination, that destination as `RelayState`.
/// Returns `None` when the provider has no configured SLO endpoint.
pub fn build_logout_redirect(
    params: &SamlParams,
    name_id: &str,
    relay_state: Option<&str>,
) -> Result<Option<String>> {
    let Some(slo_url) = &params.slo_url else {
        return Ok(None);
    };

    let request = logout_request_xml(params, name_id);
    let encoded = base64::engine::general_purpose::STANDARD.encode(request);

    let mut url = Url::parse(slo_url)?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("SAMLRequest", &encoded);
        if let Some(relay) = relay_state {
            query.append_pair("RelayState", relay);
        }
    }
    Ok(Some(url.to_string()))
}

fn logout_request_xml(params: &SamlParams, name_id: &str) -> String {
    format!(
        r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}"><saml:Issuer>{issuer}</saml:Issuer><saml:NameID Format="urn:oasis:names:tc:SAML:2.0:nameid-format:persistent">{name_id}</saml:NameID></samlp:LogoutRequest>"#,
        id = Uuid::new_v4().simple(),
        instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        destination = xml_escape(params.slo_url.as_deref().unwrap_or("")),
        issuer = xml_escape(&params.sp_entity_id),
        name_id = xml_escape(name_id),
    )
}

fn has_pem_markers(certificate: &str) -> bool {
    certificate.contains("-----BEGIN CERTIFICATE-----")
        && certificate.contains("-----END CERTIFICATE-----")
}

fn validate_https_url(value: &str, field: &str, errors: &mut Vec<FieldError>) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "must not be empty"));
        return;
    }
    match Url::parse(value) {
        Ok(url) if url.scheme() == "https" || url.scheme() == "http" => {}
        Ok(_) => errors.push(FieldError::new(field, "must be an http(s) URL")),
        Err(_) => errors.push(FieldError::new(field, "is not a valid URL")),
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::saml_config;

    #[test]
    fn rejects_certificate_without_pem_markers() {
        let mut config = saml_config("p1", "org-a");
        if let crate::providers::ProtocolParams::Saml(params) = &mut config.params {
            params.certificate = "MIIBnotpem".into();
        }
        let errors = SamlHandler.validate_params(&config);
        assert!(errors.iter().any(|e| e.field == "saml.certificate"));
    }

    #[test]
    fn rejects_empty_sso_url() {
        let mut config = saml_config("p1", "org-a");
        if let crate::providers::ProtocolParams::Saml(params) = &mut config.params {
            params.sso_url = String::new();
        }
        let errors = SamlHandler.validate_params(&config);
        assert!(errors.iter().any(|e| e.field == "saml.sso_url"));
    }

    #[test]
    fn logout_redirect_embeds_request_and_relay_state() {
        let config = saml_config("p1", "org-a");
        let params = config.saml_params().unwrap();

        let url = build_logout_redirect(params, "user@example.com", Some("https://app/done"))
            .unwrap()
            .unwrap();
        assert!(url.starts_with("https://idp.example.com/slo?"));
        assert!(url.contains("SAMLRequest="));
        assert!(url.contains("RelayState=https%3A%2F%2Fapp%2Fdone"));

        // the encoded request names the SP entity and the subject
        let encoded = url
            .split("SAMLRequest=")
            .nth(1)
            .unwrap()
            .split('&')
            .next()
            .unwrap();
        let decoded: String = url::form_urlencoded::parse(format!("x={encoded}").as_bytes())
            .next()
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let xml = base64::engine::general_purpose::STANDARD
            .decode(decoded)
            .unwrap();
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains("https://platform.example.com/saml"));
        assert!(xml.contains("user@example.com"));
    }

    #[test]
    fn no_slo_endpoint_means_no_redirect() {
        let config = saml_config("p1", "org-a");
        let mut params = config.saml_params().unwrap().clone();
        params.slo_url = None;
        assert!(build_logout_redirect(&params, "user@example.com", None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn metadata_contains_acs_and_entity_id() {
        let config = saml_config("p1", "org-a");
        let xml = SamlHandler.generate_metadata(&config).unwrap();
        assert!(xml.contains("https://platform.example.com/saml/acs"));
        assert!(xml.contains(r#"entityID="https://platform.example.com/saml""#));
    }
}
