//! Concurrent provider registry.
//!
//! Single source of truth for "is this provider usable". Reads are lock-free
//! per key through the underlying `DashMap`; writes are atomic per provider
//! and never serialize the whole registry. Providers referenced by live
//! sessions are never hard-deleted, only deactivated.

use super::{handler_for, ConnectionTestReport, HttpProber, ProviderConfig, ProviderStatus};
use crate::audit::{AuditEvent, AuditEventKind, AuditOutcome, AuditSink};
use crate::errors::{Result, SsoError};
use crate::metrics::SsoMetrics;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Owns every configured [`ProviderConfig`], keyed by provider instance ID.
pub struct ProviderRegistry {
    providers: DashMap<String, Arc<ProviderConfig>>,
    metrics: Arc<SsoMetrics>,
    audit: Arc<dyn AuditSink>,
}

impl ProviderRegistry {
    pub fn new(metrics: Arc<SsoMetrics>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            providers: DashMap::new(),
            metrics,
            audit,
        }
    }

    /// Register a provider after full validation. Returns the provider ID.
    ///
    /// A failing configuration is rejected with every field-level reason at
    /// once. Successful registration of an active provider updates the
    /// active-provider metric.
    pub async fn register(&self, mut config: ProviderConfig) -> Result<String> {
        if config.id.trim().is_empty() {
            config.id = Uuid::new_v4().to_string();
        }

        let errors = config.validate();
        if !errors.is_empty() {
            return Err(SsoError::validation(errors));
        }

        let id = config.id.clone();
        let active = config.status == ProviderStatus::Active;
        let name = config.name.clone();
        let org = config.organization_id.clone();
        self.providers.insert(id.clone(), Arc::new(config));
        if active {
            self.metrics.provider_activated();
        }

        tracing::info!(provider = %id, org = %org, "identity provider registered");
        self.audit
            .record(
                AuditEvent::new(
                    AuditEventKind::ProviderRegistered,
                    AuditOutcome::Success,
                    format!("provider '{name}' registered"),
                )
                .with_provider(id.clone())
                .with_metadata("organization_id", org),
            )
            .await;
        Ok(id)
    }

    /// Look up a provider by ID.
    pub fn get(&self, provider_id: &str) -> Option<Arc<ProviderConfig>> {
        self.providers.get(provider_id).map(|p| Arc::clone(&p))
    }

    /// Look up a provider that must exist and be active; the orchestrator's
    /// step 1.
    pub fn get_active(&self, provider_id: &str) -> Result<Arc<ProviderConfig>> {
        match self.get(provider_id) {
            Some(config) if config.status == ProviderStatus::Active => Ok(config),
            _ => Err(SsoError::provider_unavailable(provider_id)),
        }
    }

    /// Replace a provider's configuration, re-validating the whole config.
    /// The provider ID is preserved; role-mapping rules are replaced as a
    /// set.
    pub async fn update(&self, provider_id: &str, mut config: ProviderConfig) -> Result<()> {
        config.id = provider_id.to_string();
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(SsoError::validation(errors));
        }

        let mut entry = self
            .providers
            .get_mut(provider_id)
            .ok_or_else(|| SsoError::provider_unavailable(provider_id))?;

        let was_active = entry.status == ProviderStatus::Active;
        let now_active = config.status == ProviderStatus::Active;
        *entry = Arc::new(config);
        drop(entry);

        match (was_active, now_active) {
            (false, true) => self.metrics.provider_activated(),
            (true, false) => self.metrics.provider_deactivated(),
            _ => {}
        }

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventKind::ProviderUpdated,
                    AuditOutcome::Success,
                    "provider configuration updated",
                )
                .with_provider(provider_id),
            )
            .await;
        Ok(())
    }

    /// Soft-deactivate a provider. Sessions referencing it stay resolvable;
    /// new logins are refused by [`Self::get_active`].
    pub async fn deactivate(&self, provider_id: &str) -> Result<()> {
        let mut entry = self
            .providers
            .get_mut(provider_id)
            .ok_or_else(|| SsoError::provider_unavailable(provider_id))?;

        if entry.status == ProviderStatus::Active {
            self.metrics.provider_deactivated();
        }
        let mut config = (**entry).clone();
        config.status = ProviderStatus::Inactive;
        *entry = Arc::new(config);
        drop(entry);

        tracing::info!(provider = %provider_id, "identity provider deactivated");
        self.audit
            .record(
                AuditEvent::new(
                    AuditEventKind::ProviderDeactivated,
                    AuditOutcome::Success,
                    "provider deactivated",
                )
                .with_provider(provider_id),
            )
            .await;
        Ok(())
    }

    /// Number of active providers.
    pub fn count_active(&self) -> usize {
        self.providers
            .iter()
            .filter(|p| p.status == ProviderStatus::Active)
            .count()
    }

    /// Probe the provider's endpoints with a bounded timeout.
    ///
    /// The config is cloned out of the map before awaiting, so no registry
    /// lock is held while the probe is in flight.
    pub async fn test_connection(
        &self,
        provider_id: &str,
        prober: &dyn HttpProber,
        timeout: Duration,
    ) -> Result<ConnectionTestReport> {
        let config = self
            .get(provider_id)
            .ok_or_else(|| SsoError::provider_unavailable(provider_id))?;
        handler_for(config.protocol)
            .test_connection(&config, prober, timeout)
            .await
    }

    /// Service-provider metadata for protocols that have one.
    pub fn generate_metadata(&self, provider_id: &str) -> Result<Option<String>> {
        let config = self
            .get(provider_id)
            .ok_or_else(|| SsoError::provider_unavailable(provider_id))?;
        Ok(handler_for(config.protocol).generate_metadata(&config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::providers::test_support::{oidc_config, saml_config};
    use crate::providers::{ProtocolParams, TARGET_EMAIL};

    fn registry() -> (ProviderRegistry, Arc<SsoMetrics>, Arc<MemoryAuditSink>) {
        let metrics = Arc::new(SsoMetrics::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let registry = ProviderRegistry::new(
            Arc::clone(&metrics),
            Arc::clone(&audit) as Arc<dyn AuditSink>,
        );
        (registry, metrics, audit)
    }

    #[tokio::test]
    async fn register_assigns_id_and_updates_gauge() {
        let (registry, metrics, _) = registry();
        let mut config = oidc_config("", "org-a");
        config.id = String::new();

        let id = registry.register(config).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(metrics.snapshot().active_providers, 1);
        assert_eq!(registry.count_active(), 1);
    }

    #[tokio::test]
    async fn invalid_config_reports_every_field() {
        let (registry, _, _) = registry();
        let mut config = oidc_config("p1", "org-a");
        config.attribute_mappings.remove(TARGET_EMAIL);
        if let ProtocolParams::Oidc(params) = &mut config.params {
            params.client_secret = String::new();
        }

        let err = registry.register(config).await.unwrap_err();
        match err {
            SsoError::Validation { errors } => {
                assert!(errors.len() >= 2);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deactivate_is_soft_and_drops_gauge() {
        let (registry, metrics, _) = registry();
        let id = registry.register(saml_config("p1", "org-a")).await.unwrap();

        registry.deactivate(&id).await.unwrap();
        assert_eq!(metrics.snapshot().active_providers, 0);
        // still resolvable for existing sessions
        assert!(registry.get(&id).is_some());
        assert!(registry.get_active(&id).is_err());
    }

    #[tokio::test]
    async fn get_active_rejects_testing_providers() {
        let (registry, _, _) = registry();
        let mut config = oidc_config("p1", "org-a");
        config.status = ProviderStatus::Testing;
        let id = registry.register(config).await.unwrap();

        let err = registry.get_active(&id).unwrap_err();
        assert_eq!(err.kind(), "provider_unavailable");
    }

    #[tokio::test]
    async fn update_revalidates_and_preserves_id() {
        let (registry, _, _) = registry();
        let id = registry.register(oidc_config("p1", "org-a")).await.unwrap();

        let mut replacement = oidc_config("ignored", "org-a");
        replacement.name = "renamed".into();
        registry.update(&id, replacement).await.unwrap();
        assert_eq!(registry.get(&id).unwrap().name, "renamed");

        let mut bad = oidc_config("ignored", "org-a");
        bad.attribute_mappings.clear();
        assert!(registry.update(&id, bad).await.is_err());
    }

    #[tokio::test]
    async fn metadata_only_for_saml() {
        let (registry, _, _) = registry();
        let saml_id = registry.register(saml_config("p1", "org-a")).await.unwrap();
        let oidc_id = registry.register(oidc_config("p2", "org-a")).await.unwrap();

        assert!(registry.generate_metadata(&saml_id).unwrap().is_some());
        assert!(registry.generate_metadata(&oidc_id).unwrap().is_none());
    }
}
