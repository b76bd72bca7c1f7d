//! Process-wide authentication counters.
//!
//! Every field updates atomically on its own; there is no global lock around
//! the structure. The running-average latency is an exponential blend stored
//! as `f64` bits inside an `AtomicU64` and updated with a compare-exchange
//! loop, so concurrent samples never lose each other entirely.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Blend factor for the running-average latency. Each new sample contributes
/// this fraction of the stored average.
const LATENCY_EMA_ALPHA: f64 = 0.2;

#[derive(Debug, Default)]
struct ProviderCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

/// Shared mutable login metrics. One instance per process, initialized at
/// startup and mutated on every authentication attempt.
#[derive(Debug, Default)]
pub struct SsoMetrics {
    total_logins: AtomicU64,
    successful_logins: AtomicU64,
    failed_logins: AtomicU64,
    active_providers: AtomicI64,
    /// EMA of login latency in milliseconds, stored as f64 bits
    avg_login_latency: AtomicU64,
    per_provider: DashMap<String, ProviderCounters>,
}

/// Read-only snapshot of [`SsoMetrics`], taken field-by-field. Under
/// concurrent writes the fields are individually (not mutually) consistent,
/// which is all callers of `GetMetrics` need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_logins: u64,
    pub successful_logins: u64,
    pub failed_logins: u64,
    pub active_providers: i64,
    pub avg_login_latency_ms: f64,
    pub per_provider: Vec<ProviderMetricsSnapshot>,
}

/// Per-provider slice of the metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetricsSnapshot {
    pub provider_id: String,
    pub total_logins: u64,
    pub successful_logins: u64,
    pub failed_logins: u64,
}

impl SsoMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one authentication attempt against a provider.
    pub fn record_login(&self, provider_id: &str, success: bool, latency_ms: f64) {
        self.total_logins.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_logins.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_logins.fetch_add(1, Ordering::Relaxed);
        }

        let counters = self.per_provider.entry(provider_id.to_string()).or_default();
        counters.total.fetch_add(1, Ordering::Relaxed);
        if success {
            counters.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        drop(counters);

        self.blend_latency(latency_ms);
    }

    /// Exponential blend of old average and the new sample. A first sample
    /// (stored average of zero with no recorded logins) seeds the average
    /// directly instead of blending against zero.
    fn blend_latency(&self, sample_ms: f64) {
        let _ = self
            .avg_login_latency
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let old = f64::from_bits(bits);
                let next = if bits == 0 {
                    sample_ms
                } else {
                    old * (1.0 - LATENCY_EMA_ALPHA) + sample_ms * LATENCY_EMA_ALPHA
                };
                Some(next.to_bits())
            });
    }

    /// Bump the active-provider gauge.
    pub fn provider_activated(&self) {
        self.active_providers.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop the active-provider gauge.
    pub fn provider_deactivated(&self) {
        self.active_providers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Take a read-only snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut per_provider: Vec<ProviderMetricsSnapshot> = self
            .per_provider
            .iter()
            .map(|entry| ProviderMetricsSnapshot {
                provider_id: entry.key().clone(),
                total_logins: entry.total.load(Ordering::Relaxed),
                successful_logins: entry.successful.load(Ordering::Relaxed),
                failed_logins: entry.failed.load(Ordering::Relaxed),
            })
            .collect();
        per_provider.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));

        MetricsSnapshot {
            total_logins: self.total_logins.load(Ordering::Relaxed),
            successful_logins: self.successful_logins.load(Ordering::Relaxed),
            failed_logins: self.failed_logins.load(Ordering::Relaxed),
            active_providers: self.active_providers.load(Ordering::Relaxed),
            avg_login_latency_ms: f64::from_bits(self.avg_login_latency.load(Ordering::Relaxed)),
            per_provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_track_success_and_failure() {
        let metrics = SsoMetrics::new();
        metrics.record_login("p1", true, 12.0);
        metrics.record_login("p1", false, 8.0);
        metrics.record_login("p2", true, 20.0);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_logins, 3);
        assert_eq!(snap.successful_logins, 2);
        assert_eq!(snap.failed_logins, 1);

        let p1 = snap
            .per_provider
            .iter()
            .find(|p| p.provider_id == "p1")
            .unwrap();
        assert_eq!(p1.total_logins, 2);
        assert_eq!(p1.successful_logins, 1);
        assert_eq!(p1.failed_logins, 1);
    }

    #[test]
    fn latency_average_blends_and_stays_finite() {
        let metrics = SsoMetrics::new();
        metrics.record_login("p1", true, 100.0);
        assert_eq!(metrics.snapshot().avg_login_latency_ms, 100.0);

        metrics.record_login("p1", true, 0.0);
        let avg = metrics.snapshot().avg_login_latency_ms;
        assert!(avg > 0.0 && avg < 100.0);
        assert!(avg.is_finite());
    }

    #[test]
    fn active_provider_gauge() {
        let metrics = SsoMetrics::new();
        metrics.provider_activated();
        metrics.provider_activated();
        metrics.provider_deactivated();
        assert_eq!(metrics.snapshot().active_providers, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_lost_updates_under_concurrency() {
        let metrics = Arc::new(SsoMetrics::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&metrics);
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    m.record_login("p1", true, 5.0);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.total_logins, 2000);
        assert_eq!(snap.successful_logins, 2000);
        assert_eq!(snap.per_provider[0].total_logins, 2000);
    }
}
