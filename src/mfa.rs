//! Adaptive multi-factor authentication decisions.
//!
//! Per login, the engine combines the user's MFA enrollment, the risk
//! engine's assessment, and the organization's policy into one enforcement
//! decision with an ordered reasoning trail. Any internal failure to
//! evaluate risk fails safe: MFA required at high risk, never fail open.

use crate::audit::{AuditEvent, AuditEventKind, AuditOutcome, AuditSink};
use crate::risk::{RiskContext, RiskLevel, RiskScorer};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Second-factor kinds the platform understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    HardwareKey,
    Passkey,
    Totp,
    Push,
    Sms,
    Email,
}

impl FactorKind {
    /// Relative strength used to rank recommendations; higher is stronger.
    pub fn strength(&self) -> u8 {
        match self {
            Self::HardwareKey => 6,
            Self::Passkey => 5,
            Self::Totp => 4,
            Self::Push => 3,
            Self::Sms => 2,
            Self::Email => 1,
        }
    }

    /// All kinds, strongest first. Recommended to unenrolled users facing
    /// high risk.
    pub fn ranked() -> [FactorKind; 6] {
        [
            Self::HardwareKey,
            Self::Passkey,
            Self::Totp,
            Self::Push,
            Self::Sms,
            Self::Email,
        ]
    }
}

/// Output of one adaptive MFA evaluation. Cacheable for the lifetime of one
/// login attempt only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveMfaDecision {
    pub require_mfa: bool,
    /// Bounded risk score in [0, 1]
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Factor kinds to offer, strongest-preference first
    pub recommended_factors: Vec<FactorKind>,
    /// One short entry per rule that fired, in evaluation order
    pub reasoning: Vec<String>,
    pub bypass_allowed: bool,
}

/// Which factors each user has enrolled. The real enrollment data lives
/// with the credential collaborator; this is the decision engine's view.
#[derive(Debug, Default)]
pub struct MfaEnrollments {
    factors: DashMap<String, Vec<FactorKind>>,
}

impl MfaEnrollments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(&self, user_id: &str, factor: FactorKind) {
        let mut entry = self.factors.entry(user_id.to_string()).or_default();
        if !entry.contains(&factor) {
            entry.push(factor);
        }
    }

    pub fn unenroll(&self, user_id: &str, factor: FactorKind) {
        if let Some(mut entry) = self.factors.get_mut(user_id) {
            entry.retain(|f| *f != factor);
        }
    }

    pub fn is_enrolled(&self, user_id: &str) -> bool {
        self.factors
            .get(user_id)
            .map(|f| !f.is_empty())
            .unwrap_or(false)
    }

    /// Enrolled factors, strongest first.
    pub fn enrolled_factors(&self, user_id: &str) -> Vec<FactorKind> {
        let mut factors = self
            .factors
            .get(user_id)
            .map(|f| f.clone())
            .unwrap_or_default();
        factors.sort_by_key(|f| std::cmp::Reverse(f.strength()));
        factors
    }
}

/// Combines enrollment, risk, and organization policy into one decision.
pub struct AdaptiveMfaEngine {
    enrollments: Arc<MfaEnrollments>,
    scorer: Arc<dyn RiskScorer>,
    audit: Arc<dyn AuditSink>,
    /// Organizations whose policy unconditionally enforces MFA
    enforced_orgs: DashSet<String>,
}

impl AdaptiveMfaEngine {
    pub fn new(
        enrollments: Arc<MfaEnrollments>,
        scorer: Arc<dyn RiskScorer>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            enrollments,
            scorer,
            audit,
            enforced_orgs: DashSet::new(),
        }
    }

    /// Turn unconditional MFA enforcement on or off for an organization.
    pub fn set_org_enforcement(&self, organization_id: &str, enforced: bool) {
        if enforced {
            self.enforced_orgs.insert(organization_id.to_string());
        } else {
            self.enforced_orgs.remove(organization_id);
        }
    }

    /// Evaluate one login.
    ///
    /// `organization_id` selects the enforced-policy check; callers that
    /// evaluate before the user's organization is known pass `None`.
    pub async fn decide(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
        context: &RiskContext,
    ) -> AdaptiveMfaDecision {
        let mut reasoning = Vec::new();
        let mut require_mfa = false;

        let enrolled = self.enrollments.enrolled_factors(user_id);
        if !enrolled.is_empty() {
            // Enrollment is an unconditional requirement, not a risk signal.
            require_mfa = true;
            reasoning.push(format!(
                "user has {} enrolled factor(s); MFA always required once enrolled",
                enrolled.len()
            ));
        }

        let (risk_score, risk_level) = match self.scorer.score(user_id, context) {
            Ok(assessment) => {
                reasoning.extend(assessment.signals.iter().cloned());
                (assessment.score, assessment.level)
            }
            Err(err) => {
                // Fail safe: an unevaluable login is a high-risk login.
                tracing::error!(user = %user_id, error = %err, "risk evaluation failed; failing safe");
                reasoning.push(format!("risk evaluation failed ({err}); failing safe"));
                let decision = self
                    .finalize(
                        user_id,
                        organization_id,
                        true,
                        1.0,
                        RiskLevel::High,
                        enrolled,
                        reasoning,
                        false,
                    )
                    .await;
                return decision;
            }
        };

        let mut recommended = match risk_level {
            RiskLevel::High => {
                require_mfa = true;
                reasoning.push("high risk level requires MFA with strongest enrolled factors".to_string());
                if enrolled.is_empty() {
                    FactorKind::ranked().to_vec()
                } else {
                    enrolled.clone()
                }
            }
            RiskLevel::Medium => {
                require_mfa = true;
                reasoning.push("medium risk level requires MFA with any enrolled factor".to_string());
                enrolled.clone()
            }
            RiskLevel::Low => enrolled.clone(),
        };
        if require_mfa && recommended.is_empty() {
            recommended = FactorKind::ranked().to_vec();
        }

        let bypass_allowed = risk_level == RiskLevel::Low;
        self.finalize(
            user_id,
            organization_id,
            require_mfa,
            risk_score,
            risk_level,
            recommended,
            reasoning,
            bypass_allowed,
        )
        .await
    }

    /// Apply the organization override, audit the outcome, and assemble the
    /// decision.
    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
        mut require_mfa: bool,
        risk_score: f64,
        risk_level: RiskLevel,
        recommended_factors: Vec<FactorKind>,
        mut reasoning: Vec<String>,
        mut bypass_allowed: bool,
    ) -> AdaptiveMfaDecision {
        if let Some(org) = organization_id {
            if self.enforced_orgs.contains(org) {
                require_mfa = true;
                bypass_allowed = false;
                reasoning.push(format!("organization '{org}' policy enforces MFA"));
            }
        }

        let decision = AdaptiveMfaDecision {
            require_mfa,
            risk_score,
            risk_level,
            recommended_factors,
            reasoning,
            bypass_allowed,
        };

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventKind::AdaptiveMfaDecision,
                    AuditOutcome::Success,
                    format!(
                        "adaptive MFA decision: require={}, level={:?}",
                        decision.require_mfa, decision.risk_level
                    ),
                )
                .with_actor(user_id)
                .with_metadata("risk_score", format!("{:.2}", decision.risk_score))
                .with_metadata("reasoning", decision.reasoning.join("; ")),
            )
            .await;

        decision
    }
}
