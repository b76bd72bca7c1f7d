//! Login risk scoring.
//!
//! The model is deliberately a transparent additive one: each independent
//! signal (unfamiliar network, unfamiliar device, atypical hour or day,
//! unfamiliar location) contributes a bounded weight, the total is clamped
//! to [0, 1], and the signals that fired become the reasoning trail. Keep it
//! inspectable; a decision nobody can explain is a decision nobody can
//! audit.

use crate::errors::Result;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Situational signals for one risk evaluation. Transient; only derived
/// baseline aggregates outlive the evaluation.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub ip_address: String,
    pub user_agent: String,
    /// Coarse location, e.g. a country or city label
    pub location: Option<String>,
    pub device_fingerprint: String,
    /// Local hour of day, 0-23
    pub hour_of_day: u8,
    pub day_of_week: Weekday,
}

impl RiskContext {
    /// Build a context stamped with the given instant's hour and weekday.
    pub fn new(
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        device_fingerprint: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            location: None,
            device_fingerprint: device_fingerprint.into(),
            hour_of_day: at.hour() as u8,
            day_of_week: at.weekday(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Discrete risk level derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Per-signal weights. Each weight individually stays within [0, 1]; the
/// summed score is clamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskWeights {
    pub unfamiliar_network: f64,
    pub unfamiliar_device: f64,
    pub atypical_hour: f64,
    pub atypical_day: f64,
    pub unfamiliar_location: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            unfamiliar_network: 0.25,
            unfamiliar_device: 0.25,
            atypical_hour: 0.20,
            atypical_day: 0.10,
            unfamiliar_location: 0.20,
        }
    }
}

/// Score boundaries for [`RiskLevel::Medium`] and [`RiskLevel::High`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 0.4,
            high: 0.7,
        }
    }
}

impl RiskThresholds {
    pub fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.high {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// What one evaluation produced: the bounded score, its level, and the
/// signals that fired, in evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub level: RiskLevel,
    pub signals: Vec<String>,
}

/// Observed login habits for one user, fed by successful logins.
#[derive(Debug, Clone, Default)]
struct UserBaseline {
    networks: HashSet<String>,
    devices: HashSet<String>,
    locations: HashSet<String>,
    hours: HashSet<u8>,
    days: HashSet<Weekday>,
}

/// Scoring seam. The production implementation is [`RiskEngine`]; the
/// adaptive MFA engine depends on this trait so failure paths are testable.
pub trait RiskScorer: Send + Sync {
    fn score(&self, user_id: &str, context: &RiskContext) -> Result<RiskAssessment>;
}

/// Additive risk engine with per-user learned baselines.
#[derive(Debug, Default)]
pub struct RiskEngine {
    weights: RiskWeights,
    thresholds: RiskThresholds,
    baselines: DashMap<String, UserBaseline>,
}

/// Hours considered atypical for a user with no recorded baseline.
const NIGHT_HOURS: std::ops::Range<u8> = 0..6;

impl RiskEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(mut self, weights: RiskWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_thresholds(mut self, thresholds: RiskThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Feed a successful login into the user's baseline so its signals are
    /// familiar next time.
    pub fn record_observation(&self, user_id: &str, context: &RiskContext) {
        let mut baseline = self.baselines.entry(user_id.to_string()).or_default();
        baseline.networks.insert(context.ip_address.clone());
        baseline.devices.insert(context.device_fingerprint.clone());
        if let Some(location) = &context.location {
            baseline.locations.insert(location.clone());
        }
        baseline.hours.insert(context.hour_of_day);
        baseline.days.insert(context.day_of_week);
    }
}

impl RiskScorer for RiskEngine {
    fn score(&self, user_id: &str, context: &RiskContext) -> Result<RiskAssessment> {
        let baseline = self
            .baselines
            .get(user_id)
            .map(|b| b.clone())
            .unwrap_or_default();

        let mut score = 0.0;
        let mut signals = Vec::new();

        if !baseline.networks.contains(&context.ip_address) {
            score += self.weights.unfamiliar_network;
            signals.push(format!("unfamiliar network address {}", context.ip_address));
        }
        if !baseline.devices.contains(&context.device_fingerprint) {
            score += self.weights.unfamiliar_device;
            signals.push("unfamiliar device fingerprint".to_string());
        }

        let hour_atypical = if baseline.hours.is_empty() {
            NIGHT_HOURS.contains(&context.hour_of_day)
        } else {
            !baseline.hours.contains(&context.hour_of_day)
        };
        if hour_atypical {
            score += self.weights.atypical_hour;
            signals.push(format!(
                "login at atypical hour {:02}:00",
                context.hour_of_day
            ));
        }

        if !baseline.days.is_empty() && !baseline.days.contains(&context.day_of_week) {
            score += self.weights.atypical_day;
            signals.push(format!("login on atypical day {:?}", context.day_of_week));
        }

        if let Some(location) = &context.location {
            if !baseline.locations.contains(location) {
                score += self.weights.unfamiliar_location;
                signals.push(format!("unfamiliar location {location}"));
            }
        }

        let score = score.clamp(0.0, 1.0);
        Ok(RiskAssessment {
            score,
            level: self.thresholds.level_for(score),
            signals,
        })
    }
}
