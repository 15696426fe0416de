// src/limits/tier.rs
//! Subscription tiers and the limits derived from them. Limits are a pure
//! function of tier and metric; no store lookups here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Plus,
    Pro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Plus => "plus",
            Tier::Pro => "pro",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMetric {
    Analyses,
    Translations,
}

impl UsageMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageMetric::Analyses => "analyses",
            UsageMetric::Translations => "translations",
        }
    }
}

/// Resolve the tier in effect. An expired time-boxed pass silently reads as
/// the lowest tier; unknown raw values do the same.
pub fn effective_tier(raw: &str, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Tier {
    if let Some(expiry) = expires_at {
        if expiry <= now {
            return Tier::Free;
        }
    }
    match raw.trim().to_ascii_lowercase().as_str() {
        "pro" => Tier::Pro,
        "plus" => Tier::Plus,
        _ => Tier::Free,
    }
}

/// Monthly quota for a metric on a tier.
pub fn monthly_limit(tier: Tier, metric: UsageMetric) -> u32 {
    match (tier, metric) {
        (Tier::Free, UsageMetric::Analyses) => 5,
        (Tier::Free, UsageMetric::Translations) => 0,
        (Tier::Plus, UsageMetric::Analyses) => 50,
        (Tier::Plus, UsageMetric::Translations) => 20,
        (Tier::Pro, UsageMetric::Analyses) => 500,
        (Tier::Pro, UsageMetric::Translations) => 200,
    }
}

/// Feature gate: non-default-language analysis is a paid feature.
pub fn allows_translation(tier: Tier) -> bool {
    tier >= Tier::Plus
}

/// Billing-period key, calendar month in UTC.
pub fn current_period(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}
