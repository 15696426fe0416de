// src/limits/usage.rs
//! Subscription-quota gate. The increment is delegated to the store as a
//! single conditional operation so two concurrent requests can never both
//! pass a check against the same near-exhausted counter.
//!
//! Callers must run every other precondition (ownership, feature gating)
//! BEFORE calling `check_and_increment`: a rejected request must never
//! consume quota.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use metrics::counter;
use serde::Serialize;

use crate::limits::tier::{current_period, effective_tier, monthly_limit, Tier, UsageMetric};
use crate::store::{UsageStore, UserProfile};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageDecision {
    pub allowed: bool,
    pub limit: u32,
    pub tier: Tier,
}

#[derive(Clone)]
pub struct UsageGate {
    store: Arc<dyn UsageStore>,
}

impl UsageGate {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    pub async fn check_and_increment(
        &self,
        user: &UserProfile,
        metric: UsageMetric,
    ) -> Result<UsageDecision> {
        let now = Utc::now();
        let tier = effective_tier(&user.tier, user.tier_expires_at, now);
        let limit = monthly_limit(tier, metric);
        let period = current_period(now);

        let allowed = self
            .store
            .increment_if_below(&user.id, &period, metric, limit)
            .await?;

        if !allowed {
            counter!("usage_gate_rejected_total", "metric" => metric.as_str()).increment(1);
        }
        Ok(UsageDecision {
            allowed,
            limit,
            tier,
        })
    }
}
