// src/limits/mod.rs
//! Request throttling and subscription-quota enforcement. Two distinct
//! mechanisms: a fixed-window request limiter and an atomic per-billing-
//! period usage gate.

pub mod rate;
pub mod tier;
pub mod usage;

pub use rate::{FixedWindowLimiter, InMemoryRateStore, RateDecision, RateStore};
pub use tier::{effective_tier, Tier, UsageMetric};
pub use usage::{UsageDecision, UsageGate};
