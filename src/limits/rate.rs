// src/limits/rate.rs
//! Fixed-window request limiter behind an injected `RateStore`, so tests use
//! the in-process map and production can plug in a shared store. Windows
//! reset lazily on first access after expiry; the in-memory store is swept
//! periodically to bound memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use metrics::counter;
use serde::Serialize;

const SWEEP_EVERY_CHECKS: u64 = 64;
const MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct WindowEntry {
    pub window_start_ms: u64,
    pub count: u32,
}

pub trait RateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<WindowEntry>;
    fn set(&self, key: &str, entry: WindowEntry);
    fn evict_expired(&self, now_ms: u64, window_ms: u64);
    fn len(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryRateStore {
    map: Mutex<HashMap<String, WindowEntry>>,
}

impl RateStore for InMemoryRateStore {
    fn get(&self, key: &str) -> Option<WindowEntry> {
        self.map.lock().expect("rate store poisoned").get(key).copied()
    }

    fn set(&self, key: &str, entry: WindowEntry) {
        self.map
            .lock()
            .expect("rate store poisoned")
            .insert(key.to_string(), entry);
    }

    fn evict_expired(&self, now_ms: u64, window_ms: u64) {
        self.map
            .lock()
            .expect("rate store poisoned")
            .retain(|_, e| now_ms.saturating_sub(e.window_start_ms) < window_ms);
    }

    fn len(&self) -> usize {
        self.map.lock().expect("rate store poisoned").len()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_in_ms: u64,
}

pub struct FixedWindowLimiter {
    store: Arc<dyn RateStore>,
    checks: AtomicU64,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn RateStore>) -> Self {
        Self {
            store,
            checks: AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRateStore::default()))
    }

    /// Check and count one request for `key` in `bucket`.
    pub fn check(&self, key: &str, bucket: &str, max: u32, window_ms: u64) -> RateDecision {
        let now = now_ms();
        self.maybe_sweep(now, window_ms);

        let full_key = format!("{bucket}:{key}");
        let entry = match self.store.get(&full_key) {
            Some(e) if now.saturating_sub(e.window_start_ms) < window_ms => e,
            // First access after expiry (or ever): fresh window.
            _ => WindowEntry {
                window_start_ms: now,
                count: 0,
            },
        };

        let reset_in_ms = window_ms.saturating_sub(now.saturating_sub(entry.window_start_ms));
        if entry.count >= max {
            counter!("rate_limit_rejected_total", "bucket" => bucket.to_string()).increment(1);
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_in_ms,
            };
        }

        let next = WindowEntry {
            window_start_ms: entry.window_start_ms,
            count: entry.count + 1,
        };
        self.store.set(&full_key, next);
        RateDecision {
            allowed: true,
            remaining: max - next.count,
            reset_in_ms,
        }
    }

    fn maybe_sweep(&self, now_ms: u64, window_ms: u64) {
        let n = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SWEEP_EVERY_CHECKS == 0 || self.store.len() > MAX_ENTRIES {
            self.store.evict_expired(now_ms, window_ms);
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
