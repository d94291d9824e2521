//! Process-wide rolling health signal per provider

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

const NEVER: i64 = i64::MIN;

#[derive(Debug)]
struct ProviderHealth {
    consecutive_failures: AtomicU32,
    last_success_us: AtomicI64,
    last_failure_us: AtomicI64,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            last_success_us: AtomicI64::new(NEVER),
            last_failure_us: AtomicI64::new(NEVER),
        }
    }
}

/// Point-in-time copy of one provider's health
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

/// A provider as seen by the selector
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderInfo {
    pub id: String,
    /// Models this provider is known to serve
    pub models: BTreeSet<String>,
    /// Higher is preferred
    pub priority: u32,
    pub health: HealthSnapshot,
}

/// Concurrent registry of provider health, shared by every session of a client.
///
/// Updates are per-field atomics, so concurrent attempts may interleave but
/// never corrupt a record.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    providers: DashMap<String, Arc<ProviderHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, provider: &str) -> Arc<ProviderHealth> {
        if let Some(existing) = self.providers.get(provider) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.providers
                .entry(provider.to_string())
                .or_default()
                .value(),
        )
    }

    pub fn record_success(&self, provider: &str) {
        self.record_success_at(provider, Utc::now());
    }

    pub fn record_success_at(&self, provider: &str, at: DateTime<Utc>) {
        let health = self.entry(provider);
        health.consecutive_failures.store(0, Ordering::Relaxed);
        health
            .last_success_us
            .store(at.timestamp_micros(), Ordering::Relaxed);
        debug!(provider, "provider health: success");
    }

    pub fn record_failure(&self, provider: &str) {
        self.record_failure_at(provider, Utc::now());
    }

    pub fn record_failure_at(&self, provider: &str, at: DateTime<Utc>) {
        let health = self.entry(provider);
        let failures = health.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        health
            .last_failure_us
            .store(at.timestamp_micros(), Ordering::Relaxed);
        debug!(provider, consecutive_failures = failures, "provider health: failure");
    }

    /// Health of `provider`; unknown providers report a clean record
    pub fn snapshot(&self, provider: &str) -> HealthSnapshot {
        match self.providers.get(provider) {
            Some(health) => HealthSnapshot {
                consecutive_failures: health.consecutive_failures.load(Ordering::Relaxed),
                last_success: from_micros(health.last_success_us.load(Ordering::Relaxed)),
                last_failure: from_micros(health.last_failure_us.load(Ordering::Relaxed)),
            },
            None => HealthSnapshot::default(),
        }
    }
}

fn from_micros(us: i64) -> Option<DateTime<Utc>> {
    if us == NEVER {
        return None;
    }
    let secs = us.div_euclid(1_000_000);
    let nanos = (us.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}
