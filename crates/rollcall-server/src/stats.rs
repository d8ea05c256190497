//! Read-only stats snapshot for the operational endpoint.
//!
//! Building a snapshot only reads counters and sizes; it never expires,
//! evicts or promotes anything.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_directory::{ClientRecord, GuestRecord};
use serde::Serialize;
use serde_json::Value;

use crate::cache::{BoundedTtlCache, CacheStats, SessionCache};
use crate::config::StatsConfig;
use crate::processing::{ProcessingRegistry, ProcessingStats};
use crate::rate_limit::{RateLimiter, RateLimiterStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Ratios for one cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheDerived {
    pub occupancy: f64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedStats {
    pub phone_cache: CacheDerived,
    pub guest_cache: CacheDerived,
    /// Smallest weighted free-slot count across the caches.
    pub estimated_remaining_capacity: f64,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub phone_cache: CacheStats,
    pub guest_cache: CacheStats,
    pub rate_limiter: RateLimiterStats,
    pub processing: ProcessingStats,
    pub session_active: bool,
    pub derived: DerivedStats,
    pub generated_at: DateTime<Utc>,
}

/// Composes the component stats into one snapshot.
pub struct StatsAggregator {
    phone_cache: Arc<BoundedTtlCache<Option<ClientRecord>>>,
    guest_cache: Arc<BoundedTtlCache<Option<GuestRecord>>>,
    rate_limiter: Arc<RateLimiter>,
    registry: Arc<ProcessingRegistry<Value>>,
    session: Arc<SessionCache>,
    config: StatsConfig,
}

impl StatsAggregator {
    pub fn new(
        phone_cache: Arc<BoundedTtlCache<Option<ClientRecord>>>,
        guest_cache: Arc<BoundedTtlCache<Option<GuestRecord>>>,
        rate_limiter: Arc<RateLimiter>,
        registry: Arc<ProcessingRegistry<Value>>,
        session: Arc<SessionCache>,
        config: StatsConfig,
    ) -> Self {
        Self {
            phone_cache,
            guest_cache,
            rate_limiter,
            registry,
            session,
            config,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let phone_cache = self.phone_cache.stats();
        let guest_cache = self.guest_cache.stats();
        let derived = derive(&phone_cache, &guest_cache, &self.config);

        StatsSnapshot {
            phone_cache,
            guest_cache,
            rate_limiter: self.rate_limiter.stats(),
            processing: self.registry.stats(),
            session_active: self.session.is_active(),
            derived,
            generated_at: Utc::now(),
        }
    }
}

fn derive(phone: &CacheStats, guest: &CacheStats, cfg: &StatsConfig) -> DerivedStats {
    let weighted = [
        (phone, cfg.phone_cache_weight),
        (guest, cfg.guest_cache_weight),
    ];

    let estimated_remaining_capacity = weighted
        .iter()
        .map(|(stats, weight)| stats.free_slots() as f64 * weight)
        .fold(f64::INFINITY, f64::min);

    let degraded = weighted
        .iter()
        .any(|(stats, _)| below_headroom(stats, cfg.degraded_headroom));

    DerivedStats {
        phone_cache: CacheDerived {
            occupancy: phone.occupancy(),
            hit_rate: phone.hit_rate(),
        },
        guest_cache: CacheDerived {
            occupancy: guest.occupancy(),
            hit_rate: guest.hit_rate(),
        },
        estimated_remaining_capacity,
        status: if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        },
    }
}

/// Whether fewer than `headroom * capacity` slots are free. Compared in
/// slots with a small tolerance so an exact boundary such as 10 free of 100
/// at 0.1 counts as enough headroom.
fn below_headroom(stats: &CacheStats, headroom: f64) -> bool {
    if stats.capacity == 0 {
        return true;
    }
    let required = headroom * stats.capacity as f64;
    required - stats.free_slots() as f64 > 1e-9
}
