//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use rollcall_directory::{AuthProvider, ClientRecord, Directory, GuestRecord};
use serde_json::Value;

use crate::cache::{BoundedTtlCache, SessionCache};
use crate::config::{AppConfig, RateLimitConfig};
use crate::processing::{ProcessingLimits, ProcessingRegistry};
use crate::rate_limit::RateLimiter;
use crate::services::{AuthSession, GuestService, PhoneLookup};
use crate::stats::StatsAggregator;
use crate::sweeper::Sweep;

#[derive(Clone)]
pub struct AppState {
    pub phones: Arc<PhoneLookup>,
    pub guests: Arc<GuestService>,
    pub auth: Arc<AuthSession>,
    pub registry: Arc<ProcessingRegistry<Value>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub stats: Arc<StatsAggregator>,
    pub rate_limit: RateLimitConfig,
    /// Prefix for absolute status URLs
    pub base_url: String,
    phone_cache: Arc<BoundedTtlCache<Option<ClientRecord>>>,
    guest_cache: Arc<BoundedTtlCache<Option<GuestRecord>>>,
}

impl AppState {
    /// Build every in-process component from config, wired to the given
    /// collaborators.
    pub fn new(
        cfg: &AppConfig,
        directory: Arc<dyn Directory>,
        auth_provider: Arc<dyn AuthProvider>,
    ) -> Self {
        let phone_cache = Arc::new(BoundedTtlCache::new(
            "phone",
            cfg.cache.phone_capacity,
            cfg.cache.phone_ttl(),
        ));
        let guest_cache = Arc::new(BoundedTtlCache::new(
            "guest",
            cfg.cache.guest_capacity,
            cfg.cache.guest_ttl(),
        ));
        let session = Arc::new(SessionCache::new(cfg.session.ttl()));
        let registry = Arc::new(ProcessingRegistry::new(ProcessingLimits::from(
            &cfg.processing,
        )));
        let rate_limiter = Arc::new(RateLimiter::from_config(&cfg.rate_limit));

        let stats = StatsAggregator::new(
            Arc::clone(&phone_cache),
            Arc::clone(&guest_cache),
            Arc::clone(&rate_limiter),
            Arc::clone(&registry),
            Arc::clone(&session),
            cfg.stats.clone(),
        );

        Self {
            phones: Arc::new(PhoneLookup::new(
                Arc::clone(&phone_cache),
                Arc::clone(&directory),
            )),
            guests: Arc::new(GuestService::new(
                Arc::clone(&guest_cache),
                directory,
                Arc::clone(&registry),
            )),
            auth: Arc::new(AuthSession::new(session, auth_provider)),
            registry,
            rate_limiter,
            stats: Arc::new(stats),
            rate_limit: cfg.rate_limit.clone(),
            base_url: cfg.base_url(),
            phone_cache,
            guest_cache,
        }
    }

    /// Sweep targets with their configured intervals.
    pub fn sweep_targets(&self, cfg: &AppConfig) -> Vec<(Arc<dyn Sweep>, Duration)> {
        vec![
            (
                Arc::clone(&self.phone_cache) as Arc<dyn Sweep>,
                cfg.cache.cleanup_interval(),
            ),
            (
                Arc::clone(&self.guest_cache) as Arc<dyn Sweep>,
                cfg.cache.cleanup_interval(),
            ),
            (
                Arc::clone(&self.rate_limiter) as Arc<dyn Sweep>,
                cfg.rate_limit.sweep_interval(),
            ),
            (
                Arc::clone(&self.registry) as Arc<dyn Sweep>,
                cfg.processing.cleanup_interval(),
            ),
        ]
    }
}
