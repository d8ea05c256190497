pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod processing;
pub mod rate_limit;
pub mod server;
pub mod services;
pub mod state;
pub mod stats;
pub mod sweeper;

pub use cache::{BoundedTtlCache, CacheEntry, CacheStats, SessionCache};
pub use config::{AppConfig, CacheConfig, ConfigError, RateLimitConfig, ServerConfig};
pub use error::ApiError;
pub use observability::{apply_logging_level, init_tracing};
pub use processing::{
    PollStatus, ProcessingError, ProcessingLimits, ProcessingRegistry, ProcessingStatus,
    Transition,
};
pub use rate_limit::{Decision, RateLimiter};
pub use server::{RollcallServer, ServerBuilder, build_app};
pub use services::{AuthSession, GuestService, PhoneLookup, ServiceError};
pub use state::AppState;
pub use stats::{StatsAggregator, StatsSnapshot};
pub use sweeper::{Sweep, Sweeper, SweeperHandle};
