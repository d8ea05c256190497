//! In-process caches.
//!
//! ## Architecture
//!
//! - **Bounded TTL cache**: fixed-capacity LRU with per-entry expiry. One
//!   instance per lookup kind (phone lookups, guest duplicates).
//! - **Session cache**: single-slot cache of the signed-in principal.
//!
//! ```text
//! request → cache (hit) ──────────────→ response
//!             ↓ miss
//!           Directory (DB round trip) → cache.set → response
//! ```
//!
//! Caches are strictly an optimisation: a miss always falls through to the
//! collaborator, and a collaborator error is never cached.
//!
//! All state is per process. A multi-instance deployment does not share
//! cache contents; that needs an external key-value store.

pub mod bounded;
pub mod session;

pub use bounded::{BoundedTtlCache, CacheEntry, CacheStats};
pub use session::SessionCache;
