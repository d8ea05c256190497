//! Cache of the authenticated principal.
//!
//! Holds at most one principal per process. It is populated on login or on
//! the first successful principal lookup, and cleared on logout whether or
//! not the remote sign-out succeeded. After a logout the cache stays signed
//! out until the next `set_user`, so a remote session that survived a failed
//! sign-out is not picked up again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use rollcall_directory::Principal;
use tokio::time::Instant;

struct SessionEntry {
    principal: Arc<Principal>,
    cached_at: Instant,
}

/// Single-slot principal cache with a short TTL.
///
/// Reads are lock-free; a write replaces the whole slot atomically, so a
/// reader sees either the old principal or the new one.
pub struct SessionCache {
    slot: ArcSwapOption<SessionEntry>,
    signed_out: AtomicBool,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: ArcSwapOption::const_empty(),
            signed_out: AtomicBool::new(false),
            ttl,
        }
    }

    /// Stores `principal`, replacing any prior value.
    pub fn set_user(&self, principal: Principal) -> Arc<Principal> {
        let principal = Arc::new(principal);
        self.signed_out.store(false, Ordering::Release);
        self.slot.store(Some(Arc::new(SessionEntry {
            principal: Arc::clone(&principal),
            cached_at: Instant::now(),
        })));
        principal
    }

    /// Returns the cached principal unless it is older than the TTL.
    pub fn get(&self) -> Option<Arc<Principal>> {
        let guard = self.slot.load();
        let entry = guard.as_ref()?;
        if entry.cached_at.elapsed() > self.ttl {
            return None;
        }
        Some(Arc::clone(&entry.principal))
    }

    /// Drops the stored principal.
    pub fn clear(&self) {
        self.slot.store(None);
    }

    /// Drops the stored principal and marks the session signed out.
    pub fn sign_out(&self) {
        self.signed_out.store(true, Ordering::Release);
        self.slot.store(None);
    }

    /// Whether the last transition was a sign-out.
    pub fn is_signed_out(&self) -> bool {
        self.signed_out.load(Ordering::Acquire)
    }

    /// Whether a fresh principal is cached.
    pub fn is_active(&self) -> bool {
        self.get().is_some()
    }
}
