//! Background job registry for poll-based async responses.
//!
//! Slow work (guest creation with QR generation) runs in a background task
//! while the client polls a status endpoint with the key it was handed.
//!
//! ## Lifecycle
//!
//! ```text
//! submit(key) → Processing ──complete(key, result)──→ Completed
//!                          └─fail(key, error)────────→ Failed
//! ```
//!
//! `Completed` and `Failed` are terminal; only deletion leaves them.
//!
//! ## Expiry
//!
//! - `poll` reports an entry older than `expiry_ceiling` as gone
//!   ([`PollStatus::Expired`]) and deletes it, whatever its status.
//! - `cleanup` drops `Processing` entries older than `processing_timeout`
//!   (abandoned workers) and terminal entries whose result has been
//!   available for longer than `terminal_grace`.
//!
//! ## Writers
//!
//! Each key has exactly one writer: the worker spawned for the submission.
//! This is a convention, not a lock. Terminal writes are idempotent, so a
//! stray second `complete`/`fail` is logged and ignored. Each entry is
//! mutated under its `DashMap` shard lock, so pollers see the state either
//! before or after a transition, never in between.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ProcessingConfig;

/// Errors from registry misuse.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Processing key already registered: {0}")]
    DuplicateKey(String),
}

/// Entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessingStatus::Processing)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// State of one submitted unit of work.
#[derive(Debug, Clone)]
pub struct ProcessingEntry<T> {
    pub key: String,
    pub status: ProcessingStatus,
    pub result: Option<T>,
    pub error: Option<String>,
    pub created_at: Instant,
    pub finished_at: Option<Instant>,
    pub submitted_at: DateTime<Utc>,
}

impl<T> ProcessingEntry<T> {
    fn new(key: String) -> Self {
        Self {
            key,
            status: ProcessingStatus::Processing,
            result: None,
            error: None,
            created_at: Instant::now(),
            finished_at: None,
            submitted_at: Utc::now(),
        }
    }

    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// What a poller sees for a key.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    /// The key was never registered, or has already been swept.
    NotFound,
    /// The entry outlived the expiry ceiling and was removed by this poll.
    /// No answer will ever arrive on this key.
    Expired,
    Processing { elapsed: Duration },
    Completed { result: T, elapsed: Duration },
    Failed { error: String, elapsed: Duration },
}

impl<T> PollStatus<T> {
    /// `true` for both flavours of "no answer on this key".
    pub fn is_gone(&self) -> bool {
        matches!(self, PollStatus::NotFound | PollStatus::Expired)
    }
}

/// Effect of a `complete` or `fail` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    AlreadyTerminal,
    Missing,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub submitted_total: u64,
    pub expired_total: u64,
}

/// Age limits applied by `poll` and `cleanup`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingLimits {
    pub expiry_ceiling: Duration,
    pub processing_timeout: Duration,
    pub terminal_grace: Duration,
}

impl Default for ProcessingLimits {
    fn default() -> Self {
        Self {
            expiry_ceiling: Duration::from_secs(5 * 60),
            processing_timeout: Duration::from_secs(10 * 60),
            terminal_grace: Duration::from_secs(5 * 60),
        }
    }
}

impl From<&ProcessingConfig> for ProcessingLimits {
    fn from(cfg: &ProcessingConfig) -> Self {
        Self {
            expiry_ceiling: Duration::from_millis(cfg.expiry_ceiling_ms),
            processing_timeout: Duration::from_millis(cfg.processing_timeout_ms),
            terminal_grace: Duration::from_millis(cfg.terminal_grace_ms),
        }
    }
}

/// Build an unguessable correlation key for one submission.
///
/// The readable prefix keeps logs greppable; the random suffix makes the key
/// unique per submission.
pub fn new_processing_key(scope: &str, event_id: &str, client_user_id: &str) -> String {
    format!(
        "{scope}:{event_id}:{client_user_id}:{}",
        Uuid::new_v4().simple()
    )
}

/// Process-wide map from correlation key to job state.
pub struct ProcessingRegistry<T> {
    entries: DashMap<String, ProcessingEntry<T>>,
    limits: ProcessingLimits,
    submitted: AtomicU64,
    expired: AtomicU64,
}

impl<T> ProcessingRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(limits: ProcessingLimits) -> Self {
        Self {
            entries: DashMap::new(),
            limits,
            submitted: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> ProcessingLimits {
        self.limits
    }

    /// Register `key` in the `Processing` state.
    ///
    /// Call this before starting the work so a poll arriving immediately
    /// finds the entry.
    pub fn submit(&self, key: impl Into<String>) -> Result<String, ProcessingError> {
        let key = key.into();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => return Err(ProcessingError::DuplicateKey(key)),
            Entry::Vacant(slot) => {
                slot.insert(ProcessingEntry::new(key.clone()));
            }
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_processing_job("submitted");
        tracing::info!(processing_key = %key, "processing entry created");
        Ok(key)
    }

    /// Register `key` and run `work` in a background task that records its
    /// outcome.
    pub fn spawn<F, E>(
        self: &Arc<Self>,
        key: impl Into<String>,
        work: F,
    ) -> Result<(String, JoinHandle<()>), ProcessingError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let key = self.submit(key)?;
        let registry = Arc::clone(self);
        let worker_key = key.clone();

        let handle = tokio::spawn(async move {
            tracing::debug!(processing_key = %worker_key, "starting background work");
            match work.await {
                Ok(result) => {
                    registry.complete(&worker_key, result);
                }
                Err(e) => {
                    registry.fail(&worker_key, e.to_string());
                }
            }
        });

        Ok((key, handle))
    }

    /// Move `key` to `Completed` with `result`.
    pub fn complete(&self, key: &str, result: T) -> Transition {
        self.finish(key, ProcessingStatus::Completed, Some(result), None)
    }

    /// Move `key` to `Failed` with `error`.
    pub fn fail(&self, key: &str, error: impl Into<String>) -> Transition {
        self.finish(key, ProcessingStatus::Failed, None, Some(error.into()))
    }

    fn finish(
        &self,
        key: &str,
        status: ProcessingStatus,
        result: Option<T>,
        error: Option<String>,
    ) -> Transition {
        let Some(mut entry) = self.entries.get_mut(key) else {
            tracing::warn!(processing_key = %key, %status, "transition on unknown processing key ignored");
            return Transition::Missing;
        };

        if entry.status.is_terminal() {
            tracing::warn!(
                processing_key = %key,
                current = %entry.status,
                requested = %status,
                "processing entry already terminal, transition ignored"
            );
            return Transition::AlreadyTerminal;
        }

        entry.status = status;
        entry.result = result;
        entry.finished_at = Some(Instant::now());
        let elapsed_ms = entry.age(Instant::now()).as_millis() as u64;
        match status {
            ProcessingStatus::Failed => {
                tracing::error!(
                    processing_key = %key,
                    elapsed_ms,
                    error = error.as_deref().unwrap_or(""),
                    "processing failed"
                );
            }
            _ => {
                tracing::info!(processing_key = %key, elapsed_ms, "processing completed");
            }
        }
        entry.error = error;
        drop(entry);

        crate::metrics::record_processing_job(&status.to_string());
        Transition::Applied
    }

    /// Current state of `key` as seen by a poller.
    pub fn poll(&self, key: &str) -> PollStatus<T> {
        let now = Instant::now();

        let status = match self.entries.get(key) {
            None => return PollStatus::NotFound,
            Some(entry) => {
                let elapsed = entry.age(now);
                if elapsed > self.limits.expiry_ceiling {
                    None
                } else {
                    Some(match entry.status {
                        ProcessingStatus::Processing => PollStatus::Processing { elapsed },
                        ProcessingStatus::Completed => match entry.result.clone() {
                            Some(result) => PollStatus::Completed { result, elapsed },
                            None => PollStatus::Failed {
                                error: "completed without a result".to_string(),
                                elapsed,
                            },
                        },
                        ProcessingStatus::Failed => PollStatus::Failed {
                            error: entry.error.clone().unwrap_or_default(),
                            elapsed,
                        },
                    })
                }
            }
        };

        match status {
            Some(status) => status,
            None => {
                if self.entries.remove(key).is_some() {
                    self.expired.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(processing_key = %key, "processing entry expired on poll");
                }
                PollStatus::Expired
            }
        }
    }

    /// Whether `key` is registered and still `Processing`.
    pub fn is_processing(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.status == ProcessingStatus::Processing)
    }

    /// Drop abandoned and long-finished entries. Returns how many were
    /// removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let limits = self.limits;
        let before = self.entries.len();

        self.entries.retain(|_, entry| match entry.finished_at {
            None => entry.age(now) <= limits.processing_timeout,
            Some(finished) => now.saturating_duration_since(finished) <= limits.terminal_grace,
        });

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "processing entries swept");
        }
        let stats = self.stats();
        crate::metrics::set_processing_entries(stats.processing, stats.completed, stats.failed);
        removed
    }

    pub fn stats(&self) -> ProcessingStats {
        let mut stats = ProcessingStats {
            submitted_total: self.submitted.load(Ordering::Relaxed),
            expired_total: self.expired.load(Ordering::Relaxed),
            ..Default::default()
        };
        for entry in self.entries.iter() {
            stats.total += 1;
            match entry.status {
                ProcessingStatus::Processing => stats.processing += 1,
                ProcessingStatus::Completed => stats.completed += 1,
                ProcessingStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn registry() -> ProcessingRegistry<Value> {
        ProcessingRegistry::new(ProcessingLimits::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_then_complete_scenario() {
        let reg = registry();
        reg.submit("k1").unwrap();
        assert!(matches!(reg.poll("k1"), PollStatus::Processing { .. }));

        assert_eq!(reg.complete("k1", json!({"id": "g1"})), Transition::Applied);
        for _ in 0..3 {
            match reg.poll("k1") {
                PollStatus::Completed { result, .. } => assert_eq!(result, json!({"id": "g1"})),
                other => panic!("expected completed, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_key_is_not_found() {
        let reg = registry();
        assert_eq!(reg.poll("nope"), PollStatus::NotFound);
        assert!(reg.poll("nope").is_gone());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_state_is_immutable() {
        let reg = registry();
        reg.submit("k").unwrap();
        assert_eq!(reg.complete("k", json!(1)), Transition::Applied);
        assert_eq!(reg.fail("k", "late failure"), Transition::AlreadyTerminal);
        assert!(matches!(reg.poll("k"), PollStatus::Completed { .. }));

        reg.submit("j").unwrap();
        assert_eq!(reg.fail("j", "boom"), Transition::Applied);
        assert_eq!(reg.complete("j", json!(2)), Transition::AlreadyTerminal);
        match reg.poll("j") {
            PollStatus::Failed { error, .. } => assert_eq!(error, "boom"),
            other => panic!("expected failed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_on_missing_key_is_harmless() {
        let reg = registry();
        assert_eq!(reg.complete("ghost", json!(null)), Transition::Missing);
        assert_eq!(reg.fail("ghost", "x"), Transition::Missing);
        assert_eq!(reg.stats().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submit_rejected() {
        let reg = registry();
        reg.submit("k").unwrap();
        assert!(matches!(
            reg.submit("k"),
            Err(ProcessingError::DuplicateKey(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_past_ceiling_expires_entry() {
        let reg = registry();
        reg.submit("slow").unwrap();

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert!(matches!(reg.poll("slow"), PollStatus::Processing { .. }));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(reg.poll("slow"), PollStatus::Expired);
        assert_eq!(reg.poll("slow"), PollStatus::NotFound);
        assert_eq!(reg.stats().expired_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_applies_to_terminal_entries() {
        let reg = registry();
        reg.submit("done").unwrap();
        reg.complete("done", json!("ok"));

        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        assert_eq!(reg.poll("done"), PollStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_sweeps_abandoned_and_finished() {
        let limits = ProcessingLimits {
            expiry_ceiling: Duration::from_secs(300),
            processing_timeout: Duration::from_secs(600),
            terminal_grace: Duration::from_secs(60),
        };
        let reg: ProcessingRegistry<Value> = ProcessingRegistry::new(limits);

        reg.submit("abandoned").unwrap();
        reg.submit("finished").unwrap();
        reg.complete("finished", json!(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        reg.submit("fresh").unwrap();
        assert_eq!(reg.cleanup(), 1);
        assert!(reg.is_processing("abandoned"));

        tokio::time::advance(Duration::from_secs(540)).await;
        assert_eq!(reg.cleanup(), 1);
        assert!(!reg.is_processing("abandoned"));
        assert!(reg.is_processing("fresh"));
        assert_eq!(reg.cleanup(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_counts_by_status() {
        let reg = registry();
        reg.submit("a").unwrap();
        reg.submit("b").unwrap();
        reg.submit("c").unwrap();
        reg.complete("b", json!(1));
        reg.fail("c", "x");

        let stats = reg.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.submitted_total, 3);
    }

    #[tokio::test]
    async fn test_spawn_records_outcome() {
        let reg = Arc::new(registry());

        let (ok_key, handle) = reg
            .spawn("ok", async { Ok::<_, String>(json!({"id": "g1"})) })
            .unwrap();
        handle.await.unwrap();
        assert!(matches!(reg.poll(&ok_key), PollStatus::Completed { .. }));

        let (err_key, handle) = reg
            .spawn("err", async { Err::<Value, _>("db unavailable") })
            .unwrap();
        handle.await.unwrap();
        match reg.poll(&err_key) {
            PollStatus::Failed { error, .. } => assert_eq!(error, "db unavailable"),
            other => panic!("expected failed, got {other:?}"),
        }
    }

    #[test]
    fn test_processing_keys_are_unique() {
        let a = new_processing_key("guest", "evt", "usr");
        let b = new_processing_key("guest", "evt", "usr");
        assert_ne!(a, b);
        assert!(a.starts_with("guest:evt:usr:"));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ProcessingStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(ProcessingStatus::Failed.to_string(), "failed");
    }
}
