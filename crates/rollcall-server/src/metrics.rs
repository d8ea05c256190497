//! Prometheus metrics for the Rollcall server.
//!
//! This module provides:
//! - HTTP request metrics (count, latency)
//! - Cache metrics (hits, misses, evictions, entries) per cache
//! - Rate limiter denials
//! - Processing registry submissions and outcomes
//!
//! Recording before [`init_metrics`] is a no-op, so unit tests never need a
//! recorder.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "cache_evictions_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";

    // Rate limiting
    pub const RATE_LIMIT_DENIED_TOTAL: &str = "rate_limit_denied_total";

    // Processing registry
    pub const PROCESSING_JOBS_TOTAL: &str = "processing_jobs_total";
    pub const PROCESSING_ENTRIES: &str = "processing_entries";
}

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at server startup.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: the server renders /metrics/prometheus itself
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// HTTP Metrics
// =============================================================================

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let status_class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    };

    // Normalize path to avoid high cardinality
    let normalized_path = normalize_path(path);

    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => normalized_path.clone(),
        "status" => status.to_string(),
        "status_class" => status_class.to_string()
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => normalized_path
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Cache Metrics
// =============================================================================

pub fn record_cache_hit(cache: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "cache" => cache).increment(1);
}

pub fn record_cache_miss(cache: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "cache" => cache).increment(1);
}

/// Record entries dropped for `reason` ("capacity" or "ttl").
pub fn record_cache_eviction(cache: &'static str, reason: &'static str, count: u64) {
    counter!(names::CACHE_EVICTIONS_TOTAL, "cache" => cache, "reason" => reason).increment(count);
}

/// Set the number of cache entries.
pub fn set_cache_entries(cache: &'static str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "cache" => cache).set(count as f64);
}

// =============================================================================
// Rate Limiting / Processing Metrics
// =============================================================================

pub fn record_rate_limit_denied() {
    counter!(names::RATE_LIMIT_DENIED_TOTAL).increment(1);
}

/// Record a registry event: "submitted", "completed" or "failed".
pub fn record_processing_job(outcome: &str) {
    counter!(names::PROCESSING_JOBS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

pub fn set_processing_entries(processing: usize, completed: usize, failed: usize) {
    gauge!(names::PROCESSING_ENTRIES, "status" => "processing").set(processing as f64);
    gauge!(names::PROCESSING_ENTRIES, "status" => "completed").set(completed as f64);
    gauge!(names::PROCESSING_ENTRIES, "status" => "failed").set(failed as f64);
}

// =============================================================================
// Helpers
// =============================================================================

/// Normalize a path to reduce cardinality.
///
/// `/status/guest:evt:usr:abc` -> `/status/{key}`, and ID-like segments
/// elsewhere become `{id}`.
fn normalize_path(path: &str) -> String {
    let mut normalized: Vec<String> = Vec::new();

    for part in path.split('/') {
        let prev = normalized.last().map(String::as_str).unwrap_or("");
        if prev == "status" && !part.is_empty() {
            normalized.push("{key}".to_string());
        } else if is_likely_id(part) {
            normalized.push("{id}".to_string());
        } else {
            normalized.push(part.to_string());
        }
    }

    normalized.join("/")
}

/// Check if a string looks like an ID (UUID or numeric).
fn is_likely_id(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }

    // UUID pattern (with or without dashes)
    if s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4 {
        return true;
    }
    if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }

    // Numeric ID
    if s.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    // Long alphanumeric (likely an ID)
    s.len() > 12 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
