// Tracing initialization with a configurable and reloadable log level.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Install the global subscriber. Later calls are ignored.
pub fn init_tracing(logging: &LoggingConfig) {
    // Prefer RUST_LOG from env, otherwise use the configured level.
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(&logging.level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let json = logging.format.eq_ignore_ascii_case("json");
    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .try_init();
}

/// Apply a new logging level at runtime. Returns `false` when tracing was
/// never initialized or the level does not parse.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = LOG_RELOAD_HANDLE.get() else {
        return false;
    };
    let Ok(filter) = EnvFilter::try_new(level) else {
        tracing::warn!(level, "ignoring unparsable log level");
        return false;
    };
    handle.modify(|f| *f = filter).is_ok()
}
