//! Opt-in tracing hook.
//!
//! Diagnostics stay silent unless the `TRACE` environment variable is set,
//! mirroring how the shim is operated in containers: the orchestrator flips
//! one flag to get timestamped, prefixed lines from both halves. Not part of
//! the functional contract.

use tracing_subscriber::EnvFilter;

/// Installs a subscriber printing all shim events with uptime timestamps if
/// `TRACE` is set to `1`/`true`/`yes`/`y` (case-insensitive). A no-op
/// otherwise, and safe to call more than once.
pub fn init() {
    if !enabled() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quicshim=trace"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_target(false)
        .try_init();
}

fn enabled() -> bool {
    match std::env::var("TRACE") {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        Err(_) => false,
    }
}
