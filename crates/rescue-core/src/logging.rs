//! Process-wide `tracing` setup.

use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor the configured level parses.
pub const FALLBACK_LEVEL: &str = "info";

/// Resolve the log filter: `RUST_LOG` first, then `level`, then
/// [`FALLBACK_LEVEL`].
pub fn build_filter(level: &str) -> EnvFilter {
    resolve_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), level)
}

fn resolve_filter(env: Option<&str>, level: &str) -> EnvFilter {
    env.filter(|d| !d.is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new(FALLBACK_LEVEL))
}

/// Install the global subscriber: compact lines on stderr, with targets.
///
/// Returns `false` if a subscriber was already installed; the earlier one
/// stays in place.
pub fn init_subscriber(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .is_ok()
}
