//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered at `level` for this crate.
///
/// `RUST_LOG` takes precedence when set. Returns `false` if a global
/// subscriber was already installed, so calling this twice is harmless.
pub fn init(level: &str) -> bool {
    let filter_str = format!("surefire_core={}", level.to_ascii_lowercase());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
