//! Tracing setup for integration harnesses and simulations

use crate::VaultConfig;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_directive`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Install the fmt subscriber at the config's `log_level` unless `RUST_LOG` is set
pub fn init_tracing_from(config: &VaultConfig) {
    init_tracing(&config.log_level);
}
