//! Tracing initialization for hosts
//!
//! The bus and agents log through `tracing`; hosts that have no subscriber
//! of their own can install one here. Filtering honors `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Installs a global tracing subscriber with `RUST_LOG` filtering
///
/// Falls back to `info` when `RUST_LOG` is unset. Calling this twice is
/// harmless; the second call leaves the first subscriber in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

/// Installs a global tracing subscriber emitting JSON lines
///
/// Intended for hosts shipping logs to a collector. Filtering honors
/// `RUST_LOG` with an `info` fallback.
pub fn init_json_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init();
}
