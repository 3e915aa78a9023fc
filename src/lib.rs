//! AlgoDash Client Core
//!
//! The client-side core of the AlgoDash trading dashboard: typed REST
//! access to the platform backend (jobs, broker credentials, strategies,
//! historical data) and the real-time synchronization layer that mirrors
//! long-running server-side jobs over SSE or WebSocket, with reconnection,
//! deduplication, partial-result handling, and a REST-polling fallback.
//!
//! A view layer mounts a subscription with resource identifiers and an
//! auth token, reads `{data, loading, error, progress}` snapshots from a
//! watch channel, and tears the subscription down on unmount. All domain
//! logic (backtest execution, broker OAuth handling, strategy runtime)
//! lives server-side; this crate only mirrors it.

pub mod api;
pub mod config;
pub mod device;
pub mod error;
pub mod models;
pub mod stream;
pub mod sync;

pub use api::ApiClient;
pub use config::ClientConfig;
pub use error::{AppError, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for binaries and integration tests. Honors
/// `RUST_LOG`, defaulting to debug output for this crate.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "algodash_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
