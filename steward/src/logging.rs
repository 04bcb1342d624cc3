//! Diagnostic tracing for the engine.
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr.
//! - **Performance ledger (`io/ledger`)**: persisted per-workspace history of
//!   model decisions, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `warn`, or `info` with
/// `verbose`.
///
/// # Example
/// ```bash
/// RUST_LOG=steward=debug steward run --goal "summarize sales.csv"
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
