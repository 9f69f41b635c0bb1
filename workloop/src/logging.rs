//! Diagnostic tracing for the workloop binary.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG` (default `warn`). It is
//! separate from the product artifacts in `.workloop/` (session file, progress
//! log), which are always written regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Call once, from `main`.
///
/// ```bash
/// RUST_LOG=workloop=debug workloop afk --max 3
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
