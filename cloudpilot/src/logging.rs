//! Diagnostic tracing to stderr.
//!
//! Reads `RUST_LOG`; defaults to `warn`. Executed commands are logged at
//! `info` on the `cloudpilot::audit` target, so an audit trail can be enabled
//! on its own:
//!
//! ```bash
//! RUST_LOG=cloudpilot::audit=info cloudpilot ask "list my buckets"
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Call once, at startup.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
