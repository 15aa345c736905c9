//! Diagnostic tracing for the bridge.
//!
//! - **Tracing (this module)**: diagnostics on stderr, filtered by `RUST_LOG`
//!   or the CLI `-v` count. Not persisted.
//! - **Progress lines** printed by the CLI and **transcripts**
//!   (`io/transcript`) are product output and ignore the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbosity` picks the filter
/// (0 = warn, 1 = bridge info, 2+ = bridge debug).
///
/// ```bash
/// RUST_LOG=bridge=debug bridge run conversation.toml
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,bridge=info",
        _ => "info,bridge=debug",
    }
}
