//! Tracing setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter; the default keeps the node's
/// own crates at `info` and the rest at `warn`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("warn,istria_node=info,istria_ibft=info,istria_sync=info,istria_chain=info")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
