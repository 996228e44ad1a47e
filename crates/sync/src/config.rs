//! Sync configuration.

use std::time::Duration;

/// Configuration for the sync driver and service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Headers fetched per request; never above the protocol cap of 190.
    pub headers_per_request: i64,

    /// Bound on each peer's notify queue; the oldest entry is dropped on
    /// overflow.
    pub notify_queue_depth: usize,

    /// Blocks written per facade call during bulk sync.
    pub write_batch: usize,

    /// Pause between driver ticks when there is nothing to do.
    pub idle_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            headers_per_request: istria_messages::MAX_HEADERS_AMOUNT,
            notify_queue_depth: 64,
            write_batch: 32,
            idle_interval: Duration::from_millis(500),
        }
    }
}

impl SyncConfig {
    /// Defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-request header count (clamped to the protocol cap).
    pub fn with_headers_per_request(mut self, amount: i64) -> Self {
        self.headers_per_request = amount.min(istria_messages::MAX_HEADERS_AMOUNT);
        self
    }

    /// Set the notify queue depth.
    pub fn with_notify_queue_depth(mut self, depth: usize) -> Self {
        self.notify_queue_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_count_is_clamped() {
        let config = SyncConfig::default().with_headers_per_request(10_000);
        assert_eq!(config.headers_per_request, 190);
    }
}
