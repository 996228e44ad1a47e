//! IBFT configuration.

use std::time::Duration;

/// Consensus driver configuration.
#[derive(Debug, Clone)]
pub struct IbftConfig {
    /// Wait for the first round at a height. Doubles with each consecutive
    /// round change at the same height.
    pub base_round_timeout: Duration,

    /// Ceiling for the exponential round-change backoff.
    pub max_round_timeout: Duration,

    /// Gas limit the proposer steers toward (bounded per block by the
    /// parent/1024 rule).
    pub gas_limit_target: u64,

    /// Maximum transactions included in a proposal.
    pub max_transactions_per_block: usize,

    /// Bound on buffered future-round messages; the oldest is dropped on
    /// overflow.
    pub message_buffer: usize,

    /// How far ahead a peer must be before the driver abandons the round
    /// and enters sync.
    pub sync_trigger_depth: u64,

    /// Poll interval while observing (non-validator) or waiting for the
    /// chain to move.
    pub observe_interval: Duration,
}

impl Default for IbftConfig {
    fn default() -> Self {
        Self {
            base_round_timeout: Duration::from_secs(10),
            max_round_timeout: Duration::from_secs(300),
            gas_limit_target: 8_000_000,
            max_transactions_per_block: 1024,
            message_buffer: 1024,
            sync_trigger_depth: 1,
            observe_interval: Duration::from_secs(1),
        }
    }
}

impl IbftConfig {
    /// Defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base round timeout.
    pub fn with_base_round_timeout(mut self, timeout: Duration) -> Self {
        self.base_round_timeout = timeout;
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_round_timeout(mut self, timeout: Duration) -> Self {
        self.max_round_timeout = timeout;
        self
    }

    /// Set the gas limit target.
    pub fn with_gas_limit_target(mut self, target: u64) -> Self {
        self.gas_limit_target = target;
        self
    }

    /// Timeout for `round` at the current height: base × 2^round, capped.
    pub fn round_timeout(&self, round: u64) -> Duration {
        let shift = round.min(16) as u32;
        let scaled = self
            .base_round_timeout
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_round_timeout);
        scaled.min(self.max_round_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_timeout_grows_exponentially() {
        let config = IbftConfig::default().with_base_round_timeout(Duration::from_secs(1));
        assert_eq!(config.round_timeout(0), Duration::from_secs(1));
        assert_eq!(config.round_timeout(1), Duration::from_secs(2));
        assert_eq!(config.round_timeout(3), Duration::from_secs(8));
    }

    #[test]
    fn round_timeout_is_capped() {
        let config = IbftConfig::default()
            .with_base_round_timeout(Duration::from_secs(1))
            .with_max_round_timeout(Duration::from_secs(4));
        assert_eq!(config.round_timeout(10), Duration::from_secs(4));
        // Shifts beyond the clamp cannot overflow.
        assert_eq!(config.round_timeout(u64::MAX), Duration::from_secs(4));
    }
}
