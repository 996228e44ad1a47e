//! Block gas limit policy.

/// How far the gas limit may move per block: parent / 1024.
const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Floor below which the limit never drops.
const MIN_GAS_LIMIT: u64 = 5000;

/// Compute the gas limit for a child block: step from `parent_limit`
/// toward `target` by at most `parent_limit / 1024`.
pub fn calc_gas_limit(parent_limit: u64, target: u64) -> u64 {
    let delta = (parent_limit / GAS_LIMIT_BOUND_DIVISOR).max(1);
    let next = if target > parent_limit {
        parent_limit.saturating_add(delta).min(target)
    } else {
        parent_limit.saturating_sub(delta).max(target)
    };
    next.max(MIN_GAS_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_toward_target() {
        let parent = 8_000_000;
        let up = calc_gas_limit(parent, 10_000_000);
        assert_eq!(up, parent + parent / 1024);

        let down = calc_gas_limit(parent, 6_000_000);
        assert_eq!(down, parent - parent / 1024);
    }

    #[test]
    fn clamps_at_target() {
        assert_eq!(calc_gas_limit(8_000_000, 8_000_100), 8_000_100);
        assert_eq!(calc_gas_limit(8_000_000, 8_000_000), 8_000_000);
    }

    #[test]
    fn respects_floor() {
        assert_eq!(calc_gas_limit(5000, 0), MIN_GAS_LIMIT);
    }
}
