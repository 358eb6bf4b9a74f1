//! Spacing between upstream retries.

use std::time::Duration;

use rand::Rng;

use crate::config::SearchConfig;

/// Share of the delay that may be added as random spread.
const SPREAD: f64 = 0.1;

/// Wait before retrying after failed attempt number `attempt` (1-based).
///
/// Doubles from `base` per failed attempt, never exceeds `ceiling` before
/// the spread is added, and returns zero for attempt 0.
pub fn retry_delay(attempt: u32, base: Duration, ceiling: Duration) -> Duration {
    let Some(doublings) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };
    let step = 1u32.checked_shl(doublings).unwrap_or(u32::MAX);
    let delay = base.saturating_mul(step).min(ceiling);
    delay + delay.mul_f64(rand::thread_rng().gen_range(0.0..SPREAD))
}

/// [`retry_delay`] with the delays configured for the search upstream.
pub fn upstream_retry_delay(attempt: u32, config: &SearchConfig) -> Duration {
    retry_delay(attempt, config.base_delay(), config.max_delay())
}
