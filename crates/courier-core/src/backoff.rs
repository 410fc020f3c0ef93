//! Reconnect backoff calculation.
//!
//! The k-th reconnect attempt (1-based) waits `min(base · 2^(k−1), cap)`.
//! A successful connect resets the attempt counter, so the series restarts
//! from `base` after any recovery.

use std::time::Duration;

/// Delay before the `attempt`-th reconnect (1-based).
///
/// `attempt == 0` is treated as the first attempt. The doubling saturates
/// well before the shift could overflow.
#[must_use]
pub fn reconnect_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 1u64 << exponent;
    let delay = base.saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX));
    delay.min(cap)
}
