use std::time::Duration;

/// Delay before retrying after the given (0-indexed) failed attempt: `min(base * 2^attempt, cap)`.
pub fn delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    1u32.checked_shl(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}
