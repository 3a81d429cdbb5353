use std::time::Duration;

use rand::Rng;

/// `min(base * 2^attempt, cap)`, saturating instead of overflowing.
#[must_use]
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Uniform random delay in `[0, max]`.
#[must_use]
pub fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let mut rng = rand::rng();
    max.mul_f64(rng.random_range(0.0..=1.0))
}
