use std::time::Duration;

use rand::Rng;

use super::constants::{RECONNECT_CAP_EXPONENT, RECONNECT_DELAY_BASE, RECONNECT_DELAY_MAX};

/// Exponential reconnect delay with uniform jitter.
///
/// `delay_for(n)` lies in `[base * 2^k, base * 2^(k+1))` with
/// `k = min(n, cap_exponent)`, clamped to `max`. The ranges for successive
/// attempts do not overlap, so delays never shrink as attempts grow.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    cap_exponent: u32,
    max: Duration,
    attempt: u32,
}

impl BackoffPolicy {
    #[must_use]
    pub const fn new(base: Duration, cap_exponent: u32, max: Duration) -> Self {
        Self {
            base,
            cap_exponent,
            max,
            attempt: 0,
        }
    }

    /// Deterministic part of the delay for `attempt`, before jitter.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.cap_exponent);
        let base_ms = self.base.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(2_u64.saturating_pow(exponent));
        Duration::from_millis(delay_ms).min(self.max)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        let delay_ms = delay.as_millis() as u64;

        let jitter_ms = if delay_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..delay_ms)
        };

        delay
            .saturating_add(Duration::from_millis(jitter_ms))
            .min(self.max)
    }

    /// Returns the delay for the current attempt and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            RECONNECT_DELAY_BASE,
            RECONNECT_CAP_EXPONENT,
            RECONNECT_DELAY_MAX,
        )
    }
}
