use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use super::config::{ControllerConfig, RetryConfig};

/// Exponential backoff with deterministic jitter.
///
/// Attempt `n` anchors at `base * 2^(n-1)` capped at `max`, then moves
/// within a jitter window derived from a hash of the caller's seed, so the
/// same (seed, attempt) pair always yields the same delay.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    jitter_ratio: f32,
    jitter_min_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_ratio: 0.0,
            jitter_min_ms: 0,
        }
    }

    pub fn with_jitter(mut self, ratio: f32, min_ms: u64) -> Self {
        self.jitter_ratio = ratio;
        self.jitter_min_ms = min_ms;
        self
    }

    pub fn from_retry(retry: &RetryConfig) -> Self {
        Self::new(retry.backoff_base_ms, retry.backoff_max_ms)
            .with_jitter(retry.jitter_ratio, retry.jitter_min_ms)
    }

    /// Requeue backoff for failed reconcile passes; no jitter.
    pub fn from_controller(controller: &ControllerConfig) -> Self {
        Self::new(controller.error_backoff_base_ms, controller.error_backoff_max_ms)
    }

    pub fn delay<S: Hash + ?Sized>(&self, attempt: u16, seed: &S) -> Duration {
        let anchor = self.base_delay_ms(attempt);
        Duration::from_millis(self.jittered(anchor, attempt, seed))
    }

    fn base_delay_ms(&self, attempt: u16) -> u64 {
        if attempt == 0 {
            return 0;
        }

        let exp = (attempt.saturating_sub(1)).min(62) as i32;
        let scaled = (self.base_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.max_ms as f64);
        capped.max(0.0) as u64
    }

    fn jittered<S: Hash + ?Sized>(&self, anchor_ms: u64, attempt: u16, seed: &S) -> u64 {
        if anchor_ms == 0 || (self.jitter_ratio <= 0.0 && self.jitter_min_ms == 0) {
            return anchor_ms;
        }

        let jitter_ratio = f64::from(self.jitter_ratio.max(0.0));
        let jitter_span = ((anchor_ms as f64) * jitter_ratio)
            .max(self.jitter_min_ms as f64)
            .min(self.max_ms as f64);

        let lower = 0f64.max(anchor_ms as f64 - jitter_span);
        let upper = (anchor_ms as f64 + jitter_span).min(self.max_ms as f64);
        if upper <= lower {
            return lower.round() as u64;
        }

        let unit = deterministic_unit(seed, attempt);
        let jittered = lower + (upper - lower) * unit;
        jittered.round() as u64
    }
}

fn deterministic_unit<S: Hash + ?Sized>(seed: &S, attempt: u16) -> f64 {
    let mut hasher = DefaultHasher::default();
    seed.hash(&mut hasher);
    attempt.hash(&mut hasher);
    let bits = hasher.finish();
    (bits as f64) / (u64::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let backoff = Backoff::new(100, 1_000);
        let delays: Vec<u128> = (0..6)
            .map(|a| backoff.delay(a, "key").as_millis())
            .collect();
        assert_eq!(delays, [0, 100, 200, 400, 800, 1_000]);
    }

    #[test]
    fn jitter_is_bounded_and_deterministic() {
        let backoff = Backoff::new(1_000, 60_000).with_jitter(0.25, 50);
        for attempt in 1..8u16 {
            let anchor = 1_000u64 * 2u64.pow(u32::from(attempt) - 1);
            let anchor = anchor.min(60_000);
            let delay = backoff.delay(attempt, "scan/a").as_millis() as u64;
            let span = ((anchor as f64) * 0.25).max(50.0) as u64;
            assert!(delay + span >= anchor, "attempt {attempt}: {delay}");
            assert!(delay <= (anchor + span).min(60_000), "attempt {attempt}: {delay}");
            assert_eq!(delay, backoff.delay(attempt, "scan/a").as_millis() as u64);
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let backoff = Backoff::new(1_000, 5_000);
        assert_eq!(backoff.delay(u16::MAX, &0u8), Duration::from_millis(5_000));
    }
}
