//! The backoff algorithm (§4.4).
//!
//! `delay = min(max, max(base * 2^(n-1), retry_after_hint) + uniform(0, jitter_ratio))`
//!
//! Jitter is **absolute**, not proportional to the baseline: this mirrors
//! `randomizer(0, self._jitter)` in the original request-queue
//! implementation this dispatcher replaces, rather than scaling jitter with
//! the (potentially large) exponential baseline. See SPEC_FULL.md §4.4 for
//! the rationale.

use std::sync::Arc;
use std::time::Duration;

/// A source of randomness for jitter, injectable for deterministic tests.
///
/// Returns a value in `[low, high)`. The default implementation uses
/// `rand::rng()`.
pub type Randomizer = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Builds the default randomizer, backed by `rand`.
pub fn default_randomizer() -> Randomizer {
    Arc::new(|low: f64, high: f64| {
        if high <= low {
            return low;
        }
        use rand::Rng;
        rand::rng().random_range(low..high)
    })
}

/// Configuration for the exponential backoff with absolute jitter.
#[derive(Clone)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
    randomizer: Randomizer,
}

impl BackoffPolicy {
    /// Creates a new backoff policy.
    ///
    /// `jitter_ratio` is a duration in seconds: the maximum amount of
    /// absolute jitter added on top of the computed baseline, not a
    /// proportion of it.
    pub fn new(base: Duration, max: Duration, jitter_ratio: f64, randomizer: Randomizer) -> Self {
        Self {
            base,
            max,
            jitter_ratio: jitter_ratio.max(0.0),
            randomizer,
        }
    }

    /// Computes the delay for the given 1-indexed `consecutive_backoffs`
    /// count and optional server-provided `retry_after_hint` (seconds).
    ///
    /// `delay` is always `<= self.max`.
    pub fn compute_delay(&self, consecutive_backoffs: u32, retry_after_hint: Option<f64>) -> Duration {
        let exponent = consecutive_backoffs.saturating_sub(1);
        let exp = self.base.as_secs_f64() * 2f64.powi(exponent as i32);
        let baseline = exp.max(retry_after_hint.unwrap_or(0.0));

        let jitter = (self.randomizer)(0.0, self.jitter_ratio);
        let delay = baseline + jitter;

        let max_secs = self.max.as_secs_f64();
        Duration::from_secs_f64(delay.min(max_secs).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn fixed_randomizer(value: f64) -> Randomizer {
        Arc::new(move |_low, _high| value)
    }

    #[test]
    fn exponential_growth_with_zero_jitter() {
        let policy = BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(30),
            0.0,
            fixed_randomizer(0.0),
        );

        assert_eq!(policy.compute_delay(1, None), Duration::from_millis(100));
        assert_eq!(policy.compute_delay(2, None), Duration::from_millis(200));
        assert_eq!(policy.compute_delay(3, None), Duration::from_millis(400));
        assert_eq!(policy.compute_delay(4, None), Duration::from_millis(800));
    }

    #[test]
    fn capped_at_max() {
        let policy = BackoffPolicy::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            0.0,
            fixed_randomizer(0.0),
        );

        assert_eq!(policy.compute_delay(10, None), Duration::from_secs(5));
    }

    #[test]
    fn retry_after_hint_can_exceed_exponential_baseline() {
        let policy = BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(30),
            0.0,
            fixed_randomizer(0.0),
        );

        // exponential baseline for attempt 1 is 100ms, but the hint wins.
        let delay = policy.compute_delay(1, Some(2.0));
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn jitter_is_absolute_not_proportional() {
        let policy = BackoffPolicy::new(
            Duration::from_secs(10),
            Duration::from_secs(30),
            0.25,
            fixed_randomizer(0.25),
        );

        // baseline = 10s (attempt 1), jitter = 0.25s flat, regardless of baseline size.
        assert_eq!(policy.compute_delay(1, None), Duration::from_millis(10_250));
    }

    #[test]
    fn jitter_never_pushes_past_max() {
        let policy = BackoffPolicy::new(
            Duration::from_secs(30),
            Duration::from_secs(30),
            5.0,
            fixed_randomizer(5.0),
        );

        assert_eq!(policy.compute_delay(1, None), Duration::from_secs(30));
    }

    #[test]
    fn injected_randomizer_is_used_with_correct_bounds() {
        let seen_high = Arc::new(AtomicU64::new(0));
        let seen_high_clone = Arc::clone(&seen_high);
        let randomizer: Randomizer = Arc::new(move |low, high| {
            assert_eq!(low, 0.0);
            seen_high_clone.store(high.to_bits(), Ordering::SeqCst);
            0.0
        });

        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 0.5, randomizer);
        policy.compute_delay(1, None);

        assert_eq!(f64::from_bits(seen_high.load(Ordering::SeqCst)), 0.5);
    }

    #[test]
    fn zero_max_backoff_degenerates_to_no_delay() {
        let policy = BackoffPolicy::new(
            Duration::from_secs(1),
            Duration::ZERO,
            0.0,
            fixed_randomizer(0.0),
        );

        assert_eq!(policy.compute_delay(1, None), Duration::ZERO);
    }
}
