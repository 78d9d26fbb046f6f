//! Retry-delay computation (spec §4.3): `delay_n = clamp(initialDelay · f(n), 0, maxDelay)`
//! with `f` chosen by [`BackoffKind`], plus ±10% uniform jitter.

use std::time::Duration;

use rand::Rng;

use crate::program::{BackoffKind, RetryPolicy};

/// `attempt` is 1-based: the delay *before* attempt `n+1`, given `n` prior
/// failed attempts.
#[must_use]
pub fn compute_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = match policy.backoff {
        BackoffKind::Exponential => 2f64.powi(attempt.saturating_sub(1) as i32),
        BackoffKind::Linear => f64::from(attempt.max(1)),
        BackoffKind::Constant => 1.0,
    };
    let base_ms = (policy.initial_delay_ms as f64 * factor).min(policy.max_delay_ms as f64);
    let jittered_ms = apply_jitter(base_ms);
    Duration::from_millis(jittered_ms.clamp(0.0, policy.max_delay_ms as f64) as u64)
}

fn apply_jitter(base_ms: f64) -> f64 {
    let spread = base_ms * 0.10;
    let offset = rand::rng().random_range(-spread..=spread);
    (base_ms + offset).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::BackoffKind;

    fn policy(backoff: BackoffKind) -> RetryPolicy {
        RetryPolicy { max_attempts: 5, backoff, initial_delay_ms: 100, max_delay_ms: 10_000 }
    }

    #[test]
    fn exponential_grows_and_clamps() {
        let p = policy(BackoffKind::Exponential);
        let d1 = compute_delay(&p, 1).as_millis();
        let d2 = compute_delay(&p, 2).as_millis();
        let d3 = compute_delay(&p, 3).as_millis();
        assert!(d1 <= 110 && d1 >= 90);
        assert!(d2 > d1);
        assert!(d3 > d2);
    }

    #[test]
    fn clamps_to_max_delay() {
        let p = RetryPolicy { max_attempts: 10, backoff: BackoffKind::Exponential, initial_delay_ms: 1000, max_delay_ms: 2000 };
        let d = compute_delay(&p, 10);
        assert!(d.as_millis() as u64 <= 2000);
    }

    #[test]
    fn linear_scales_with_attempt() {
        let p = policy(BackoffKind::Linear);
        let d4 = compute_delay(&p, 4).as_millis();
        assert!(d4 >= 360 && d4 <= 440);
    }

    #[test]
    fn constant_stays_flat() {
        let p = policy(BackoffKind::Constant);
        let d1 = compute_delay(&p, 1).as_millis();
        let d5 = compute_delay(&p, 5).as_millis();
        assert!((d1 as i64 - d5 as i64).abs() <= 20);
    }
}
