use std::time::Duration;

use rand::Rng;

/// Exponential backoff (`base * 2^(attempt-1)`, capped at `max`) plus up to
/// 50% random jitter so racing writers spread out.
pub fn backoff_with_jitter(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    let backoff = base.saturating_mul(factor).min(max);
    let jitter_cap = (backoff.as_millis() / 2).max(1) as u64;
    let jitter = rand::rng().random_range(0..=jitter_cap);
    backoff + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_with_jitter_stays_within_bounds() {
        let base = Duration::from_millis(50);
        let max = Duration::from_millis(1000);

        for attempt in 1..=10 {
            let delay = backoff_with_jitter(base, max, attempt);
            let expected = base
                .saturating_mul(2u32.saturating_pow(attempt - 1))
                .min(max);
            assert!(delay >= expected, "attempt {attempt}: {delay:?}");
            assert!(
                delay <= expected + expected / 2 + Duration::from_millis(1),
                "attempt {attempt}: {delay:?}"
            );
        }
    }

    #[test]
    fn zero_attempt_behaves_like_first() {
        let delay = backoff_with_jitter(Duration::from_millis(10), Duration::from_secs(1), 0);
        assert!(delay >= Duration::from_millis(10));
        assert!(delay <= Duration::from_millis(16));
    }
}
