//! Exponential backoff with jitter (§4.4). Pure and deterministic given a
//! seeded RNG; the engine only ever calls [`BackoffPolicy::delay`].

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

const BASE: Duration = Duration::from_secs(1);
const RETRY_AFTER_JITTER_MAX_MS: u64 = 500;

/// Which cap applies. The spec leaves "how aggressively to back off" as an
/// open per-deployment choice; §2's config section resolves it as a named
/// mode rather than a bare number so the daemon's config file stays
/// self-documenting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    /// 30s ceiling. Default — suitable for interactive foreground sync.
    Short,
    /// 10 minute ceiling. For background/battery-constrained sync where
    /// hammering a struggling server is worse than a slow drain.
    Long,
}

impl BackoffMode {
    pub fn cap(self) -> Duration {
        match self {
            BackoffMode::Short => Duration::from_secs(30),
            BackoffMode::Long => Duration::from_secs(10 * 60),
        }
    }
}

impl Default for BackoffMode {
    fn default() -> Self {
        BackoffMode::Short
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub mode: BackoffMode,
}

impl BackoffPolicy {
    pub fn new(mode: BackoffMode) -> Self {
        Self { mode }
    }

    /// Compute the delay before the next attempt (§4.4).
    ///
    /// When the server named a `Retry-After`, honour it plus a small jitter
    /// so a thundering herd of clients doesn't all wake up on the same tick.
    /// Otherwise fall back to `base * 2^(attempts-1)` scaled by a uniform
    /// jitter factor in `[0.5, 1.5)`, capped at the policy's mode ceiling.
    /// `attempts` is the 1-based count of attempts made so far (first retry
    /// after the first failure passes `attempts = 1`).
    pub fn delay(&self, attempts: u32, retry_after: Option<Duration>) -> Duration {
        let mut rng = rand::thread_rng();
        if let Some(server_delay) = retry_after {
            let jitter_ms = rng.gen_range(0..=RETRY_AFTER_JITTER_MAX_MS);
            return server_delay + Duration::from_millis(jitter_ms);
        }

        let exponent = attempts.saturating_sub(1).min(32);
        let unjittered = BASE.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
        let factor: f64 = rng.gen_range(0.5..1.5);
        let jittered_ms = (unjittered.as_millis() as f64 * factor) as u64;
        Duration::from_millis(jittered_ms).min(self.mode.cap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_retry_after_with_small_jitter() {
        let policy = BackoffPolicy::new(BackoffMode::Short);
        let d = policy.delay(3, Some(Duration::from_secs(5)));
        assert!(d >= Duration::from_secs(5));
        assert!(d <= Duration::from_secs(5) + Duration::from_millis(RETRY_AFTER_JITTER_MAX_MS));
    }

    #[test]
    fn exponential_without_retry_after_is_capped() {
        let policy = BackoffPolicy::new(BackoffMode::Short);
        for _ in 0..50 {
            let d = policy.delay(20, None);
            assert!(d <= BackoffMode::Short.cap());
        }
    }

    #[test]
    fn long_mode_allows_a_much_higher_ceiling() {
        let policy = BackoffPolicy::new(BackoffMode::Long);
        assert_eq!(BackoffMode::Long.cap(), Duration::from_secs(600));
        let mut saw_over_short_cap = false;
        for _ in 0..200 {
            if policy.delay(10, None) > BackoffMode::Short.cap() {
                saw_over_short_cap = true;
                break;
            }
        }
        assert!(saw_over_short_cap, "long mode should eventually exceed the short cap");
    }

    #[test]
    fn first_attempt_backs_off_from_base() {
        let policy = BackoffPolicy::new(BackoffMode::Short);
        let d = policy.delay(1, None);
        assert!(d >= Duration::from_millis(400));
        assert!(d <= Duration::from_millis(1600));
    }
}
