//! Circuit breaker over a time-based sliding window of failure timestamps
//! (§3 "CircuitState", §4.6).
//!
//! Deliberately simpler than a three-state (closed/open/half-open) breaker:
//! the spec only asks for a tripped/untripped gate that is "time-aware: it
//! auto-resets after cooldown" — there is no explicit half-open probe state,
//! so none is modelled here.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
struct State {
    failure_timestamps: Vec<DateTime<Utc>>,
    tripped_until: Option<DateTime<Utc>>,
}

/// Trips when `failure_threshold` or more failures land within the trailing
/// `window` and stays tripped for `cooldown` before auto-resetting. Any
/// success clears the failure list outright (§4.6, "Any success clears the
/// failure list").
pub struct CircuitBreaker {
    window: Duration,
    failure_threshold: usize,
    cooldown: Duration,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(window: Duration, failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            window,
            failure_threshold,
            cooldown,
            state: Mutex::new(State::default()),
        }
    }

    /// Whether calls should currently be refused. Auto-resets the breaker
    /// (clearing both the trip and the failure history) the first time this
    /// is called after `cooldown` has elapsed.
    pub fn is_tripped(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.tripped_until {
            Some(until) if now < until => true,
            Some(_) => {
                state.tripped_until = None;
                state.failure_timestamps.clear();
                false
            }
            None => false,
        }
    }

    pub fn record_success(&self, _now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.failure_timestamps.clear();
    }

    /// Returns whether this failure is the one that just tripped the
    /// breaker, so callers can count trips without polling `is_tripped`
    /// before and after.
    pub fn record_failure(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().unwrap();
        let window = chrono::Duration::from_std(self.window).unwrap_or_default();
        state.failure_timestamps.retain(|ts| now.signed_duration_since(*ts) <= window);
        state.failure_timestamps.push(now);

        if state.tripped_until.is_none() && state.failure_timestamps.len() >= self.failure_threshold {
            state.tripped_until = Some(now + chrono::Duration::from_std(self.cooldown).unwrap_or_default());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_below_threshold() {
        let cb = CircuitBreaker::new(Duration::from_secs(60), 3, Duration::from_secs(30));
        let now = Utc::now();
        cb.record_failure(now);
        cb.record_failure(now);
        assert!(!cb.is_tripped(now));
    }

    #[test]
    fn trips_at_threshold_within_window() {
        let cb = CircuitBreaker::new(Duration::from_secs(60), 3, Duration::from_secs(30));
        let now = Utc::now();
        cb.record_failure(now);
        cb.record_failure(now);
        cb.record_failure(now);
        assert!(cb.is_tripped(now));
    }

    #[test]
    fn old_failures_fall_out_of_the_window() {
        let cb = CircuitBreaker::new(Duration::from_secs(60), 3, Duration::from_secs(30));
        let now = Utc::now();
        cb.record_failure(now);
        cb.record_failure(now);
        let later = now + chrono::Duration::seconds(61);
        cb.record_failure(later);
        assert!(!cb.is_tripped(later), "the first two failures should have aged out of the window");
    }

    #[test]
    fn success_clears_the_failure_list() {
        let cb = CircuitBreaker::new(Duration::from_secs(60), 3, Duration::from_secs(30));
        let now = Utc::now();
        cb.record_failure(now);
        cb.record_failure(now);
        cb.record_success(now);
        cb.record_failure(now);
        assert!(!cb.is_tripped(now), "a success should have wiped the prior failures, so one more isn't enough to trip");
    }

    #[test]
    fn auto_resets_after_cooldown() {
        let cb = CircuitBreaker::new(Duration::from_secs(60), 3, Duration::from_secs(30));
        let now = Utc::now();
        cb.record_failure(now);
        cb.record_failure(now);
        cb.record_failure(now);
        assert!(cb.is_tripped(now));
        let later = now + chrono::Duration::seconds(31);
        assert!(!cb.is_tripped(later));
    }

    #[test]
    fn stays_tripped_before_cooldown_elapses() {
        let cb = CircuitBreaker::new(Duration::from_secs(60), 3, Duration::from_secs(30));
        let now = Utc::now();
        cb.record_failure(now);
        cb.record_failure(now);
        cb.record_failure(now);
        let soon = now + chrono::Duration::seconds(5);
        assert!(cb.is_tripped(soon));
    }
}
