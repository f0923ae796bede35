//! The circuit breaker trips once failures in its sliding window reach the
//! threshold, stays tripped through the cooldown, and resets on the first
//! check after cooldown elapses (§4.6).

use std::time::Duration;

use syncd_circuit::CircuitBreaker;
use syncd_testkit::{advance, now};

#[test]
fn trips_at_threshold_and_recovers_after_cooldown() {
    let breaker = CircuitBreaker::new(Duration::from_secs(60), 3, Duration::from_secs(60));
    let t0 = now();

    assert!(!breaker.is_tripped(t0));
    breaker.record_failure(t0);
    breaker.record_failure(t0);
    assert!(!breaker.is_tripped(t0), "two failures under a threshold of three should not trip");

    breaker.record_failure(t0);
    assert!(breaker.is_tripped(t0), "third failure should trip the breaker");

    let mid_cooldown = advance(t0, 1);
    assert!(breaker.is_tripped(mid_cooldown), "still inside the cooldown window");

    let after_cooldown = t0 + chrono::Duration::seconds(61);
    assert!(!breaker.is_tripped(after_cooldown), "cooldown elapsed, breaker should auto-reset");

    breaker.record_success(after_cooldown);
    assert!(!breaker.is_tripped(after_cooldown));
}
