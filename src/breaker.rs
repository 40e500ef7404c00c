use std::collections::VecDeque;

/// Circuit breaker over external risk-engine failures.
///
/// Rule: `threshold` consecutive failures inside `window_millis` pause new
/// submissions. Any success resets the streak. Once paused, only an operator
/// reset clears it; the breaker never re-closes on its own.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    window_millis: u64,
    failures: VecDeque<u64>,
    paused: bool,
    trip_counter: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Allow,
    Paused { trip_count: u64 },
}

impl CircuitBreaker {
    pub fn new(threshold: u32, window_millis: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            window_millis,
            failures: VecDeque::new(),
            paused: false,
            trip_counter: 0,
        }
    }

    /// Record a failure. Returns true if this failure tripped the breaker.
    pub fn record_failure(&mut self, now_millis: u64) -> bool {
        self.failures.push_back(now_millis);

        let cutoff = now_millis.saturating_sub(self.window_millis);
        while self.failures.front().is_some_and(|&t| t < cutoff) {
            self.failures.pop_front();
        }

        if !self.paused && self.failures.len() as u32 >= self.threshold {
            self.paused = true;
            self.trip_counter += 1;
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.failures.clear();
    }

    pub fn evaluate(&self) -> BreakerDecision {
        if self.paused {
            BreakerDecision::Paused {
                trip_count: self.trip_counter,
            }
        } else {
            BreakerDecision::Allow
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Operator reset after investigating
    pub fn reset(&mut self) {
        self.paused = false;
        self.failures.clear();
    }

    pub fn consecutive_failures(&self) -> usize {
        self.failures.len()
    }

    pub fn trip_count(&self) -> u64 {
        self.trip_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: u64 = 60_000;

    #[test]
    fn test_breaker_allows_when_inactive() {
        let breaker = CircuitBreaker::new(3, 10 * MINUTE);
        assert_eq!(breaker.evaluate(), BreakerDecision::Allow);
    }

    #[test]
    fn test_breaker_trips_after_threshold_in_window() {
        // GIVEN: threshold 3 in 10m
        let mut breaker = CircuitBreaker::new(3, 10 * MINUTE);

        // WHEN: three failures inside the window
        assert!(!breaker.record_failure(0));
        assert!(!breaker.record_failure(MINUTE));
        assert!(breaker.record_failure(2 * MINUTE));

        // THEN: paused, and further failures do not re-trip
        assert_eq!(breaker.evaluate(), BreakerDecision::Paused { trip_count: 1 });
        assert!(!breaker.record_failure(3 * MINUTE));
        assert_eq!(breaker.trip_count(), 1);
    }

    #[test]
    fn test_failures_outside_window_are_forgotten() {
        let mut breaker = CircuitBreaker::new(3, 10 * MINUTE);
        breaker.record_failure(0);
        breaker.record_failure(MINUTE);
        assert!(!breaker.record_failure(20 * MINUTE));
        assert_eq!(breaker.consecutive_failures(), 1);
        assert!(!breaker.is_paused());
    }

    #[test]
    fn test_success_resets_streak() {
        let mut breaker = CircuitBreaker::new(2, 10 * MINUTE);
        breaker.record_failure(0);
        breaker.record_success();
        assert!(!breaker.record_failure(MINUTE));
        assert!(!breaker.is_paused());
    }

    #[test]
    fn test_only_operator_reset_reopens() {
        let mut breaker = CircuitBreaker::new(1, MINUTE);
        assert!(breaker.record_failure(0));
        breaker.record_success();
        assert!(breaker.is_paused());

        breaker.reset();
        assert_eq!(breaker.evaluate(), BreakerDecision::Allow);
    }
}
