use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Callers tracked before a sweep drops every fully expired history.
const SWEEP_THRESHOLD: usize = 16_384;

// -----------------------------------------------------------------------------
// ----- RateLimiter -----------------------------------------------------------

/// Sliding-window admission per caller id. Uses the tokio clock, so paused
/// test time applies.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    histories: Mutex<HashMap<String, VecDeque<Instant>>>,
}

// -----------------------------------------------------------------------------
// ----- RateLimiter: Static ---------------------------------------------------

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            histories: Mutex::new(HashMap::new()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RateLimiter: Public ---------------------------------------------------

impl RateLimiter {
    /// Records the call and returns true when the caller has fewer than
    /// `max_requests` calls inside the trailing window.
    pub fn admit(&self, caller: &str) -> bool {
        let now = Instant::now();
        let mut histories = self.histories.lock();

        if histories.len() >= SWEEP_THRESHOLD {
            let window = self.window;
            histories.retain(|_, history| {
                evict(history, now, window);
                !history.is_empty()
            });
        }

        let history = histories.entry(caller.to_string()).or_default();
        evict(history, now, self.window);
        if history.len() >= self.max_requests {
            return false;
        }
        history.push_back(now);
        true
    }

    /// Callers with a history, expired or not, since the last sweep.
    pub fn tracked_callers(&self) -> usize {
        self.histories.lock().len()
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn evict(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = history.front() {
        if now.duration_since(*oldest) >= window {
            history.pop_front();
        } else {
            break;
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn denies_past_limit_then_recovers() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.admit("alice"));
        assert!(limiter.admit("alice"));
        assert!(limiter.admit("alice"));
        assert!(!limiter.admit("alice"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!limiter.admit("alice"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.admit("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn callers_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));

        assert!(limiter.admit("alice"));
        assert!(!limiter.admit("alice"));
        assert!(limiter.admit("bob"));
        assert_eq!(limiter.tracked_callers(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_per_call() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));

        assert!(limiter.admit("c"));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.admit("c"));
        assert!(!limiter.admit("c"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.admit("c"));
        assert!(!limiter.admit("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_histories_are_swept_at_threshold() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        for i in 0..SWEEP_THRESHOLD {
            assert!(limiter.admit(&format!("caller-{i}")));
        }
        assert_eq!(limiter.tracked_callers(), SWEEP_THRESHOLD);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(limiter.admit("late"));
        assert_eq!(limiter.tracked_callers(), 1);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
