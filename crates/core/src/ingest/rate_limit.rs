use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window limiter: at most `max_calls` acquisitions in any `window`.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    calls: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            calls: tokio::sync::Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(60))
    }

    /// Waits until a call is allowed, then records it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while calls
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.window)
                {
                    calls.pop_front();
                }

                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }

                match calls.front() {
                    Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            tracing::debug!(wait_ms = wait.as_millis(), max_calls = self.max_calls, "rate limit reached; waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls recorded inside the current window.
    pub async fn current_usage(&self) -> usize {
        let calls = self.calls.lock().await;
        let now = Instant::now();
        calls
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_burst_up_to_limit_then_waits_for_window() {
        let limiter = RateLimiter::new(3, Duration::from_millis(150));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.current_usage().await, 3);

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn zero_limit_is_treated_as_one() {
        let limiter = RateLimiter::new(0, Duration::from_millis(10));
        limiter.acquire().await;
        assert_eq!(limiter.current_usage().await, 1);
    }
}
