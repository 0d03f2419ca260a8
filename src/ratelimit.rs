//! Fixed-window flood limiter for chat messages.
//!
//! Lives inside the session, so it is only ever touched under the session lock.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// identity -> (messages in window, window start)
    requests: HashMap<String, (u32, Instant)>,
    max_requests: u32,
    window: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(10)) // 10 messages per 10 seconds
    }
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: HashMap::new(),
            max_requests,
            window,
        }
    }

    /// Returns true if allowed, false if rate limited
    pub fn check(&mut self, key: &str) -> bool {
        let now = Instant::now();

        match self.requests.get_mut(key) {
            Some((count, window_start)) => {
                if now.duration_since(*window_start) >= self.window {
                    *count = 1;
                    *window_start = now;
                    true
                } else if *count >= self.max_requests {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                if self.requests.len() > 1024 {
                    self.cleanup(now);
                }
                self.requests.insert(key.to_string(), (1, now));
                true
            }
        }
    }

    pub fn forget(&mut self, key: &str) {
        self.requests.remove(key);
    }

    fn cleanup(&mut self, now: Instant) {
        let window = self.window;
        self.requests
            .retain(|_, (_, window_start)| now.duration_since(*window_start) < window * 2);
    }
}
