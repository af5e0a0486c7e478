use std::{collections::HashMap, time::Duration, time::Instant};

#[derive(Default)]
pub struct RateLimiter {
    /// tracks delivery timestamps per repository
    requests: HashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if the given key has exceeded the rate limit within the specified time window.
    /// Returns `true` if the rate limit is exceeded, `false` otherwise.
    pub fn check_rate_limit(&mut self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_at(key, max, Duration::from_secs(window_secs), Instant::now())
    }

    fn check_at(&mut self, key: &str, max: usize, window: Duration, now: Instant) -> bool {
        let timestamps = self.requests.entry(key.to_string()).or_default();

        // Remove timestamps older than window
        timestamps.retain(|&t| now.duration_since(t) < window);

        if timestamps.len() < max {
            timestamps.push(now);
            false
        } else {
            true
        }
    }
}
