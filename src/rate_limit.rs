//! Sliding-window request limiting keyed by client

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;
use crate::{Error, Result};

/// Request history per key plus the time of the last idle sweep
struct History {
    by_key: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

/// Allows at most `max_requests` per key within any `window`
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    requests: Mutex<History>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Mutex::new(History {
                by_key: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Limiter for account registration
    pub fn registrations(config: &RateLimitConfig) -> Self {
        Self::new(
            config.registrations_per_window,
            Duration::from_secs(config.registration_window_seconds),
        )
    }

    /// Record a request for `key`, failing once the window is full
    pub fn check(&self, key: &str) -> Result<()> {
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| Error::internal("Rate limiter lock poisoned"))?;

        let now = Instant::now();

        // Keys nobody has used for a whole window are dropped at most once per window
        if now.duration_since(requests.last_sweep) >= self.window {
            Self::sweep(&mut requests, now, self.window);
        }

        let history = requests.by_key.entry(key.to_string()).or_default();
        Self::prune(history, now, self.window);

        if history.len() >= self.max_requests as usize {
            let retry_after = history
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            // Round up so a client never retries a moment too early
            let retry_after_seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);

            if history.is_empty() {
                requests.by_key.remove(key);
            }

            tracing::warn!(key, retry_after_seconds, "rate limit exceeded");
            return Err(Error::RateLimited {
                retry_after_seconds,
            });
        }

        history.push_back(now);
        Ok(())
    }

    /// Requests `key` may still make in the current window
    pub fn remaining(&self, key: &str) -> Result<u32> {
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| Error::internal("Rate limiter lock poisoned"))?;

        let Some(history) = requests.by_key.get_mut(key) else {
            return Ok(self.max_requests);
        };
        Self::prune(history, Instant::now(), self.window);

        if history.is_empty() {
            requests.by_key.remove(key);
            return Ok(self.max_requests);
        }

        let used = u32::try_from(history.len()).unwrap_or(u32::MAX);
        Ok(self.max_requests.saturating_sub(used))
    }

    /// Forget the history of one key
    pub fn reset(&self, key: &str) -> Result<()> {
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| Error::internal("Rate limiter lock poisoned"))?;
        requests.by_key.remove(key);
        Ok(())
    }

    /// Drop every key whose window has fully elapsed, returning how many went
    pub fn purge_idle(&self) -> Result<usize> {
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| Error::internal("Rate limiter lock poisoned"))?;

        let removed = Self::sweep(&mut requests, Instant::now(), self.window);
        if removed > 0 {
            tracing::debug!(removed, "idle rate limit keys purged");
        }
        Ok(removed)
    }

    /// Number of keys currently holding request history
    pub fn tracked_keys(&self) -> Result<usize> {
        let requests = self
            .requests
            .lock()
            .map_err(|_| Error::internal("Rate limiter lock poisoned"))?;
        Ok(requests.by_key.len())
    }

    fn sweep(requests: &mut History, now: Instant, window: Duration) -> usize {
        let before = requests.by_key.len();
        requests.by_key.retain(|_, history| {
            Self::prune(history, now, window);
            !history.is_empty()
        });
        requests.last_sweep = now;
        before - requests.by_key.len()
    }

    fn prune(history: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = history.front() {
            if now.duration_since(oldest) >= window {
                history.pop_front();
            } else {
                break;
            }
        }
    }
}
