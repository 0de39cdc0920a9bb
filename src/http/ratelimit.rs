//! Request pacing
//!
//! A token bucket of size one: one request may go out per interval, and
//! callers that arrive early wait for their turn instead of being dropped.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until a request may be dispatched, then take the slot
    pub async fn acquire(&mut self) {
        let now = Instant::now();
        let slot = match self.next_slot {
            Some(slot) if slot > now => {
                tracing::trace!(wait_ms = (slot - now).as_millis() as u64, "Rate limited");
                tokio::time::sleep_until(slot).await;
                slot
            }
            _ => now,
        };
        self.next_slot = Some(slot + self.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_is_not_delayed() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60));
        let start = std::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_requests_are_spaced_by_interval() {
        let mut limiter = RateLimiter::new(Duration::from_millis(40));
        let start = std::time::Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
