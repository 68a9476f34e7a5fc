//! Cloud API rate limiter
//!
//! One process-wide token bucket shared by every provisioning: each
//! step-sequence launch that will touch a cloud API takes one token first.
//! Partitioning per tenant is a possible future change; the current contract
//! is strictly global.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, Interval};

/// Interval-ticked token bucket
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Interval>,
}

impl RateLimiter {
    pub fn new(spawn_interval: Duration) -> Self {
        // The first token becomes available one full interval from now.
        let bucket = interval_at(Instant::now() + spawn_interval, spawn_interval);
        Self {
            bucket: Mutex::new(bucket),
        }
    }

    /// Block until the next token is available.
    pub async fn take(&self) {
        self.bucket.lock().await.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_take_paces_callers() {
        let limiter = RateLimiter::new(Duration::from_millis(20));
        let start = Instant::now();

        limiter.take().await;
        limiter.take().await;
        limiter.take().await;

        // Three tokens need at least three intervals.
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test]
    async fn test_take_is_shared_across_tasks() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(10)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.take().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(35));
    }
}
