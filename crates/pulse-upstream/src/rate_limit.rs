//! Process-wide outbound rate limiting.
//!
//! Three guarantees: a cap on concurrent outbound requests, a minimum
//! spacing between any two dispatches, and a per-endpoint adaptive
//! delay that widens when the upstream answers 429 and decays again on
//! success.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use pulse_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum concurrent outbound requests
    pub max_concurrent: usize,

    /// Minimum spacing between any two dispatches
    pub min_interval: Duration,

    /// First adaptive penalty applied to an endpoint after a 429
    pub adaptive_base: Duration,

    /// Ceiling for the adaptive penalty
    pub adaptive_max: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            min_interval: Duration::from_millis(1000),
            adaptive_base: Duration::from_secs(2),
            adaptive_max: Duration::from_secs(300),
        }
    }
}

/// Token returned by [`RateLimitManager::acquire`]. Concurrency is
/// released when the permit drops, so every exit path releases.
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

/// Coordinates all outbound requests of the process.
pub struct RateLimitManager {
    config: RateLimitConfig,
    semaphore: Arc<Semaphore>,
    /// Time the next dispatch may happen; slots are reserved under the
    /// lock, the sleep happens outside it.
    next_dispatch: Mutex<Option<Instant>>,
    /// Current adaptive penalty per endpoint
    penalties: Mutex<HashMap<String, Duration>>,
}

impl RateLimitManager {
    pub fn new(config: RateLimitConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            semaphore,
            next_dispatch: Mutex::new(None),
            penalties: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for a dispatch slot on the given endpoint.
    pub async fn acquire(&self, endpoint: &str) -> Result<RateLimitPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("rate limiter semaphore closed".to_string()))?;

        let wait = {
            let spacing = self.config.min_interval.max(self.penalty(endpoint));
            let mut next = self.next_dispatch.lock();
            let now = Instant::now();
            let target = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(target + spacing);
            target.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        Ok(RateLimitPermit { _permit: permit })
    }

    /// Current adaptive penalty for an endpoint.
    pub fn penalty(&self, endpoint: &str) -> Duration {
        self.penalties
            .lock()
            .get(endpoint)
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Widen the endpoint's penalty after a 429. An explicit
    /// `Retry-After` wins over the exponential step.
    pub fn note_rate_limited(&self, endpoint: &str, retry_after: Option<Duration>) {
        let mut penalties = self.penalties.lock();
        let current = penalties.get(endpoint).copied().unwrap_or(Duration::ZERO);
        let widened = if current.is_zero() {
            self.config.adaptive_base
        } else {
            current.saturating_mul(2)
        };
        let next = retry_after.unwrap_or(widened).min(self.config.adaptive_max);
        warn!(endpoint = endpoint, penalty_ms = next.as_millis() as u64, "widening rate-limit penalty");
        penalties.insert(endpoint.to_string(), next);
    }

    /// Decay the endpoint's penalty after a successful request.
    pub fn note_success(&self, endpoint: &str) {
        let mut penalties = self.penalties.lock();
        if let Some(current) = penalties.get(endpoint).copied() {
            let halved = current / 2;
            if halved < Duration::from_millis(50) {
                penalties.remove(endpoint);
                debug!(endpoint = endpoint, "rate-limit penalty cleared");
            } else {
                penalties.insert(endpoint.to_string(), halved);
            }
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> RateLimitConfig {
        RateLimitConfig {
            max_concurrent: 3,
            min_interval: Duration::from_millis(1000),
            adaptive_base: Duration::from_secs(2),
            adaptive_max: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_acquires_are_spaced() {
        let manager = RateLimitManager::new(fast_config());

        let started = Instant::now();
        for _ in 0..5 {
            let _permit = manager.acquire("/api/campaigns").await.unwrap();
        }
        // first dispatch is immediate, the other four wait 1s each
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let manager = Arc::new(RateLimitManager::new(RateLimitConfig {
            max_concurrent: 2,
            min_interval: Duration::ZERO,
            ..fast_config()
        }));

        let a = manager.acquire("/a").await.unwrap();
        let _b = manager.acquire("/b").await.unwrap();
        assert_eq!(manager.available_permits(), 0);

        drop(a);
        assert_eq!(manager.available_permits(), 1);
    }

    #[tokio::test]
    async fn penalty_widens_and_decays() {
        let manager = RateLimitManager::new(fast_config());
        assert_eq!(manager.penalty("/api/events"), Duration::ZERO);

        manager.note_rate_limited("/api/events", None);
        assert_eq!(manager.penalty("/api/events"), Duration::from_secs(2));

        manager.note_rate_limited("/api/events", None);
        assert_eq!(manager.penalty("/api/events"), Duration::from_secs(4));

        // other endpoints are unaffected
        assert_eq!(manager.penalty("/api/campaigns"), Duration::ZERO);

        manager.note_success("/api/events");
        assert_eq!(manager.penalty("/api/events"), Duration::from_secs(2));

        for _ in 0..10 {
            manager.note_success("/api/events");
        }
        assert_eq!(manager.penalty("/api/events"), Duration::ZERO);
    }

    #[tokio::test]
    async fn retry_after_overrides_exponential_step() {
        let manager = RateLimitManager::new(fast_config());
        manager.note_rate_limited("/api/events", Some(Duration::from_secs(30)));
        assert_eq!(manager.penalty("/api/events"), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn penalty_is_capped() {
        let manager = RateLimitManager::new(fast_config());
        for _ in 0..20 {
            manager.note_rate_limited("/api/events", None);
        }
        assert_eq!(manager.penalty("/api/events"), Duration::from_secs(60));
    }
}
