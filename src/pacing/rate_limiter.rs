//! Token bucket for pacing dispatches.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TokenBucketSnapshot {
    pub rate: f64,
    pub burst: f64,
    pub tokens: f64,
    /// Estimated wait until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Tokens per second. Zero disables limiting.
    pub rate: f64,
    /// Maximum burst size (tokens).
    pub burst: f64,
}

impl TokenBucketConfig {
    pub fn from_rate(rate: f64) -> Option<Self> {
        if !rate.is_finite() || rate < 0.0 {
            return None;
        }
        Some(Self {
            rate,
            burst: rate.max(1.0), // one second worth, at least 1
        })
    }

    /// Bucket capacity. A burst below one token could never be spent, so it
    /// is raised to one.
    pub fn with_burst(mut self, tokens: u32) -> Self {
        self.burst = f64::from(tokens.max(1));
        self
    }

    /// Replace the refill rate. Negative or non-finite rates are ignored and
    /// the previous rate is kept.
    pub fn with_rate(mut self, rate: f64) -> Self {
        if rate.is_finite() && rate >= 0.0 {
            self.rate = rate;
        }
        self
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
}

/// Token bucket used to pace batch dispatches.
///
/// One bucket can be shared by several batchers through an `Arc`, which caps
/// their combined dispatch rate.
#[derive(Debug)]
pub struct TokenBucket {
    cfg: TokenBucketConfig,
    state: Mutex<State>,
}

impl TokenBucket {
    pub fn new(cfg: TokenBucketConfig) -> Self {
        let state = Mutex::new(State {
            tokens: cfg.burst,
            last: Instant::now(),
        });
        Self { cfg, state }
    }

    fn refill_locked(cfg: &TokenBucketConfig, st: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.rate).min(cfg.burst);
            st.last = now;
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        let cfg = &self.cfg;
        if cfg.rate <= 0.0 {
            return;
        }
        loop {
            let wait = {
                let mut st = self.state.lock().await;
                Self::refill_locked(cfg, &mut st);
                if st.tokens >= 1.0 {
                    st.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - st.tokens) / cfg.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token without waiting; false if the bucket is empty.
    pub async fn try_acquire(&self) -> bool {
        let cfg = &self.cfg;
        if cfg.rate <= 0.0 {
            return true;
        }
        let mut st = self.state.lock().await;
        Self::refill_locked(cfg, &mut st);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn snapshot(&self) -> TokenBucketSnapshot {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;
        let mut wait_ms = None;
        if cfg.rate > 0.0 {
            Self::refill_locked(cfg, &mut st);
            if st.tokens < 1.0 {
                wait_ms = Some(((1.0 - st.tokens) / cfg.rate * 1000.0) as u64);
            }
        }
        TokenBucketSnapshot {
            rate: cfg.rate,
            burst: cfg.burst,
            tokens: st.tokens,
            estimated_wait_ms: wait_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_rate() {
        let config = TokenBucketConfig::from_rate(10.0).unwrap();
        assert_eq!(config.rate, 10.0);
        assert_eq!(config.burst, 10.0);
    }

    #[test]
    fn test_config_from_rate_low() {
        let config = TokenBucketConfig::from_rate(0.5).unwrap();
        // burst should be at least 1.0
        assert_eq!(config.burst, 1.0);
    }

    #[test]
    fn test_config_from_rate_invalid() {
        assert!(TokenBucketConfig::from_rate(-1.0).is_none());
        assert!(TokenBucketConfig::from_rate(f64::NAN).is_none());
        assert!(TokenBucketConfig::from_rate(f64::INFINITY).is_none());
    }

    #[test]
    fn test_zero_burst_raised_to_one() {
        let config = TokenBucketConfig::from_rate(10.0).unwrap().with_burst(0);
        assert_eq!(config.burst, 1.0);
    }

    #[test]
    fn test_with_rate_ignores_invalid() {
        let config = TokenBucketConfig::from_rate(4.0).unwrap();
        assert_eq!(config.clone().with_rate(f64::NAN).rate, 4.0);
        assert_eq!(config.clone().with_rate(-2.0).rate, 4.0);
        assert_eq!(config.clone().with_rate(f64::INFINITY).rate, 4.0);
        assert_eq!(config.with_rate(8.0).rate, 8.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_burst_bucket_still_grants() {
        let bucket = TokenBucket::new(TokenBucketConfig::from_rate(10.0).unwrap().with_burst(0));
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(110));
    }

    #[tokio::test]
    async fn test_try_acquire_drains_burst() {
        let bucket = TokenBucket::new(
            TokenBucketConfig::from_rate(1.0)
                .unwrap()
                .with_burst(3),
        );
        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        assert!(!bucket.try_acquire().await);

        let snapshot = bucket.snapshot().await;
        assert!(snapshot.estimated_wait_ms.is_some());
    }

    #[tokio::test]
    async fn test_zero_rate_is_unlimited() {
        let bucket = TokenBucket::new(TokenBucketConfig::from_rate(0.0).unwrap());
        for _ in 0..100 {
            bucket.acquire().await;
        }
        assert!(bucket.try_acquire().await);
        assert!(bucket.snapshot().await.estimated_wait_ms.is_none());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(
            TokenBucketConfig::from_rate(100.0)
                .unwrap()
                .with_burst(1),
        );
        bucket.acquire().await;
        let start = Instant::now();
        // 100 tokens/sec = 1 token/10ms
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
