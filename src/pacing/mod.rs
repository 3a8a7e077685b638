//! 调度节流模块：在每个批次派发前执行的延迟或限流步骤。
//!
//! # Dispatch Pacing Module
//!
//! A pacing step runs once per batch, while that batch holds the dispatch
//! lock and right before the batch operation is called. It delays the *start*
//! of a batch operation call, never its completion, and no two batches pace
//! at the same time.
//!
//! | Policy | Behavior |
//! |--------|----------|
//! | [`Pacing::None`] | Dispatch as soon as the lock is acquired |
//! | [`Pacing::Delay`] | Sleep a fixed duration |
//! | [`Pacing::RateLimited`] | Take one token from a shared [`TokenBucket`] |
//! | [`Pacing::Function`] | Await a caller-supplied async step that may fail |
//!
//! ```rust
//! use request_batcher::pacing::{TokenBucket, TokenBucketConfig};
//! use std::sync::Arc;
//!
//! // At most 5 batch calls per second, shared by every batcher holding the bucket.
//! let bucket = Arc::new(TokenBucket::new(TokenBucketConfig::from_rate(5.0).unwrap()));
//! ```

pub mod rate_limiter;

pub use rate_limiter::{TokenBucket, TokenBucketConfig, TokenBucketSnapshot};

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Caller-supplied pacing step.
pub type PacingFn<E> = Arc<dyn Fn() -> BoxFuture<'static, Result<(), E>> + Send + Sync>;

/// Resolved pacing policy of a batcher.
pub enum Pacing<E> {
    None,
    Delay(Duration),
    RateLimited(Arc<TokenBucket>),
    Function(PacingFn<E>),
}

impl<E: Send + 'static> Pacing<E> {
    /// Wrap an async closure as a pacing function.
    pub fn function<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), E>> + Send + 'static,
    {
        Pacing::Function(Arc::new(move || f().boxed()))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Pacing::None)
    }

    /// Begin the pacing step for one batch. `None` when there is nothing to do.
    ///
    /// A pacing function is invoked synchronously here; only the returned
    /// future is awaited later.
    pub fn start(&self) -> Option<BoxFuture<'static, Result<(), E>>> {
        match self {
            Pacing::None => None,
            Pacing::Delay(d) => {
                let d = *d;
                Some(
                    async move {
                        tokio::time::sleep(d).await;
                        Ok::<(), E>(())
                    }
                    .boxed(),
                )
            }
            Pacing::RateLimited(bucket) => {
                let bucket = Arc::clone(bucket);
                Some(
                    async move {
                        bucket.acquire().await;
                        Ok::<(), E>(())
                    }
                    .boxed(),
                )
            }
            Pacing::Function(f) => Some(f()),
        }
    }
}

impl<E> Clone for Pacing<E> {
    fn clone(&self) -> Self {
        match self {
            Pacing::None => Pacing::None,
            Pacing::Delay(d) => Pacing::Delay(*d),
            Pacing::RateLimited(b) => Pacing::RateLimited(Arc::clone(b)),
            Pacing::Function(f) => Pacing::Function(Arc::clone(f)),
        }
    }
}

impl<E> fmt::Debug for Pacing<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pacing::None => f.write_str("None"),
            Pacing::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
            Pacing::RateLimited(b) => f.debug_tuple("RateLimited").field(b).finish(),
            Pacing::Function(_) => f.write_str("Function(..)"),
        }
    }
}
