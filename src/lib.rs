//! # request-batcher
//!
//! 进程内请求合批器：把大量独立请求合并为尽可能少的批量调用，并为每个请求独立返回结果或错误。
//!
//! In-process request batcher that coalesces many individually issued lookups
//! into as few calls as possible to an expensive, caller-supplied batch
//! operation, while each caller still receives its own result or error.
//!
//! ## Overview
//!
//! Callers submit one input at a time and await one output. Behind that
//! interface the batcher keeps a FIFO queue of pending entries, decides when a
//! prefix of that queue becomes a batch, serializes the "close, pace, dispatch"
//! transition behind a single lock, and fans the batch operation's output back
//! out to the individual callers.
//!
//! ## Key Features
//!
//! - **Transparent coalescing**: [`Batcher::submit`] looks like a single call
//! - **Size and load aware closing**: `max_batch_size` plus closing thresholds
//!   keyed by the number of batches in flight
//! - **Pacing**: a fixed delay, a shared [`pacing::TokenBucket`], or any async
//!   step run before each dispatch
//! - **Isolated failures**: per-item errors reject one caller; whole-batch
//!   failures reject every member of that batch and nothing else
//!
//! ## Quick Start
//!
//! ```rust
//! use request_batcher::Batcher;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> request_batcher::Result<()> {
//! let squares = Batcher::builder()
//!     .batch_operation(|xs: Vec<i64>| async move {
//!         Ok::<_, String>(xs.into_iter().map(|x| Ok(x * x)).collect())
//!     })
//!     .build()?;
//!
//! // Submitted in the same turn, so both land in one batch call.
//! let (a, b) = tokio::join!(squares.submit(3), squares.submit(4));
//! assert_eq!(a.unwrap() + b.unwrap(), 25);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Batcher, closing rules, dispatch lock and result fan-out |
//! | [`pacing`] | Pacing policies and the token bucket |
//! | [`error`] | Construction errors and per-entry [`BatchError`] |

pub mod batch;
pub mod error;
pub mod pacing;

pub use batch::{
    BatchOutput, BatchState, Batcher, BatcherBuilder, BatcherConfig, BatcherSnapshot, Submission,
    Threshold,
};
pub use error::{BatchError, Error, ErrorContext};
pub use pacing::{Pacing, TokenBucket, TokenBucketConfig};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
