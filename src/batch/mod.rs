//! 请求合批模块：将单独提交的请求合并为批量调用，并逐条返回结果。
//!
//! # Request Batching Module
//!
//! This module groups individually submitted requests into as few calls as
//! possible to an expensive batch operation (a bulk lookup, a multi-get, a
//! remote batch endpoint) while every caller still receives its own result or
//! error.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Batcher`] | Accepts submissions, closes batches, paces and dispatches them |
//! | [`BatcherBuilder`] | Collaborators and options for a [`Batcher`] |
//! | [`BatcherConfig`] | Serializable numeric options (size cap, thresholds, delays) |
//! | [`Threshold`] | Queue length that closes a batch for a given active count |
//! | [`Submission`] | Future resolving to one entry's own result |
//! | [`BatchState`] | Lifecycle of a batch from forming to settled |
//!
//! ## Closing Rules
//!
//! After every submission and every batch settlement the queue is evaluated:
//!
//! 1. **Size cap**: a queue holding `max_batch_size` entries closes that many
//!    immediately.
//! 2. **Thresholds**: with `closing_thresholds` configured, the queue closes
//!    once its length reaches the threshold for the current number of active
//!    batches (clamped to the last threshold). Shorter queues wait; a batch
//!    settling lowers the active count and re-runs the check.
//! 3. **Next turn**: without thresholds, a non-empty queue closes on the next
//!    scheduling turn, so one synchronous burst of submissions shares a batch.
//!
//! A `queuing_delay` postpones closes from rules 2 and 3 by a fixed duration.
//!
//! ## Dispatch
//!
//! Closed batches take a single dispatch lock in close order, run the optional
//! pacing step while holding it, call the batch operation and release the
//! lock as soon as the call is issued. Batch operations themselves run
//! concurrently.
//!
//! ## Example
//!
//! ```rust
//! use request_batcher::batch::{Batcher, Threshold};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> request_batcher::Result<()> {
//! let batcher = Batcher::builder()
//!     .batch_operation(|keys: Vec<String>| async move {
//!         let values = keys
//!             .into_iter()
//!             .map(|k| if k.is_empty() { Err("empty key".to_string()) } else { Ok(k.len()) })
//!             .collect();
//!         Ok(values)
//!     })
//!     .max_batch_size(64)
//!     .closing_thresholds([Threshold::Count(1), Threshold::Count(8)])
//!     .pacing_delay(Duration::from_millis(2))
//!     .build()?;
//!
//! assert_eq!(batcher.submit("abc".to_string()).await, Ok(3));
//! assert!(batcher.submit(String::new()).await.is_err());
//! # Ok(())
//! # }
//! ```

mod batcher;
mod closing;
mod config;
mod entry;
mod gate;

pub use batcher::{Batcher, BatcherBuilder, BatcherSnapshot, Submission};
pub use config::{BatcherConfig, Threshold};
pub use entry::{BatchOutput, BatchState};
