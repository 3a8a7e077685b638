//! Batcher: queueing, closing, pacing, dispatch and settlement.

use super::closing::{self, CloseReason, Closing};
use super::config::{BatcherConfig, Threshold};
use super::entry::{Batch, BatchOutput, BatchState, Entry};
use super::gate::DispatchGate;
use crate::error::BatchError;
use crate::pacing::{Pacing, TokenBucket};
use crate::{Error, ErrorContext, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

type OperationFn<I, O, E> =
    Arc<dyn Fn(Vec<I>) -> BoxFuture<'static, BatchOutput<O, E>> + Send + Sync>;

/// Point-in-time view of a batcher's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherSnapshot {
    /// Entries not yet assigned to a batch.
    pub queued: usize,
    /// Batches dispatched and not yet settled.
    pub active_batches: usize,
    /// Closed batches waiting for the dispatch lock.
    pub awaiting_dispatch: usize,
    /// Whether a batch currently holds the dispatch lock (pacing or issuing).
    pub dispatch_held: bool,
    /// Total batches closed since the batcher was built.
    pub batches_closed: u64,
    /// Total batches that reached dispatch, including ones whose operation
    /// panicked before returning a future.
    pub batches_dispatched: u64,
}

struct State<I, O, E> {
    queue: VecDeque<Entry<I, O, E>>,
    active: usize,
    gate: DispatchGate<Batch<I, O, E>>,
    /// Generation of the armed deferred close, if any.
    deferred: Option<u64>,
    generation: u64,
    next_batch_id: u64,
    batches_closed: u64,
    batches_dispatched: u64,
}

impl<I, O, E> State<I, O, E> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            active: 0,
            gate: DispatchGate::new(),
            deferred: None,
            generation: 0,
            next_batch_id: 0,
            batches_closed: 0,
            batches_dispatched: 0,
        }
    }
}

struct Inner<I, O, E> {
    config: BatcherConfig,
    operation: OperationFn<I, O, E>,
    pacing: Pacing<E>,
    runtime: Handle,
    state: Mutex<State<I, O, E>>,
}

/// Coalesces individual submissions into calls to a batch operation.
///
/// Cloning is cheap; clones share the same queue and dispatch lock.
/// Collaborator futures and deferred closes run on the Tokio runtime that was
/// current when the batcher was built.
///
/// ```rust
/// use request_batcher::Batcher;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> request_batcher::Result<()> {
/// let batcher = Batcher::builder()
///     .batch_operation(|ids: Vec<u32>| async move {
///         Ok::<_, String>(ids.into_iter().map(|id| Ok(id * 10)).collect())
///     })
///     .max_batch_size(100)
///     .build()?;
///
/// let (a, b) = tokio::join!(batcher.submit(1), batcher.submit(2));
/// assert_eq!((a.unwrap(), b.unwrap()), (10, 20));
/// # Ok(())
/// # }
/// ```
pub struct Batcher<I, O, E> {
    inner: Arc<Inner<I, O, E>>,
}

impl<I, O, E> Clone for Batcher<I, O, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O, E> fmt::Debug for Batcher<I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batcher")
            .field("config", &self.inner.config)
            .field("pacing", &self.inner.pacing)
            .finish_non_exhaustive()
    }
}

impl<I, O, E> Batcher<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn builder() -> BatcherBuilder<I, O, E> {
        BatcherBuilder::new()
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Queue `input` and return a future for its own result.
    ///
    /// The entry is enqueued before this returns, so submissions made in one
    /// synchronous burst land in the same batch. Safe to call from inside the
    /// batch operation or pacing function.
    pub fn submit(&self, input: I) -> Submission<O, E> {
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            state.queue.push_back(Entry::new(input, tx));
            trace!(queued = state.queue.len(), active = state.active, "entry enqueued");
            self.evaluate(state);
        }
        self.pump();
        Submission { rx }
    }

    pub fn snapshot(&self) -> BatcherSnapshot {
        let state = self.lock_state();
        BatcherSnapshot {
            queued: state.queue.len(),
            active_batches: state.active,
            awaiting_dispatch: state.gate.waiting(),
            dispatch_held: state.gate.is_held(),
            batches_closed: state.batches_closed,
            batches_dispatched: state.batches_dispatched,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State<I, O, E>> {
        // No user code runs under this lock, so a poisoned guard still holds
        // consistent bookkeeping.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply the closing rules until none fires.
    fn evaluate(&self, state: &mut State<I, O, E>) {
        loop {
            match closing::evaluate(state.queue.len(), state.active, &self.inner.config) {
                Closing::Now { take, reason } => self.close(state, take, reason),
                Closing::Defer { delay } => return self.defer(state, delay),
                Closing::Hold => return,
            }
        }
    }

    fn close(&self, state: &mut State<I, O, E>, take: usize, reason: CloseReason) {
        // supersedes any armed deferred close
        state.generation += 1;
        state.deferred = None;

        let id = state.next_batch_id;
        state.next_batch_id += 1;
        state.batches_closed += 1;
        let batch = Batch::close(id, state.queue.drain(..take));
        debug!(
            batch_id = id,
            size = batch.len(),
            active = state.active,
            reason = reason.as_str(),
            "batch closed"
        );
        state.gate.enqueue(batch);
    }

    fn defer(&self, state: &mut State<I, O, E>, delay: Duration) {
        if state.deferred.is_some() {
            return;
        }
        let generation = state.generation;
        state.deferred = Some(generation);
        trace!(delay_ms = delay.as_millis() as u64, "deferred close armed");

        let this = self.clone();
        self.inner.runtime.spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            this.fire_deferred(generation);
        });
    }

    fn fire_deferred(&self, generation: u64) {
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if state.deferred != Some(generation) {
                return;
            }
            state.deferred = None;
            let queued = state.queue.len();
            let take = self
                .inner
                .config
                .max_batch_size
                .map_or(queued, |max| queued.min(max));
            if take > 0 {
                self.close(state, take, CloseReason::Deferred);
            }
            self.evaluate(state);
        }
        self.pump();
    }

    /// Hand the dispatch lock to waiting batches in close order.
    ///
    /// Without pacing, batches are dispatched inline until the gate queue is
    /// empty. With pacing, the lock holder continues on a task and calls back
    /// into `pump` once it has released the lock.
    fn pump(&self) {
        loop {
            let mut batch = match self.lock_state().gate.try_acquire() {
                Some(batch) => batch,
                None => return,
            };
            if self.inner.pacing.is_none() {
                self.dispatch(batch);
                continue;
            }

            batch.advance(BatchState::Delaying);
            trace!(batch_id = batch.id(), size = batch.len(), "pacing batch");
            let step = panic::catch_unwind(AssertUnwindSafe(|| self.inner.pacing.start()));
            let this = self.clone();
            self.inner.runtime.spawn(async move {
                let paced = match step {
                    Ok(Some(step)) => AssertUnwindSafe(step).catch_unwind().await,
                    Ok(None) => Ok(Ok(())),
                    Err(panic) => Err(panic),
                };
                match paced {
                    Ok(Ok(())) => this.dispatch(batch),
                    Ok(Err(e)) => this.fail_pacing(batch, BatchError::Pacing(e)),
                    Err(_) => this.fail_pacing(batch, BatchError::Panicked),
                }
                this.pump();
            });
            return;
        }
    }

    /// Issue the batch operation and release the dispatch lock. Must be
    /// called by the lock holder.
    fn dispatch(&self, mut batch: Batch<I, O, E>) {
        let id = batch.id();
        let size = batch.len();
        let inputs = batch.take_inputs();
        let call = panic::catch_unwind(AssertUnwindSafe(|| (self.inner.operation)(inputs)));
        if call.is_ok() {
            batch.advance(BatchState::Dispatched);
        }
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            state.batches_dispatched += 1;
            if call.is_ok() {
                state.active += 1;
            }
            state.gate.release();
            debug!(batch_id = id, size, active = state.active, "batch dispatched");
            self.evaluate(state);
        }

        let call = match call {
            Ok(call) => call,
            Err(_) => {
                warn!(batch_id = id, size, "batch operation panicked");
                return batch.reject_all(BatchError::Panicked);
            }
        };
        let this = self.clone();
        self.inner.runtime.spawn(async move {
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(output) => batch.settle(output),
                Err(_) => {
                    warn!(batch_id = id, size, "batch operation panicked");
                    batch.reject_all(BatchError::Panicked);
                }
            }
            this.settled(id);
        });
    }

    fn fail_pacing(&self, batch: Batch<I, O, E>, err: BatchError<E>) {
        debug_assert_eq!(batch.state(), BatchState::Delaying);
        warn!(batch_id = batch.id(), size = batch.len(), "pacing step failed");
        batch.reject_all(err);
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.gate.release();
        self.evaluate(state);
    }

    fn settled(&self, id: u64) {
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            state.active = state.active.saturating_sub(1);
            debug!(batch_id = id, active = state.active, "batch settled");
            self.evaluate(state);
        }
        self.pump();
    }
}

/// Future returned by [`Batcher::submit`].
///
/// Dropping it does not withdraw the entry; the input is still sent with its
/// batch and the result is discarded.
#[must_use = "dropping a Submission discards its result"]
#[derive(Debug)]
pub struct Submission<O, E> {
    rx: oneshot::Receiver<std::result::Result<O, BatchError<E>>>,
}

impl<O, E> Future for Submission<O, E> {
    type Output = std::result::Result<O, BatchError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(BatchError::Abandoned)))
    }
}

/// Builder for [`Batcher`].
pub struct BatcherBuilder<I, O, E> {
    config: BatcherConfig,
    operation: Option<OperationFn<I, O, E>>,
    pacing_function: Option<Pacing<E>>,
    pacing_rate: Option<Arc<TokenBucket>>,
    runtime: Option<Handle>,
}

impl<I, O, E> BatcherBuilder<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            config: BatcherConfig::default(),
            operation: None,
            pacing_function: None,
            pacing_rate: None,
            runtime: None,
        }
    }

    /// Replace all numeric options at once.
    pub fn config(mut self, config: BatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// The expensive call being batched. It receives the inputs of one batch in
    /// arrival order and must yield exactly one result per input, or a single
    /// error for the whole batch.
    pub fn batch_operation<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchOutput<O, E>> + Send + 'static,
    {
        self.operation = Some(Arc::new(move |inputs| f(inputs).boxed()));
        self
    }

    /// Async step awaited under the dispatch lock before every batch. Takes
    /// precedence over `pacing_delay` and `pacing_rate`.
    pub fn pacing_function<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    {
        self.pacing_function = Some(Pacing::function(f));
        self
    }

    pub fn pacing_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.with_pacing_delay(delay);
        self
    }

    /// Pace dispatches through a token bucket, possibly shared with other
    /// batchers.
    pub fn pacing_rate(mut self, bucket: Arc<TokenBucket>) -> Self {
        self.pacing_rate = Some(bucket);
        self
    }

    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.config = self.config.with_max_batch_size(n);
        self
    }

    pub fn closing_thresholds<T: Into<Threshold>>(
        mut self,
        thresholds: impl IntoIterator<Item = T>,
    ) -> Self {
        self.config = self.config.with_closing_thresholds(thresholds);
        self
    }

    pub fn queuing_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.with_queuing_delay(delay);
        self
    }

    /// Runtime used for collaborator futures and timers. Defaults to the
    /// runtime current at `build`.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Batcher<I, O, E>> {
        self.config.validate()?;
        let operation = self.operation.ok_or_else(|| {
            Error::configuration_with_context(
                "a batch operation is required",
                ErrorContext::new()
                    .with_field_path("batch_operation")
                    .with_source("batcher_builder"),
            )
        })?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                Error::runtime_with_context(
                    "batcher must be built inside a Tokio runtime",
                    ErrorContext::new()
                        .with_details(e.to_string())
                        .with_source("batcher_builder"),
                )
            })?,
        };
        let pacing = if let Some(function) = self.pacing_function {
            function
        } else if let Some(delay) = self.config.pacing_delay() {
            Pacing::Delay(delay)
        } else if let Some(bucket) = self.pacing_rate {
            Pacing::RateLimited(bucket)
        } else {
            Pacing::None
        };
        debug!(config = ?self.config, pacing = ?pacing, "batcher built");

        Ok(Batcher {
            inner: Arc::new(Inner {
                config: self.config,
                operation,
                pacing,
                runtime,
                state: Mutex::new(State::new()),
            }),
        })
    }
}

impl<I, O, E> Default for BatcherBuilder<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
