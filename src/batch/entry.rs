//! Entry and batch bookkeeping.

use crate::error::BatchError;
use tokio::sync::oneshot;
use tracing::{trace, warn};

pub(crate) type Reply<O, E> = oneshot::Sender<Result<O, BatchError<E>>>;

/// Output of a batch operation: one tagged result per input, or a failure
/// shared by the whole batch.
pub type BatchOutput<O, E> = Result<Vec<Result<O, E>>, E>;

/// One outstanding submission.
pub(crate) struct Entry<I, O, E> {
    pub(crate) input: I,
    pub(crate) reply: Reply<O, E>,
}

impl<I, O, E> Entry<I, O, E> {
    pub(crate) fn new(input: I, reply: Reply<O, E>) -> Self {
        Self { input, reply }
    }
}

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchState {
    /// Entries are still in the queue.
    Forming,
    /// Removed from the queue, waiting for the dispatch lock.
    Closing,
    /// Holding the dispatch lock while the pacing step runs.
    Delaying,
    /// Operation issued, lock released.
    Dispatched,
    Settled,
}

impl BatchState {
    pub fn can_transition_to(self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Forming, Closing)
                | (Closing, Delaying)
                | (Closing, Dispatched)
                | (Closing, Settled)
                | (Delaying, Dispatched)
                | (Delaying, Settled)
                | (Dispatched, Settled)
        )
    }
}

/// A fixed group of entries closed together.
///
/// Inputs are handed to the batch operation at dispatch; the replies stay
/// behind so every member can be settled afterwards.
pub(crate) struct Batch<I, O, E> {
    id: u64,
    state: BatchState,
    inputs: Vec<I>,
    replies: Vec<Reply<O, E>>,
}

impl<I, O, E> Batch<I, O, E> {
    pub(crate) fn close(id: u64, entries: impl IntoIterator<Item = Entry<I, O, E>>) -> Self {
        let (inputs, replies): (Vec<I>, Vec<Reply<O, E>>) = entries
            .into_iter()
            .map(|entry| (entry.input, entry.reply))
            .unzip();
        let mut batch = Self {
            id,
            state: BatchState::Forming,
            inputs,
            replies,
        };
        batch.advance(BatchState::Closing);
        batch
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn len(&self) -> usize {
        self.replies.len()
    }

    pub(crate) fn state(&self) -> BatchState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: BatchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid batch transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(batch_id = self.id, from = ?self.state, to = ?next, "batch state");
        self.state = next;
    }

    pub(crate) fn take_inputs(&mut self) -> Vec<I> {
        std::mem::take(&mut self.inputs)
    }
}

impl<I, O, E: Clone> Batch<I, O, E> {
    /// Reject every member with the same error.
    pub(crate) fn reject_all(mut self, err: BatchError<E>) {
        self.advance(BatchState::Settled);
        for reply in self.replies.drain(..) {
            // A dropped receiver only means the caller stopped listening.
            let _ = reply.send(Err(err.clone()));
        }
    }

    /// Fan a batch operation's output out to the members.
    pub(crate) fn settle(mut self, output: BatchOutput<O, E>) {
        let results = match output {
            Ok(results) => results,
            Err(e) => {
                warn!(batch_id = self.id, size = self.len(), "batch operation failed");
                return self.reject_all(BatchError::Batch(e));
            }
        };
        if results.len() != self.len() {
            warn!(
                batch_id = self.id,
                expected = self.len(),
                actual = results.len(),
                "batch operation returned invalid output length"
            );
            let err = BatchError::InvalidOutputLength {
                expected: self.len(),
                actual: results.len(),
            };
            return self.reject_all(err);
        }
        self.advance(BatchState::Settled);
        for (reply, result) in self.replies.drain(..).zip(results) {
            let _ = reply.send(result.map_err(BatchError::Item));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBatch = Batch<u32, String, String>;
    type Receivers = Vec<oneshot::Receiver<Result<String, BatchError<String>>>>;

    fn batch_of(inputs: &[u32]) -> (TestBatch, Receivers) {
        let mut rxs = Vec::new();
        let entries: Vec<_> = inputs
            .iter()
            .map(|&i| {
                let (tx, rx) = oneshot::channel();
                rxs.push(rx);
                Entry::new(i, tx)
            })
            .collect();
        (Batch::close(1, entries), rxs)
    }

    fn collect(rxs: Receivers) -> Vec<Result<String, BatchError<String>>> {
        rxs.into_iter()
            .map(|mut rx| rx.try_recv().expect("entry settled"))
            .collect()
    }

    #[test]
    fn test_close_keeps_order() {
        let (mut batch, _rxs) = batch_of(&[3, 1, 2]);
        assert_eq!(batch.state(), BatchState::Closing);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.take_inputs(), vec![3, 1, 2]);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_settle_maps_positions() {
        let (mut batch, rxs) = batch_of(&[1, 2, 3]);
        batch.advance(BatchState::Dispatched);
        batch.settle(Ok(vec![
            Ok("one".to_string()),
            Err("missing".to_string()),
            Ok("three".to_string()),
        ]));
        assert_eq!(
            collect(rxs),
            vec![
                Ok("one".to_string()),
                Err(BatchError::Item("missing".to_string())),
                Ok("three".to_string()),
            ]
        );
    }

    #[test]
    fn test_settle_whole_batch_failure() {
        let (mut batch, rxs) = batch_of(&[1, 2]);
        batch.advance(BatchState::Dispatched);
        batch.settle(Err("down".to_string()));
        for result in collect(rxs) {
            assert_eq!(result, Err(BatchError::Batch("down".to_string())));
        }
    }

    #[test]
    fn test_settle_invalid_length() {
        let (mut batch, rxs) = batch_of(&[1, 2, 3]);
        batch.advance(BatchState::Dispatched);
        batch.settle(Ok(vec![Ok("a".to_string())]));
        for result in collect(rxs) {
            assert_eq!(
                result,
                Err(BatchError::InvalidOutputLength {
                    expected: 3,
                    actual: 1
                })
            );
        }
    }

    #[test]
    fn test_settle_tolerates_dropped_receiver() {
        let (mut batch, mut rxs) = batch_of(&[1, 2]);
        drop(rxs.remove(0));
        batch.advance(BatchState::Dispatched);
        batch.settle(Ok(vec![Ok("a".to_string()), Ok("b".to_string())]));
        assert_eq!(collect(rxs), vec![Ok("b".to_string())]);
    }

    #[test]
    fn test_state_transitions() {
        use BatchState::*;
        assert!(Forming.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Dispatched));
        assert!(Delaying.can_transition_to(Settled));
        assert!(!Dispatched.can_transition_to(Delaying));
        assert!(!Settled.can_transition_to(Closing));
        assert!(!Forming.can_transition_to(Dispatched));
    }
}
