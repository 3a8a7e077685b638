//! Queue closing evaluation.

use super::config::BatcherConfig;
use std::time::Duration;

/// Why a prefix of the queue was closed into a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    MaxBatchSize,
    Threshold,
    Deferred,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::MaxBatchSize => "max_batch_size",
            CloseReason::Threshold => "threshold",
            CloseReason::Deferred => "deferred",
        }
    }
}

/// Result of evaluating the queue against the closing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closing {
    /// Close the first `take` entries immediately.
    Now { take: usize, reason: CloseReason },
    /// Close the whole queue after `delay`; zero means the next scheduling turn.
    Defer { delay: Duration },
    /// Leave the queue open until the next enqueue or settlement.
    Hold,
}

/// Apply the closing rules to a queue of `queued` entries while `active`
/// batches are in flight.
///
/// `max_batch_size` always wins. Below it, configured thresholds gate
/// closing: a queue shorter than the threshold for the current active count
/// waits. Without thresholds any non-empty queue closes on a later turn so
/// that a synchronous burst of submissions shares one batch.
pub fn evaluate(queued: usize, active: usize, config: &BatcherConfig) -> Closing {
    if queued == 0 {
        return Closing::Hold;
    }
    if let Some(max) = config.max_batch_size {
        if queued >= max {
            return Closing::Now {
                take: max,
                reason: CloseReason::MaxBatchSize,
            };
        }
    }
    let delay = config.queuing_delay();
    match config.threshold_for(active) {
        Some(threshold) if threshold.reached(queued) => {
            if delay.is_zero() {
                Closing::Now {
                    take: queued,
                    reason: CloseReason::Threshold,
                }
            } else {
                Closing::Defer { delay }
            }
        }
        Some(_) => Closing::Hold,
        None => Closing::Defer { delay },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Threshold;

    #[test]
    fn test_empty_queue_holds() {
        let config = BatcherConfig::new().with_max_batch_size(1);
        assert_eq!(evaluate(0, 0, &config), Closing::Hold);
    }

    #[test]
    fn test_default_defers_to_next_turn() {
        let config = BatcherConfig::default();
        assert_eq!(
            evaluate(3, 0, &config),
            Closing::Defer {
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            evaluate(3, 5, &config),
            Closing::Defer {
                delay: Duration::ZERO
            }
        );
    }

    #[test]
    fn test_max_batch_size_takes_prefix() {
        let config = BatcherConfig::new().with_max_batch_size(2);
        assert_eq!(
            evaluate(1, 0, &config),
            Closing::Defer {
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            evaluate(3, 0, &config),
            Closing::Now {
                take: 2,
                reason: CloseReason::MaxBatchSize
            }
        );
    }

    #[test]
    fn test_max_batch_size_overrides_threshold() {
        let config = BatcherConfig::new()
            .with_max_batch_size(1)
            .with_closing_thresholds([Threshold::Count(1), Threshold::Unbounded]);
        assert_eq!(
            evaluate(1, 1, &config),
            Closing::Now {
                take: 1,
                reason: CloseReason::MaxBatchSize
            }
        );
    }

    #[test]
    fn test_threshold_indexed_by_active_count() {
        let config = BatcherConfig::new()
            .with_closing_thresholds([Threshold::Count(1), Threshold::Count(2)]);
        assert_eq!(
            evaluate(1, 0, &config),
            Closing::Now {
                take: 1,
                reason: CloseReason::Threshold
            }
        );
        assert_eq!(evaluate(1, 1, &config), Closing::Hold);
        assert_eq!(
            evaluate(2, 1, &config),
            Closing::Now {
                take: 2,
                reason: CloseReason::Threshold
            }
        );
        // clamped to the last threshold
        assert_eq!(evaluate(1, 4, &config), Closing::Hold);
        assert_eq!(
            evaluate(2, 4, &config),
            Closing::Now {
                take: 2,
                reason: CloseReason::Threshold
            }
        );
    }

    #[test]
    fn test_unbounded_threshold_holds() {
        let config = BatcherConfig::new()
            .with_closing_thresholds([Threshold::Count(1), Threshold::Unbounded]);
        assert_eq!(evaluate(100, 1, &config), Closing::Hold);
    }

    #[test]
    fn test_only_unbounded_falls_back_to_deferred_close() {
        let config = BatcherConfig::new().with_closing_thresholds([Threshold::Unbounded]);
        assert_eq!(
            evaluate(1, 0, &config),
            Closing::Defer {
                delay: Duration::ZERO
            }
        );
    }

    #[test]
    fn test_queuing_delay_defers_threshold_close() {
        let config = BatcherConfig::new()
            .with_closing_thresholds([Threshold::Count(1)])
            .with_queuing_delay(Duration::from_millis(10));
        assert_eq!(
            evaluate(1, 0, &config),
            Closing::Defer {
                delay: Duration::from_millis(10)
            }
        );
    }
}
