//! Retry/dead-letter state transitions
//!
//! The consumer funnels every delivery through [`RetryPolicy`] and acts on
//! the returned [`RetryAction`]; the branching lives here so the state
//! machine is testable without a broker.

use std::time::Duration;

/// What the consumer does with a delivery after an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Acknowledge; processing succeeded
    Ack,
    /// Acknowledge the original and republish the same body with the bumped
    /// retry header after the backoff delay
    Republish {
        /// Retry count carried on the republished message
        retry_count: u32,
        /// Backoff before the republish
        delay: Duration,
    },
    /// Acknowledge and drop; the queue TTL/dead-letter binding is the
    /// disposal path
    Drop(DropReason),
}

/// Why a delivery was dropped instead of retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Body not decodable as a package event
    Malformed,
    /// Retry budget spent
    RetriesExhausted,
    /// Failure that can never succeed on retry
    Terminal,
}

impl DropReason {
    /// Metric label for this reason
    pub fn as_label(&self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::RetriesExhausted => "retries_exhausted",
            DropReason::Terminal => "terminal",
        }
    }
}

/// Retry policy: bounded attempts with linear backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Max processing attempts
    pub max_retries: u32,
    /// Base delay; attempt `n` (0-indexed) waits `retry_delay × (n + 1)`
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Whether the retry budget is spent for a message delivered with this
    /// retry count
    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Linear backoff: the delay grows by a fixed increment per attempt
    pub fn backoff(&self, retry_count: u32) -> Duration {
        self.retry_delay * (retry_count + 1)
    }

    /// Transition for a failed attempt delivered with `retry_count`
    pub fn on_failure(&self, retry_count: u32, terminal: bool) -> RetryAction {
        if terminal {
            RetryAction::Drop(DropReason::Terminal)
        } else if self.exhausted(retry_count) {
            RetryAction::Drop(DropReason::RetriesExhausted)
        } else {
            RetryAction::Republish {
                retry_count: retry_count + 1,
                delay: self.backoff(retry_count),
            }
        }
    }
}
