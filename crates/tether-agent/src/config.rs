//! Orchestrator configuration

use std::time::Duration;

/// Retry policy shared by every externally invoked operation.
///
/// Backoff is fixed: every retry waits `interval`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay between attempts
    pub interval: Duration,
    /// Timeout for a single attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::ZERO,
            timeout,
        }
    }

    /// Delay before the attempt following `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, _attempt: u32) -> Duration {
        self.interval
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Limits for the default history-size advisory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLimits {
    /// Operations per epoch before continuing under a fresh state
    pub max_steps: u64,
    /// Estimated transcript tokens before continuing under a fresh state
    pub max_estimated_tokens: u32,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_steps: 200,
            max_estimated_tokens: 48_000,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Token budget for the context handed to think and observe
    pub max_context_tokens: u32,
    /// Retry policy for think/act/observe/compact/persist
    pub retry: RetryPolicy,
    /// Limits used by [`crate::operations::HistoryThreshold`]
    pub history: HistoryLimits,
    /// Save a snapshot every time the loop pauses after an answer
    pub checkpoint_on_answer: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 12_000,
            retry: RetryPolicy::default(),
            history: HistoryLimits::default(),
            checkpoint_on_answer: true,
        }
    }
}
