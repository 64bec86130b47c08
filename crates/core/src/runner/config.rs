//! Runner configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_base_ms() -> u64 {
    30_000
}

fn default_retry_backoff_max_ms() -> u64 {
    300_000
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_cancel_poll_interval_ms() -> u64 {
    1_000
}

fn default_sweep_batch_size() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Concurrent workers pulling from the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Total attempts per task, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per retry.
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
    /// Interval of the pending sweep that re-enqueues waiting tasks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often the cancellation watcher re-reads an in-flight task.
    #[serde(default = "default_cancel_poll_interval_ms")]
    pub cancel_poll_interval_ms: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            cancel_poll_interval_ms: default_cancel_poll_interval_ms(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }
}

impl RunnerConfig {
    /// Exponential backoff before the attempt following `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .retry_backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_backoff_max_ms);
        Duration::from_millis(backoff)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RunnerConfig {
            retry_backoff_base_ms: 30_000,
            retry_backoff_max_ms: 300_000,
            ..Default::default()
        };
        assert_eq!(config.backoff_for(1), Duration::from_millis(30_000));
        assert_eq!(config.backoff_for(2), Duration::from_millis(60_000));
        assert_eq!(config.backoff_for(3), Duration::from_millis(120_000));
        assert_eq!(config.backoff_for(10), Duration::from_millis(300_000));
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_attempts, 3);
    }
}
