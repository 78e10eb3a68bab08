//! Retry backoff for controller passes that fail transiently.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear increase: delay * attempt
    Linear,
    /// Exponential increase: delay * 2^attempt
    Exponential,
    /// Exponential with jitter to prevent thundering herd
    ExponentialWithJitter,
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt number
    ///
    /// # Arguments
    /// - `attempt`: Zero-based attempt number (0 = first retry)
    /// - `initial_delay`: Base delay duration
    /// - `max_delay`: Maximum delay duration
    pub fn calculate_delay(
        &self,
        attempt: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Duration {
        use rand::Rng;

        let delay = match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Linear => initial_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => initial_delay.saturating_mul(2u32.saturating_pow(attempt)),
            BackoffStrategy::ExponentialWithJitter => {
                let base_delay = initial_delay.saturating_mul(2u32.saturating_pow(attempt));
                let jitter =
                    (base_delay.as_millis() as f64 * 0.1 * rand::thread_rng().gen::<f64>()) as u64;
                base_delay.saturating_add(Duration::from_millis(jitter))
            }
        };

        delay.min(max_delay)
    }
}

/// Retry settings for a controller runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff strategy to use
    pub strategy: BackoffStrategy,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::ExponentialWithJitter,
            initial_delay_ms: 200,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Cap on any single retry delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Start tracking consecutive failures.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            config: self.clone(),
            attempt: 0,
        }
    }
}

/// Consecutive-failure tracker. Reset after every successful pass.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    /// Delay before the next retry; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.strategy.calculate_delay(
            self.attempt,
            self.config.initial_delay(),
            self.config.max_delay(),
        );
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Consecutive failures so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Forget past failures.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_until_capped() {
        let strategy = BackoffStrategy::Exponential;
        let initial = Duration::from_millis(200);
        let max = Duration::from_secs(1);
        assert_eq!(strategy.calculate_delay(0, initial, max), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(2, initial, max), Duration::from_millis(800));
        assert_eq!(strategy.calculate_delay(3, initial, max), max);
        assert_eq!(strategy.calculate_delay(u32::MAX, initial, max), max);
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let strategy = BackoffStrategy::ExponentialWithJitter;
        let initial = Duration::from_millis(100);
        for _ in 0..32 {
            let delay = strategy.calculate_delay(1, initial, Duration::from_secs(10));
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(220));
        }
    }

    #[test]
    fn backoff_resets() {
        let mut backoff = RetryConfig {
            strategy: BackoffStrategy::Linear,
            initial_delay_ms: 10,
            max_delay_ms: 1_000,
        }
        .backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.attempts(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }
}
