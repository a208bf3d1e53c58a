//! Reconnection pacing
//!
//! Exponential backoff with jitter. Attempts are never slept on inline: a call
//! made before the next attempt is due fails fast, so a dead station costs an
//! update cycle almost nothing.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Reconnection error types
#[derive(Error, Debug)]
pub enum ReconnectError {
    /// Maximum retry attempts exceeded
    #[error("Maximum reconnection attempts exceeded")]
    MaxAttemptsExceeded,

    /// Next attempt not due yet
    #[error("Reconnect backoff, next attempt in {0:?}")]
    Backoff(Duration),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Connection state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    /// Reconnection failed (max attempts reached)
    Failed,
}

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Maximum retry attempts (0 means unlimited)
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for the delay, in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier for exponential delay
    pub backoff_multiplier: f64,
    /// Whether to add ±25% jitter to delays
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Reconnection statistics tracking
#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    pub last_connected: Option<Instant>,
}

/// Reconnection helper with backoff and statistics
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    state: ConnectionState,
    /// Consecutive failed attempts
    failures: u32,
    next_attempt: Option<Instant>,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            failures: 0,
            next_attempt: None,
            stats: ReconnectStats::default(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.failures = 0;
        self.next_attempt = None;
        self.stats.last_connected = Some(Instant::now());
        debug!("Connection marked as successful");
    }

    /// Connection lost; the next attempt may start immediately
    pub fn mark_disconnected(&mut self) {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Disconnected;
            debug!("Connection marked as disconnected");
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures
    pub fn calculate_next_delay(&self) -> Duration {
        let exponent = self.failures.saturating_sub(1).min(32) as i32;
        let base = Duration::from_millis(self.policy.initial_delay_ms);
        let max = Duration::from_millis(self.policy.max_delay_ms);

        let mut delay = base.mul_f64(self.policy.backoff_multiplier.max(1.0).powi(exponent));
        if delay > max {
            delay = max;
        }

        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }

    /// Remaining backoff at `now`, if an attempt is not yet due
    pub fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.next_attempt
            .and_then(|at| at.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    /// Run one connection attempt if the policy allows it now
    pub async fn execute_reconnect<F, Fut, T, E>(&mut self, connect_fn: F) -> Result<T, ReconnectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if self.policy.max_attempts > 0 && self.failures >= self.policy.max_attempts {
            self.state = ConnectionState::Failed;
            return Err(ReconnectError::MaxAttemptsExceeded);
        }
        if let Some(remaining) = self.backoff_remaining(Instant::now()) {
            return Err(ReconnectError::Backoff(remaining));
        }

        self.state = ConnectionState::Reconnecting;
        self.stats.total_attempts += 1;
        let start_time = Instant::now();

        match connect_fn().await {
            Ok(value) => {
                if self.failures > 0 {
                    info!(
                        "Reconnection successful after {:?} ({} failed attempts)",
                        start_time.elapsed(),
                        self.failures
                    );
                    self.stats.successful_reconnects += 1;
                }
                self.mark_connected();
                Ok(value)
            },
            Err(e) => {
                self.failures += 1;
                self.stats.failed_reconnects += 1;
                let delay = self.calculate_next_delay();
                self.next_attempt = Some(Instant::now() + delay);
                warn!(
                    "Connection attempt {} failed: {}, next attempt in {:?}",
                    self.failures, e, delay
                );

                self.state = if self.policy.max_attempts == 0
                    || self.failures < self.policy.max_attempts
                {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Failed
                };

                Err(ReconnectError::ConnectionFailed(e.to_string()))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let mut helper = ReconnectHelper::new(policy(5));

        helper.failures = 1;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(100));

        helper.failures = 2;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(200));

        helper.failures = 4;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(800));
    }

    #[test]
    fn test_max_delay_limit() {
        let mut helper = ReconnectHelper::new(ReconnectPolicy {
            max_delay_ms: 5_000,
            initial_delay_ms: 1_000,
            ..policy(10)
        });
        helper.failures = 10;
        assert_eq!(helper.calculate_next_delay(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_failed_attempt_schedules_backoff() {
        let mut helper = ReconnectHelper::new(policy(0));

        let result = helper
            .execute_reconnect(|| async { Err::<(), _>("refused") })
            .await;
        assert!(matches!(result, Err(ReconnectError::ConnectionFailed(_))));
        assert_eq!(helper.connection_state(), ConnectionState::Disconnected);

        // Second call inside the backoff window fails fast without connecting
        let mut called = false;
        let result = helper
            .execute_reconnect(|| {
                called = true;
                async { Ok::<(), &str>(()) }
            })
            .await;
        assert!(matches!(result, Err(ReconnectError::Backoff(_))));
        assert!(!called);
    }

    #[tokio::test]
    async fn test_max_attempts() {
        let mut helper = ReconnectHelper::new(ReconnectPolicy {
            initial_delay_ms: 0,
            ..policy(2)
        });

        for _ in 0..2 {
            let result = helper
                .execute_reconnect(|| async { Err::<(), _>("Connection failed") })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(helper.connection_state(), ConnectionState::Failed);

        let result = helper
            .execute_reconnect(|| async { Ok::<(), &str>(()) })
            .await;
        assert!(matches!(result, Err(ReconnectError::MaxAttemptsExceeded)));
    }

    #[tokio::test]
    async fn test_successful_reconnect_returns_value() {
        let mut helper = ReconnectHelper::new(ReconnectPolicy::default());

        let result = helper
            .execute_reconnect(|| async { Ok::<u8, &str>(7) })
            .await;
        assert_eq!(result.ok(), Some(7));
        assert_eq!(helper.connection_state(), ConnectionState::Connected);
        assert_eq!(helper.stats().total_attempts, 1);

        helper.mark_disconnected();
        assert_eq!(helper.connection_state(), ConnectionState::Disconnected);
        assert!(helper.backoff_remaining(Instant::now()).is_none());
    }
}
