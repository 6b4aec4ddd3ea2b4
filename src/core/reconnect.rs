//! Reconnection with exponential backoff
//!
//! The health monitor in `ConnectionManager` decides *when* a connection is
//! unhealthy; this module owns *how* it is brought back: bounded attempts,
//! `base × 2^(attempt-1)` delays, and an early exit on authentication errors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::errors::ExchangeError;
use crate::adapters::traits::ExchangeAdapter;
use crate::adapters::types::Credentials;
use crate::config::HealthConfig;

/// Upper bound for a single backoff sleep
pub const MAX_BACKOFF_MS: u64 = 5 * 60 * 1_000;

/// Delay before reconnect attempt `attempt` (1-based)
///
/// `base_ms × 2^(attempt-1)`, saturating and capped at `MAX_BACKOFF_MS`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let ms = base_ms.saturating_mul(1u64 << exponent).min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_attempts: 5,
        }
    }
}

impl From<&HealthConfig> for ReconnectPolicy {
    fn from(config: &HealthConfig) -> Self {
        Self {
            base_delay_ms: config.reconnect_base_delay_ms,
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectOutcome {
    Reconnected { attempts: u32 },
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, reason: String },
    /// Authentication rejected; retrying is pointless
    Fatal { attempts: u32, error: ExchangeError },
    Cancelled,
}

/// Tear down and reconnect `adapter` until it succeeds or the policy runs out
///
/// `on_attempt(attempt, delay)` is invoked before each backoff sleep. The
/// adapter lock is only held for the disconnect/connect pair of one attempt.
pub async fn reconnect_with_backoff<A, F>(
    adapter: &Arc<RwLock<A>>,
    credentials: &Credentials,
    policy: ReconnectPolicy,
    cancel: &CancellationToken,
    mut on_attempt: F,
) -> ReconnectOutcome
where
    A: ExchangeAdapter + 'static,
    F: FnMut(u32, Duration),
{
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return ReconnectOutcome::Cancelled;
        }
        let delay = backoff_delay(policy.base_delay_ms, attempt);
        on_attempt(attempt, delay);

        tokio::select! {
            _ = cancel.cancelled() => return ReconnectOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }

        let result = {
            let mut guard = adapter.write().await;
            // An explicit connect or disconnect may have run while we waited
            if cancel.is_cancelled() {
                return ReconnectOutcome::Cancelled;
            }
            let exchange = guard.exchange_name();
            if let Err(e) = guard.disconnect().await {
                warn!(exchange = exchange, error = %e, "[RECONNECT] Teardown before reconnect failed");
            }
            guard.connect(credentials).await
        };

        match result {
            Ok(()) => {
                info!(attempt = attempt, "[RECONNECT] Reconnection successful");
                return ReconnectOutcome::Reconnected { attempts: attempt };
            }
            Err(e) if e.is_fatal() => {
                return ReconnectOutcome::Fatal {
                    attempts: attempt,
                    error: e,
                };
            }
            Err(e) => {
                warn!(attempt = attempt, max = policy.max_attempts, error = %e, "[RECONNECT] Attempt failed");
                last_error = e.to_string();
            }
        }
    }

    ReconnectOutcome::Exhausted {
        attempts: policy.max_attempts,
        reason: last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_utils::{MockControl, TestMockAdapter};
    use proptest::prelude::*;

    #[test]
    fn test_backoff_sequence() {
        assert_eq!(backoff_delay(1_000, 1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(1_000, 2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(1_000, 5), Duration::from_millis(16_000));
        assert_eq!(backoff_delay(1_000, 40), Duration::from_millis(MAX_BACKOFF_MS));
    }

    proptest! {
        #[test]
        fn prop_backoff_bounded_and_monotonic(base in 1u64..60_000, attempt in 1u32..64) {
            let current = backoff_delay(base, attempt);
            let next = backoff_delay(base, attempt + 1);
            prop_assert!(current >= Duration::from_millis(base.min(MAX_BACKOFF_MS)));
            prop_assert!(current <= Duration::from_millis(MAX_BACKOFF_MS));
            prop_assert!(next >= current);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_succeeds_after_retryable_failures() {
        let control = MockControl::new();
        let adapter = Arc::new(RwLock::new(TestMockAdapter::with_control("mock", control.clone())));
        control.fail_connect_with(Some(ExchangeError::Network("down".into())));

        let flip = {
            let control = control.clone();
            move |attempt: u32, _delay: Duration| {
                if attempt == 3 {
                    control.fail_connect_with(None);
                }
            }
        };
        let outcome = reconnect_with_backoff(
            &adapter,
            &Credentials::new("k", "s"),
            ReconnectPolicy { base_delay_ms: 100, max_attempts: 5 },
            &CancellationToken::new(),
            flip,
        )
        .await;

        assert_eq!(outcome, ReconnectOutcome::Reconnected { attempts: 3 });
        assert!(adapter.read().await.is_connected());
        assert_eq!(control.connect_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_never_exceeds_max_attempts() {
        let control = MockControl::new();
        control.fail_connect_with(Some(ExchangeError::Network("down".into())));
        let adapter = Arc::new(RwLock::new(TestMockAdapter::with_control("mock", control.clone())));

        let mut delays = Vec::new();
        let outcome = reconnect_with_backoff(
            &adapter,
            &Credentials::new("k", "s"),
            ReconnectPolicy { base_delay_ms: 100, max_attempts: 4 },
            &CancellationToken::new(),
            |_, delay| delays.push(delay.as_millis() as u64),
        )
        .await;

        assert!(matches!(outcome, ReconnectOutcome::Exhausted { attempts: 4, .. }));
        assert_eq!(control.connect_calls(), 4);
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_error_stops_immediately() {
        let control = MockControl::new();
        control.fail_connect_with(Some(ExchangeError::Authentication("revoked".into())));
        let adapter = Arc::new(RwLock::new(TestMockAdapter::with_control("mock", control.clone())));

        let outcome = reconnect_with_backoff(
            &adapter,
            &Credentials::new("k", "s"),
            ReconnectPolicy::default(),
            &CancellationToken::new(),
            |_, _| {},
        )
        .await;

        assert!(matches!(outcome, ReconnectOutcome::Fatal { attempts: 1, .. }));
        assert_eq!(control.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_adapter_lock() {
        let control = MockControl::new();
        let adapter = Arc::new(RwLock::new(TestMockAdapter::with_control("mock", control.clone())));
        let cancel = CancellationToken::new();

        let guard = adapter.write().await;
        let task = {
            let adapter = Arc::clone(&adapter);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                reconnect_with_backoff(
                    &adapter,
                    &Credentials::new("k", "s"),
                    ReconnectPolicy { base_delay_ms: 100, max_attempts: 3 },
                    &cancel,
                    |_, _| {},
                )
                .await
            })
        };
        // Backoff elapses, the attempt now blocks on the lock
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        drop(guard);

        assert_eq!(task.await.unwrap(), ReconnectOutcome::Cancelled);
        assert_eq!(control.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let adapter = Arc::new(RwLock::new(TestMockAdapter::new("mock")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = reconnect_with_backoff(
            &adapter,
            &Credentials::new("k", "s"),
            ReconnectPolicy::default(),
            &cancel,
            |_, _| {},
        )
        .await;
        assert_eq!(outcome, ReconnectOutcome::Cancelled);
        assert!(!adapter.read().await.is_connected());
    }
}
