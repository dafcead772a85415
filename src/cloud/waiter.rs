//! Polling waiter for resources that settle asynchronously.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

use crate::error::{HotswapError, Result, WaiterExit};

/// Result of one waiter probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitState {
    /// The resource reached the expected state.
    Success,
    /// Not there yet. Carries the observed response.
    Retry(String),
    /// The resource reached a state it will not leave.
    Failure {
        /// Observed state.
        observed: String,
        /// Reason reported by the service.
        reason: Option<String>,
    },
}

/// Polls a probe until it succeeds, fails or runs out of attempts.
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    /// Delay between probes.
    delay: Duration,
    /// Maximum number of probes.
    max_attempts: u32,
}

impl Waiter {
    /// Creates a waiter.
    #[must_use]
    pub const fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// Probes until `probe` reports success.
    ///
    /// # Errors
    ///
    /// Returns [`HotswapError::Waiter`] with the observed responses when the
    /// probe reports a failure or the attempts run out, and any error the
    /// probe itself returns.
    pub async fn wait<F, Fut>(&self, mut probe: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<WaitState>>,
    {
        let mut observed_responses: BTreeMap<String, u32> = BTreeMap::new();
        let mut last_observed = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay).await;
            }

            match probe().await? {
                WaitState::Success => return Ok(()),
                WaitState::Retry(observed) => {
                    trace!("Waiter attempt {attempt}: {observed}");
                    *observed_responses.entry(observed.clone()).or_default() += 1;
                    last_observed = Some(observed);
                }
                WaitState::Failure { observed, reason } => {
                    *observed_responses.entry(observed).or_default() += 1;
                    return Err(HotswapError::Waiter {
                        exit: WaiterExit::Abort,
                        state: String::from("FAILURE"),
                        reason,
                        observed_responses,
                    }
                    .into());
                }
            }
        }

        Err(HotswapError::Waiter {
            exit: WaiterExit::Timeout,
            state: String::from("TIMEOUT"),
            reason: last_observed.map(|observed| format!("Last observed response: {observed}")),
            observed_responses,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeployError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_wait_succeeds_after_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let waiter = Waiter::new(Duration::ZERO, 5);

        waiter
            .wait(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(WaitState::Retry(String::from("InProgress")))
                } else {
                    Ok(WaitState::Success)
                }
            })
            .await
            .expect("waiter should succeed");

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_times_out_with_observed_responses() {
        let waiter = Waiter::new(Duration::ZERO, 3);

        let err = waiter
            .wait(|| async { Ok(WaitState::Retry(String::from("InProgress"))) })
            .await
            .expect_err("waiter should time out");

        match err {
            DeployError::Hotswap(HotswapError::Waiter {
                exit,
                observed_responses,
                ..
            }) => {
                assert_eq!(exit, WaiterExit::Timeout);
                assert_eq!(observed_responses.get("InProgress"), Some(&3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wait_aborts_on_failure() {
        let waiter = Waiter::new(Duration::ZERO, 10);

        let err = waiter
            .wait(|| async {
                Ok(WaitState::Failure {
                    observed: String::from("Failed"),
                    reason: Some(String::from("bad image")),
                })
            })
            .await
            .expect_err("waiter should abort");

        assert!(matches!(
            err,
            DeployError::Hotswap(HotswapError::Waiter {
                exit: WaiterExit::Abort,
                ..
            })
        ));
    }
}
