//! Wait-for-state poller
//!
//! Polls a refresh callback until the object it observes reaches one of a set
//! of target states, the way an instance is walked to `stopped` before it can
//! be deleted.

use crate::client::{self, ClientError};
use crate::timeouts::MAX_TIMEOUT;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant};

/// State tag reported when the refresh call returns not-found
pub const NOT_FOUND_STATE: &str = "";

#[derive(Error, Debug)]
pub enum WaitError {
    #[error("timeout after {timeout:?} waiting for state {target:?} (last state: {last_state:?})")]
    Timeout {
        target: Vec<String>,
        last_state: String,
        timeout: Duration,
    },
    #[error("unexpected state {state:?}, wanted target {target:?}")]
    UnexpectedState { state: String, target: Vec<String> },
    #[error("error refreshing state: {0}")]
    Refresh(#[from] ClientError),
}

/// Poll configuration
#[derive(Debug, Clone)]
pub struct StateChangeConf<'a> {
    /// States that keep the poller waiting
    pub pending: &'a [&'a str],
    /// States that end the wait successfully
    pub target: &'a [&'a str],
    /// Wait before the first refresh
    pub delay: Duration,
    /// Wait between refreshes
    pub poll_interval: Duration,
    /// Overall budget, including `delay`
    pub timeout: Duration,
}

impl StateChangeConf<'_> {
    /// Poll `refresh` until it reports a target state.
    ///
    /// `refresh` returns the observed object and its state tag. A not-found
    /// error is an observation with no object and the [`NOT_FOUND_STATE`] tag;
    /// any other error ends the wait. No refresh is started once the timeout
    /// has elapsed, and one in flight at the deadline is abandoned.
    pub async fn wait_for_state<T, F, Fut>(&self, mut refresh: F) -> Result<Option<T>, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = client::Result<(T, String)>>,
    {
        let deadline = Instant::now() + self.timeout.min(MAX_TIMEOUT);
        let mut last_state = String::new();

        if !self.delay.is_zero() {
            time::sleep_until(deadline.min(Instant::now() + self.delay)).await;
        }

        loop {
            if Instant::now() >= deadline {
                return Err(self.timeout_error(last_state));
            }

            let (value, state) = match time::timeout_at(deadline, refresh()).await {
                Err(_) => return Err(self.timeout_error(last_state)),
                Ok(Ok((value, state))) => (Some(value), state),
                Ok(Err(e)) if e.is_not_found() => (None, NOT_FOUND_STATE.to_string()),
                Ok(Err(e)) => return Err(WaitError::Refresh(e)),
            };
            tracing::trace!(state = %state, "refreshed state");

            if self.target.contains(&state.as_str()) {
                return Ok(value);
            }
            if !self.pending.contains(&state.as_str()) {
                return Err(WaitError::UnexpectedState {
                    state,
                    target: self.target_names(),
                });
            }

            last_state = state;
            time::sleep_until(deadline.min(Instant::now() + self.poll_interval)).await;
        }
    }

    fn target_names(&self) -> Vec<String> {
        self.target.iter().map(|s| s.to_string()).collect()
    }

    fn timeout_error(&self, last_state: String) -> WaitError {
        WaitError::Timeout {
            target: self.target_names(),
            last_state,
            timeout: self.timeout,
        }
    }
}
