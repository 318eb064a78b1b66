//! State waiter
//!
//! Polls a resource until it reports one of the desired states, the deadline
//! passes, or the caller cancels. Retryable describe failures are treated as
//! "state unknown, keep polling"; anything else ends the wait at once.

use crate::cancel::or_cancelled;
use crate::client::ResourceClient;
use crate::error::{InvalidWaitSpec, WaitError, classify};
use crate::model::ResourceRef;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

/// What to wait for and for how long
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSpec {
    target: ResourceRef,
    desired_states: BTreeSet<String>,
    poll_interval: Duration,
    timeout: Duration,
}

impl WaitSpec {
    /// Build a spec; at least one poll must fit inside the timeout.
    pub fn new<I, S>(
        target: ResourceRef,
        desired_states: I,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Self, InvalidWaitSpec>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let desired_states: BTreeSet<String> =
            desired_states.into_iter().map(Into::into).collect();

        if desired_states.is_empty() {
            return Err(InvalidWaitSpec::NoDesiredStates);
        }
        if poll_interval.is_zero() {
            return Err(InvalidWaitSpec::ZeroPollInterval);
        }
        if timeout <= poll_interval {
            return Err(InvalidWaitSpec::TimeoutTooShort {
                timeout,
                poll_interval,
            });
        }

        Ok(Self {
            target,
            desired_states,
            poll_interval,
            timeout,
        })
    }

    pub fn target(&self) -> &ResourceRef {
        &self.target
    }

    pub fn desired_states(&self) -> &BTreeSet<String> {
        &self.desired_states
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_desired(&self, state: &str) -> bool {
        self.desired_states.contains(state)
    }
}

/// A desired state reached by [`wait_for_state`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub state: String,
    /// Number of describe calls issued
    pub polls: u32,
    pub elapsed: Duration,
}

/// Poll `spec.target` until it reaches a desired state.
///
/// No describe call is started once the next poll could not complete before
/// the deadline; the wait then fails with the last state it saw.
pub async fn wait_for_state(
    client: &ResourceClient,
    spec: &WaitSpec,
    cancel: &CancellationToken,
) -> Result<Observed, WaitError> {
    let started = Instant::now();
    let deadline = started + spec.timeout;
    let mut last_observed: Option<String> = None;
    let mut polls = 0u32;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let describe = timeout(remaining, client.describe_state(&spec.target));
        let outcome = or_cancelled(cancel, describe)
            .await
            .ok_or(WaitError::Cancelled)?;
        polls += 1;

        match outcome {
            Err(_) => return Err(WaitError::Timeout { last_observed }),
            Ok(Ok(state)) => {
                if spec.is_desired(&state) {
                    tracing::debug!(polls, "{} reached {}", spec.target, state);
                    return Ok(Observed {
                        state,
                        polls,
                        elapsed: started.elapsed(),
                    });
                }
                tracing::debug!(polls, "{} is {}", spec.target, state);
                last_observed = Some(state);
            }
            Ok(Err(raw)) => {
                let failure = classify(&raw);
                if !failure.retryable {
                    return Err(WaitError::Failed(failure));
                }
                tracing::debug!(polls, "state of {} unknown: {}", spec.target, failure);
            }
        }

        if Instant::now() + spec.poll_interval >= deadline {
            return Err(WaitError::Timeout { last_observed });
        }

        or_cancelled(cancel, sleep(spec.poll_interval))
            .await
            .ok_or(WaitError::Cancelled)?;
    }
}
