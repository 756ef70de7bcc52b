//! Waiting for a remote resource to reach a terminal state.
//!
//! A [`PollSpec`] bundles a probe with the predicates deciding when polling
//! stops. The [`StatusPoller`] drives it at a fixed interval until the status
//! is terminal, the attempt budget is used up, or the cancellation token fires.

use crate::{error::ReconcileError, status::Status, wait};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub type Predicate = Box<dyn Fn(&Status) -> bool + Send + Sync>;

pub struct PollSpec<P> {
    pub probe: P,
    pub is_terminal_success: Predicate,
    pub is_terminal_failure: Predicate,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl<P> PollSpec<P> {
    /// A spec that never terminates on its own, 30 attempts every 2 seconds.
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            is_terminal_success: Box::new(|_| false),
            is_terminal_failure: Box::new(|_| false),
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }

    pub fn succeed_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Status) -> bool + Send + Sync + 'static,
    {
        self.is_terminal_success = Box::new(predicate);
        self
    }

    pub fn fail_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Status) -> bool + Send + Sync + 'static,
    {
        self.is_terminal_failure = Box::new(predicate);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The nominal wall time the spec may take.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

#[derive(Clone, Debug)]
pub struct StatusPoller {
    cancel: CancellationToken,
}

impl StatusPoller {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub async fn poll<P, Fut, E>(&self, spec: PollSpec<P>) -> Result<Status, ReconcileError>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<Status, E>>,
        E: Display,
    {
        let budget = spec.budget();
        let PollSpec {
            mut probe,
            is_terminal_success,
            is_terminal_failure,
            interval,
            max_attempts,
        } = spec;

        let start = Instant::now();
        let mut last = String::from("nothing");

        for attempt in 1..=max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }

            match probe().await {
                Ok(status) => {
                    if is_terminal_failure(&status) {
                        return Err(ReconcileError::TerminalFailure {
                            status: status.phase().to_string(),
                        });
                    }
                    if is_terminal_success(&status) {
                        log::debug!("Reached terminal status {status} after {attempt} attempts");
                        return Ok(status);
                    }
                    log::debug!("Status {status} is not terminal yet ({attempt}/{max_attempts})");
                    last = format!("status '{status}'");
                }
                Err(err) => {
                    log::debug!("Status probe failed ({attempt}/{max_attempts}): {err}");
                    last = format!("probe error: {err}");
                }
            }

            if attempt < max_attempts {
                wait::sleep(&self.cancel, interval).await?;
            }
        }

        Err(ReconcileError::Timeout {
            attempts: max_attempts,
            elapsed: start.elapsed(),
            budget,
            last,
        })
    }
}
