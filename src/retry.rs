use crate::{
    backoff,
    classify::{Classification, OutcomeClassifier, Satisfied},
    client::ClientError,
    error::ReconcileError,
    wait,
};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff tuning for a retried mutation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            max_retries: 10,
        }
    }
}

pub struct RetrySpec<A> {
    pub action: A,
    pub classifier: OutcomeClassifier,
    pub config: RetryConfig,
}

impl<A> RetrySpec<A> {
    pub fn new(action: A) -> Self {
        Self {
            action,
            classifier: OutcomeClassifier::new(),
            config: RetryConfig::default(),
        }
    }

    pub fn classifier(mut self, classifier: OutcomeClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }
}

/// Result of a mutation that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied<T> {
    Done(T),
    AlreadySatisfied(Satisfied),
}

#[derive(Clone, Debug)]
pub struct RetryingMutator {
    cancel: CancellationToken,
}

impl RetryingMutator {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Run the action, retrying failures with exponential backoff.
    ///
    /// Failures the classifier recognizes as idempotent conflicts end the loop
    /// as [`Applied::AlreadySatisfied`]. Once `max_retries` retries have failed
    /// the last error is returned as [`ReconcileError::Exhausted`].
    pub async fn execute<A, Fut, T>(&self, spec: RetrySpec<A>) -> Result<Applied<T>, ReconcileError>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let RetrySpec {
            mut action,
            classifier,
            config,
        } = spec;

        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }

            let err = match classifier.classify(action().await) {
                Classification::Success(value) => return Ok(Applied::Done(value)),
                Classification::AlreadySatisfied(satisfied) => {
                    return Ok(Applied::AlreadySatisfied(satisfied))
                }
                Classification::Fatal(err) => err,
            };

            if attempt >= config.max_retries {
                return Err(ReconcileError::Exhausted {
                    attempts: attempt + 1,
                    source: err,
                });
            }

            let delay = backoff::delay(attempt, config.base_delay, config.max_delay);
            log::warn!(
                "Attempt {} failed, retrying in {}: {err}",
                attempt + 1,
                humantime::format_duration(delay)
            );
            wait::sleep(&self.cancel, delay).await?;
            attempt += 1;
        }
    }
}
