use crate::client::ClientError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("operation cancelled")]
    Cancelled,
    #[error(
        "no terminal state after {attempts} attempts in {elapsed:?} (budget {budget:?}), last observed: {last}"
    )]
    Timeout {
        attempts: u32,
        elapsed: Duration,
        budget: Duration,
        last: String,
    },
    #[error("resource reached terminal failure status '{status}'")]
    TerminalFailure { status: String },
    #[error("giving up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: ClientError,
    },
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("failed to decode {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ReconcileError {
    /// Timeouts are reported as warnings, the remote object may still converge later.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn decode(context: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Decode { context, source }
    }
}
