use crate::error::ReconcileError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `duration`, returning early with [`ReconcileError::Cancelled`] once `cancel` fires.
pub(crate) async fn sleep(cancel: &CancellationToken, duration: Duration) -> Result<(), ReconcileError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
