use crate::config::ManagedObject;
use async_trait::async_trait;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    /// Not converged yet, try again on the next pass
    Retry,
}

#[async_trait]
pub trait Reconciler {
    async fn reconcile(&self, object: &ManagedObject) -> anyhow::Result<Outcome>;
}
