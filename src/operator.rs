use crate::config::ManagedObject;
use crate::reconciler::{Outcome, Reconciler};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub complete: usize,
    pub retry: usize,
    pub failed: usize,
}

pub struct Operator<R>
where
    R: Reconciler,
{
    reconciler: R,
    objects: Vec<ManagedObject>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<R> Operator<R>
where
    R: Reconciler,
{
    pub fn new(
        reconciler: R,
        objects: Vec<ManagedObject>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reconciler,
            objects,
            interval,
            cancel,
        }
    }

    /// Reconcile every object once, in configuration order.
    pub async fn reconcile_all(&self) -> PassSummary {
        let mut summary = PassSummary::default();

        for object in &self.objects {
            if self.cancel.is_cancelled() {
                break;
            }

            log::info!("Reconciling {object}");
            match self.reconciler.reconcile(object).await {
                Ok(Outcome::Complete) => {
                    log::info!("Reconciled {object}");
                    summary.complete += 1;
                }
                Ok(Outcome::Retry) => {
                    log::info!("Need to retry {object} on the next pass");
                    summary.retry += 1;
                }
                Err(err) => {
                    log::warn!("Failed to reconcile {object}: {err:#}");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    pub async fn run(&self) {
        log::info!(
            "Reconciling {} objects with interval {}",
            self.objects.len(),
            humantime::format_duration(self.interval)
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let summary = self.reconcile_all().await;
            log::info!("Reconcile pass finished: {summary:?}");
        }

        log::info!("Operator stopped");
    }
}
