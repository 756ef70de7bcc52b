//! Fan-out of a sync operation across the targets connected to a source.
//!
//! Targets are synced one after another in discovery order. A failing target
//! is recorded in the report and never aborts the run. Once the run is
//! cancelled the remaining targets are reported as failed without being called.

use crate::error::ReconcileError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub type Counters = IndexMap<String, i64>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    pub id: String,
}

impl SyncTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub target: SyncTarget,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub counters: Counters,
}

impl SyncResult {
    pub fn succeeded(target: SyncTarget, counters: Counters) -> Self {
        Self {
            target,
            success: true,
            error: None,
            counters,
        }
    }

    /// A failed result with every known counter at zero.
    pub fn failed<K>(target: SyncTarget, error: impl Into<String>, keys: K) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            target,
            success: false,
            error: Some(error.into()),
            counters: keys.into_iter().map(|key| (key.into(), 0)).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AggregateSyncReport {
    pub results: Vec<SyncResult>,
    /// Per counter sum over the successful results
    pub totals: Counters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl AggregateSyncReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Discovery worked and every target synced.
    pub fn is_clean(&self) -> bool {
        self.discovery_error.is_none() && self.failed() == 0
    }
}

#[derive(Clone, Debug)]
pub struct SyncOrchestrator {
    counter_keys: Vec<String>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    /// `counter_keys` are always present in the totals, even when nothing was synced.
    pub fn new<K>(counter_keys: K, cancel: CancellationToken) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            counter_keys: counter_keys.into_iter().map(Into::into).collect(),
            cancel,
        }
    }

    pub fn counter_keys(&self) -> &[String] {
        &self.counter_keys
    }

    pub async fn sync_all<D, DFut, DE, S, SFut, SE>(
        &self,
        discover: D,
        mut sync_one: S,
    ) -> AggregateSyncReport
    where
        D: FnOnce() -> DFut,
        DFut: Future<Output = Result<Vec<SyncTarget>, DE>>,
        DE: Display,
        S: FnMut(SyncTarget) -> SFut,
        SFut: Future<Output = Result<SyncResult, SE>>,
        SE: Display,
    {
        let discovered = if self.cancel.is_cancelled() {
            Err(ReconcileError::Cancelled.to_string())
        } else {
            discover().await.map_err(|err| err.to_string())
        };
        let (targets, discovery_error) = match discovered {
            Ok(targets) => (targets, None),
            Err(err) => {
                log::warn!("Failed to discover sync targets: {err}");
                (Vec::new(), Some(err))
            }
        };

        if targets.is_empty() {
            log::info!("No sync targets");
        }

        let mut results = Vec::with_capacity(targets.len());
        for target in targets {
            if self.cancel.is_cancelled() {
                log::debug!("Skipping target {}: sync cancelled", target.id);
                results.push(self.cancelled(target));
                continue;
            }

            log::debug!("Syncing from target {}", target.id);
            let result = match sync_one(target.clone()).await {
                Ok(result) => result,
                Err(_) if self.cancel.is_cancelled() => {
                    log::info!("Sync from target {} cancelled", target.id);
                    self.cancelled(target)
                }
                Err(err) => {
                    log::warn!("Sync from target {} failed: {err}", target.id);
                    SyncResult::failed(target, err.to_string(), &self.counter_keys)
                }
            };
            results.push(result);
        }

        let totals = self.totals(&results);
        log::info!(
            "Synced {} of {} targets: {totals:?}",
            results.iter().filter(|r| r.success).count(),
            results.len()
        );

        AggregateSyncReport {
            results,
            totals,
            discovery_error,
            finished_at: Utc::now(),
        }
    }

    fn cancelled(&self, target: SyncTarget) -> SyncResult {
        SyncResult::failed(
            target,
            ReconcileError::Cancelled.to_string(),
            &self.counter_keys,
        )
    }

    fn totals(&self, results: &[SyncResult]) -> Counters {
        let mut totals: Counters = self
            .counter_keys
            .iter()
            .map(|key| (key.clone(), 0))
            .collect();

        for result in results.iter().filter(|r| r.success) {
            for (key, value) in &result.counters {
                let total = totals.entry(key.clone()).or_insert(0);
                *total = total.saturating_add(*value);
            }
        }

        totals
    }
}
