use crate::{
    classify::OutcomeClassifier,
    client::RemoteApi,
    config::{ManagedObject, ReconcilerConfig},
    error::ReconcileError,
    poll::StatusPoller,
    preset::{NodeKind, PollPreset, NODES},
    reconciler::{Outcome, Reconciler},
    recover::{object_id, PartialCreationRecoverer, ProvisioningOutcome},
    retry::{Applied, RetryingMutator, RetrySpec},
    status::Status,
    sync::{AggregateSyncReport, Counters, SyncOrchestrator, SyncResult, SyncTarget},
};
use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SOURCES: &str = "/api/v1/sources";

#[derive(Debug, serde::Deserialize)]
struct PeerList {
    #[serde(alias = "targets")]
    peers: Vec<String>,
}

/// Entry points for creating and converging remote objects.
pub struct Provisioner {
    api: Arc<dyn RemoteApi>,
    config: ReconcilerConfig,
    poller: StatusPoller,
    mutator: RetryingMutator,
    orchestrator: SyncOrchestrator,
}

impl Provisioner {
    pub fn new(api: Arc<dyn RemoteApi>, config: ReconcilerConfig, cancel: CancellationToken) -> Self {
        let orchestrator = SyncOrchestrator::new(config.counters.clone(), cancel.clone());
        Self {
            api,
            config,
            poller: StatusPoller::new(cancel.clone()),
            mutator: RetryingMutator::new(cancel),
            orchestrator,
        }
    }

    /// Read the current status of an object once.
    pub async fn status(&self, preset: PollPreset, id: &str) -> Result<Status, ReconcileError> {
        let body = self.api.invoke(Method::GET, &preset.path(id), None).await?;
        Status::from_slice(&body, preset.discriminant()).map_err(ReconcileError::decode("status"))
    }

    pub async fn wait_for(&self, preset: PollPreset, id: &str) -> Result<Status, ReconcileError> {
        log::info!("Waiting for {preset:?} {id}");
        self.poller
            .poll(preset.spec(|| self.status(preset, id)))
            .await
    }

    /// Create a node and wait for it to come up.
    ///
    /// A node that does not become ready in time is still returned as created,
    /// with an `unknown` status, so it gets tracked.
    pub async fn create_node(
        &self,
        kind: NodeKind,
        spec: Value,
    ) -> Result<ProvisioningOutcome, ReconcileError> {
        let preset = PollPreset::Node(kind);

        let body = match self.api.invoke(Method::POST, NODES, Some(spec)).await {
            Ok(body) => body,
            Err(err) => {
                let raw = err.body().map(|body| body.as_bytes().to_vec());
                let recoverer = PartialCreationRecoverer::new(
                    self.api.clone(),
                    preset.collection(),
                    preset.discriminant(),
                );
                return Ok(recoverer.recover(err, raw.as_deref()).await);
            }
        };

        let created: Value =
            serde_json::from_slice(&body).map_err(ReconcileError::decode("created node"))?;
        let id = created
            .get("id")
            .and_then(object_id)
            .ok_or_else(|| ReconcileError::Protocol("created node has no id".to_string()))?;
        log::info!("Created node {id}");

        match self.wait_for(preset, &id).await {
            Ok(status) => Ok(ProvisioningOutcome::FullyCreated { id, status }),
            Err(err) if err.is_warning() => {
                log::warn!("Node {id} is not ready yet: {err}");
                Ok(ProvisioningOutcome::FullyCreated {
                    id,
                    status: Status::unknown(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Push a configuration to a node, retrying while the node cannot accept it yet.
    pub async fn propagate_config(
        &self,
        node_id: &str,
        config: Value,
    ) -> Result<Applied<Vec<u8>>, ReconcileError> {
        let path = format!("{NODES}/{node_id}/config");
        self.mutator
            .execute(
                RetrySpec::new(|| self.api.invoke(Method::POST, &path, Some(config.clone())))
                    .classifier(OutcomeClassifier::config_propagation())
                    .config(self.config.propagation.clone()),
            )
            .await
    }

    /// Sync a source from every peer connected to it.
    pub async fn sync_peers(&self, source_id: &str) -> AggregateSyncReport {
        let peers = format!("{SOURCES}/{source_id}/peers");
        let sync = format!("{SOURCES}/{source_id}/sync");

        self.orchestrator
            .sync_all(
                || self.discover(&peers),
                |target| self.sync_target(&sync, target),
            )
            .await
    }

    async fn discover(&self, path: &str) -> Result<Vec<SyncTarget>, ReconcileError> {
        let body = self.api.invoke(Method::GET, path, None).await?;
        let list: PeerList =
            serde_json::from_slice(&body).map_err(ReconcileError::decode("peer list"))?;
        Ok(list.peers.into_iter().map(SyncTarget::new).collect())
    }

    async fn sync_target(
        &self,
        path: &str,
        target: SyncTarget,
    ) -> Result<SyncResult, ReconcileError> {
        let request = json!({ "target_id": target.id });
        let applied = self
            .mutator
            .execute(
                RetrySpec::new(|| self.api.invoke(Method::POST, path, Some(request.clone())))
                    .classifier(OutcomeClassifier::peer_sync())
                    .config(self.config.sync.clone()),
            )
            .await?;

        let counters = match applied {
            Applied::Done(body) => counters(&body)?,
            Applied::AlreadySatisfied(satisfied) => {
                log::debug!("Target {}: {}", target.id, satisfied.note);
                self.orchestrator
                    .counter_keys()
                    .iter()
                    .map(|key| (key.clone(), 0))
                    .collect()
            }
        };

        Ok(SyncResult::succeeded(target, counters))
    }

    async fn await_ready(&self, preset: PollPreset, id: &str) -> anyhow::Result<Outcome> {
        match self.wait_for(preset, id).await {
            Ok(status) if preset == PollPreset::Deployment && status.is("error") => {
                Err(anyhow!("deployment {id} settled in state 'error'"))
            }
            Ok(status) => {
                log::info!("{preset:?} {id} is ready ({status})");
                Ok(Outcome::Complete)
            }
            Err(err) if err.is_warning() => {
                log::warn!("{preset:?} {id} is not ready yet: {err}");
                Ok(Outcome::Retry)
            }
            Err(err) => Err(anyhow!(err).context(format!("waiting for {preset:?} {id}"))),
        }
    }
}

/// The integer members of a sync response.
fn counters(body: &[u8]) -> Result<Counters, ReconcileError> {
    let value: Value = serde_json::from_slice(body).map_err(ReconcileError::decode("sync counters"))?;
    match value {
        Value::Object(members) => Ok(members
            .into_iter()
            .filter_map(|(key, value)| value.as_i64().map(|value| (key, value)))
            .collect()),
        other => Err(ReconcileError::Protocol(format!(
            "sync response is not an object: {other}"
        ))),
    }
}

#[async_trait]
impl Reconciler for Provisioner {
    async fn reconcile(&self, object: &ManagedObject) -> anyhow::Result<Outcome> {
        match object {
            ManagedObject::Node { id, node_kind } => {
                self.await_ready(PollPreset::Node(*node_kind), id).await
            }
            ManagedObject::KeyBackend { id } => self.await_ready(PollPreset::KeyBackend, id).await,
            ManagedObject::Deployment { id } => self.await_ready(PollPreset::Deployment, id).await,
            ManagedObject::SyncSource { id } => {
                let report = self.sync_peers(id).await;
                if report.is_clean() {
                    Ok(Outcome::Complete)
                } else {
                    log::warn!(
                        "Sync of {id} incomplete: {} of {} targets failed",
                        report.failed(),
                        report.results.len()
                    );
                    Ok(Outcome::Retry)
                }
            }
        }
    }
}
