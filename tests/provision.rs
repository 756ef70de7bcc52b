mod common;

use common::{Reply, ScriptedApi};
use provision_operator::{
    config::{ManagedObject, ReconcilerConfig},
    preset::{NodeKind, PollPreset},
    reconciler::{Outcome, Reconciler},
    recover::ProvisioningOutcome,
    retry::{Applied, RetryConfig},
    status::Status,
    Provisioner, ReconcileError,
};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn provisioner(api: Arc<ScriptedApi>) -> Provisioner {
    Provisioner::new(api, ReconcilerConfig::default(), CancellationToken::new())
}

#[tokio::test(start_paused = true)]
async fn create_node_waits_until_running() {
    let api = Arc::new(
        ScriptedApi::new()
            .on(Method::POST, "/api/v1/nodes", vec![Reply::Ok(json!({"id": 7}))])
            .on(
                Method::GET,
                "/api/v1/nodes/7",
                vec![
                    Reply::Ok(json!({"status": "PENDING"})),
                    Reply::fail(502, "bad gateway"),
                    Reply::Ok(json!({"status": "RUNNING", "ip": "10.1.0.7"})),
                ],
            ),
    );

    let outcome = provisioner(api.clone())
        .create_node(NodeKind::Virtual, json!({"name": "node-a"}))
        .await
        .unwrap();

    match outcome {
        ProvisioningOutcome::FullyCreated { id, status } => {
            assert_eq!(id, "7");
            assert!(status.is("RUNNING"));
            assert_eq!(status.field("ip"), Some(&json!("10.1.0.7")));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(api.calls()[0].body, Some(json!({"name": "node-a"})));
    assert_eq!(api.calls_to(Method::GET, "/api/v1/nodes/7"), 3);
}

#[tokio::test(start_paused = true)]
async fn partially_created_node_is_tracked() {
    let api = Arc::new(
        ScriptedApi::new()
            .on(
                Method::POST,
                "/api/v1/nodes",
                vec![Reply::fail(
                    500,
                    json!({"created": true, "id": 42, "stage": "configure_network"}).to_string(),
                )],
            )
            .on(
                Method::GET,
                "/api/v1/nodes/42",
                vec![Reply::Ok(json!({"status": "ERROR"}))],
            ),
    );

    let outcome = provisioner(api.clone())
        .create_node(NodeKind::Virtual, json!({}))
        .await
        .unwrap();

    assert!(outcome.should_persist());
    assert_eq!(outcome.id(), Some("42"));
    match &outcome {
        ProvisioningOutcome::PartiallyCreated { status, stage, .. } => {
            assert!(status.is("ERROR"));
            assert_eq!(stage, "configure_network");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(outcome.warning().is_some());
    assert_eq!(api.calls_to(Method::GET, "/api/v1/nodes/42"), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_creation_is_not_tracked() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::POST,
        "/api/v1/nodes",
        vec![Reply::fail(400, json!({"created": false, "error": "quota exceeded"}).to_string())],
    ));

    let outcome = provisioner(api.clone())
        .create_node(NodeKind::Virtual, json!({}))
        .await
        .unwrap();

    match &outcome {
        ProvisioningOutcome::NotCreated { cause } => {
            assert!(cause.to_string().contains("quota exceeded"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!outcome.should_persist());
    assert_eq!(api.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_node_is_still_tracked() {
    let api = Arc::new(
        ScriptedApi::new()
            .on(Method::POST, "/api/v1/nodes", vec![Reply::Ok(json!({"id": "n-1"}))])
            .on(
                Method::GET,
                "/api/v1/nodes/n-1",
                vec![Reply::Ok(json!({"status": "PROVISIONING"}))],
            ),
    );

    let start = Instant::now();
    let outcome = provisioner(api.clone())
        .create_node(NodeKind::Virtual, json!({}))
        .await
        .unwrap();

    assert!(start.elapsed() <= Duration::from_secs(60));
    assert_eq!(api.calls_to(Method::GET, "/api/v1/nodes/n-1"), 30);
    match outcome {
        ProvisioningOutcome::FullyCreated { id, status } => {
            assert_eq!(id, "n-1");
            assert_eq!(status, Status::unknown());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn bare_metal_nodes_get_a_longer_budget() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::GET,
        "/api/v1/nodes/bm-1",
        vec![Reply::Ok(json!({"status": "PROVISIONING"}))],
    ));

    let err = provisioner(api.clone())
        .wait_for(PollPreset::Node(NodeKind::BareMetal), "bm-1")
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Timeout { attempts: 60, .. }));
    assert_eq!(api.calls_to(Method::GET, "/api/v1/nodes/bm-1"), 60);
}

#[tokio::test(start_paused = true)]
async fn node_error_is_a_hard_failure() {
    let api = Arc::new(
        ScriptedApi::new()
            .on(Method::POST, "/api/v1/nodes", vec![Reply::Ok(json!({"id": 3}))])
            .on(
                Method::GET,
                "/api/v1/nodes/3",
                vec![
                    Reply::Ok(json!({"status": "PENDING"})),
                    Reply::Ok(json!({"status": "FAILED"})),
                ],
            ),
    );

    let err = provisioner(api)
        .create_node(NodeKind::Virtual, json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::TerminalFailure { ref status } if status == "FAILED"));
    assert!(!err.is_warning());
}

#[tokio::test(start_paused = true)]
async fn key_backend_needs_to_be_unsealed() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::GET,
        "/api/v1/key-backends/kb-1",
        vec![
            Reply::Ok(json!({"reachable": false})),
            Reply::Ok(json!({
                "reachable": true, "initialized": true, "sealed": true, "container_running": true
            })),
            Reply::Ok(json!({
                "reachable": true, "initialized": true, "sealed": false, "container_running": true
            })),
        ],
    ));

    let status = provisioner(api.clone())
        .wait_for(PollPreset::KeyBackend, "kb-1")
        .await
        .unwrap();

    assert_eq!(status.flag("sealed"), Some(false));
    assert_eq!(api.calls_to(Method::GET, "/api/v1/key-backends/kb-1"), 3);
}

#[tokio::test(start_paused = true)]
async fn deployment_error_ends_the_wait() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::GET,
        "/api/v1/deployments/web",
        vec![
            Reply::Ok(json!({"state": "deploying"})),
            Reply::Ok(json!({"state": "error", "message": "image pull failed"})),
        ],
    ));

    let status = provisioner(api)
        .wait_for(PollPreset::Deployment, "web")
        .await
        .unwrap();

    assert!(status.is("error"));
}

#[tokio::test(start_paused = true)]
async fn failed_deployment_is_not_reconciled() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::GET,
        "/api/v1/deployments/web",
        vec![Reply::Ok(json!({"state": "error", "message": "image pull failed"}))],
    ));

    let err = provisioner(api)
        .reconcile(&ManagedObject::Deployment { id: "web".into() })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("'error'"));
}

#[tokio::test(start_paused = true)]
async fn config_propagation_retries_until_accepted() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::POST,
        "/api/v1/nodes/7/config",
        vec![
            Reply::fail(503, "key backend not initialized"),
            Reply::fail(503, "key backend not initialized"),
            Reply::Ok(json!({"version": 4})),
        ],
    ));

    let start = Instant::now();
    let applied = provisioner(api.clone())
        .propagate_config("7", json!({"version": 4}))
        .await
        .unwrap();

    assert_eq!(applied, Applied::Done(json!({"version": 4}).to_string().into_bytes()));
    assert_eq!(api.calls_to(Method::POST, "/api/v1/nodes/7/config"), 3);
    // 500ms + 1s of backoff
    assert!(start.elapsed() >= Duration::from_millis(1500));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn config_already_applied_is_success() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::POST,
        "/api/v1/nodes/7/config",
        vec![Reply::fail(409, r#"{"error": "config version 4 already applied"}"#)],
    ));

    let applied = provisioner(api.clone())
        .propagate_config("7", json!({"version": 4}))
        .await
        .unwrap();

    match applied {
        Applied::AlreadySatisfied(satisfied) => assert_eq!(satisfied.status, "applied"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(api.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn config_propagation_gives_up() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::POST,
        "/api/v1/nodes/7/config",
        vec![Reply::fail(500, "internal error")],
    ));

    let err = provisioner(api.clone())
        .propagate_config("7", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Exhausted { attempts: 11, .. }));
    assert_eq!(api.calls().len(), 11);
}

fn no_sync_retries() -> ReconcilerConfig {
    ReconcilerConfig {
        sync: RetryConfig {
            max_retries: 0,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn sync_reports_partial_failure() {
    let api = Arc::new(
        ScriptedApi::new()
            .on(
                Method::GET,
                "/api/v1/sources/s-1/peers",
                vec![Reply::Ok(json!({"peers": ["p-1", "p-2", "p-3"]}))],
            )
            .on(
                Method::POST,
                "/api/v1/sources/s-1/sync",
                vec![
                    Reply::Ok(json!({"created": 2, "updated": 1, "deleted": 0})),
                    Reply::fail(500, "peer p-2 unreachable"),
                    Reply::Ok(json!({"created": 1, "updated": 0, "deleted": 5})),
                ],
            ),
    );
    let provisioner = Provisioner::new(api.clone(), no_sync_retries(), CancellationToken::new());

    let report = provisioner.sync_peers("s-1").await;

    assert_eq!(report.results.len(), 3);
    assert!(report.results[0].success);
    assert!(!report.results[1].success);
    assert!(report.results[1]
        .error
        .as_deref()
        .unwrap()
        .contains("p-2 unreachable"));
    assert!(report.results[2].success);
    assert_eq!(report.totals["created"], 3);
    assert_eq!(report.totals["updated"], 1);
    assert_eq!(report.totals["deleted"], 5);

    let targets: Vec<_> = api
        .calls()
        .into_iter()
        .filter(|call| call.method == Method::POST)
        .map(|call| call.body.unwrap()["target_id"].clone())
        .collect();
    assert_eq!(targets, vec![json!("p-1"), json!("p-2"), json!("p-3")]);
}

#[tokio::test(start_paused = true)]
async fn sync_retries_a_flaky_target() {
    let api = Arc::new(
        ScriptedApi::new()
            .on(
                Method::GET,
                "/api/v1/sources/s-1/peers",
                vec![Reply::Ok(json!({"peers": ["p-1"]}))],
            )
            .on(
                Method::POST,
                "/api/v1/sources/s-1/sync",
                vec![
                    Reply::fail(503, "sync engine starting"),
                    Reply::Ok(json!({"created": 4})),
                ],
            ),
    );

    let report = provisioner(api.clone()).sync_peers("s-1").await;

    assert!(report.is_clean());
    assert_eq!(report.totals["created"], 4);
    assert_eq!(api.calls_to(Method::POST, "/api/v1/sources/s-1/sync"), 2);
}

#[tokio::test(start_paused = true)]
async fn nothing_to_sync() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::GET,
        "/api/v1/sources/s-1/peers",
        vec![Reply::Ok(json!({"peers": []}))],
    ));

    let report = provisioner(api).sync_peers("s-1").await;

    assert!(report.results.is_empty());
    assert_eq!(report.totals.len(), 3);
    assert!(report.totals.values().all(|total| *total == 0));
    assert!(report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn discovery_failure_yields_empty_report() {
    let api = Arc::new(ScriptedApi::new());

    let report = provisioner(api).sync_peers("missing").await;

    assert!(report.results.is_empty());
    assert!(report.discovery_error.unwrap().contains("not found"));
}

#[tokio::test(start_paused = true)]
async fn reconciler_maps_outcomes() {
    let api = Arc::new(
        ScriptedApi::new()
            .on(
                Method::GET,
                "/api/v1/nodes/ok",
                vec![Reply::Ok(json!({"status": "RUNNING"}))],
            )
            .on(
                Method::GET,
                "/api/v1/nodes/slow",
                vec![Reply::Ok(json!({"status": "PENDING"}))],
            )
            .on(
                Method::GET,
                "/api/v1/nodes/broken",
                vec![Reply::Ok(json!({"status": "ERROR"}))],
            )
            .on(
                Method::GET,
                "/api/v1/sources/s-1/peers",
                vec![Reply::Ok(json!({"peers": ["p-1"]}))],
            )
            .on(
                Method::POST,
                "/api/v1/sources/s-1/sync",
                vec![Reply::fail(500, "boom")],
            ),
    );
    let provisioner = Provisioner::new(api, no_sync_retries(), CancellationToken::new());

    let node = |id: &str| ManagedObject::Node {
        id: id.to_string(),
        node_kind: NodeKind::Virtual,
    };

    assert_eq!(
        provisioner.reconcile(&node("ok")).await.unwrap(),
        Outcome::Complete
    );
    assert_eq!(
        provisioner.reconcile(&node("slow")).await.unwrap(),
        Outcome::Retry
    );
    assert!(provisioner.reconcile(&node("broken")).await.is_err());
    assert_eq!(
        provisioner
            .reconcile(&ManagedObject::SyncSource { id: "s-1".into() })
            .await
            .unwrap(),
        Outcome::Retry
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_waiting() {
    let api = Arc::new(ScriptedApi::new().on(
        Method::GET,
        "/api/v1/nodes/n-1",
        vec![Reply::Ok(json!({"status": "PENDING"}))],
    ));
    let cancel = CancellationToken::new();
    let provisioner = Provisioner::new(api.clone(), ReconcilerConfig::default(), cancel.clone());

    let task = tokio::spawn(async move {
        provisioner
            .wait_for(PollPreset::Node(NodeKind::Virtual), "n-1")
            .await
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();
    let err = task.await.unwrap().unwrap_err();

    assert!(err.is_cancelled());
    // status reads at 0s, 2s and 4s, none after the cancellation
    assert_eq!(api.calls_to(Method::GET, "/api/v1/nodes/n-1"), 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_syncing() {
    let api = Arc::new(
        ScriptedApi::new()
            .on(
                Method::GET,
                "/api/v1/sources/s-1/peers",
                vec![Reply::Ok(json!({"peers": ["p-1", "p-2", "p-3"]}))],
            )
            .on(
                Method::POST,
                "/api/v1/sources/s-1/sync",
                vec![Reply::fail(503, "sync engine starting")],
            ),
    );
    let cancel = CancellationToken::new();
    let provisioner = Provisioner::new(api.clone(), ReconcilerConfig::default(), cancel.clone());

    let task = tokio::spawn(async move { provisioner.sync_peers("s-1").await });

    // inside the first 500ms backoff of p-1
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    let report = task.await.unwrap();

    assert_eq!(api.calls_to(Method::POST, "/api/v1/sources/s-1/sync"), 1);
    assert_eq!(report.results.len(), 3);
    for result in &report.results {
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("operation cancelled"));
        assert!(result.counters.values().all(|value| *value == 0));
    }
    assert!(report.totals.values().all(|total| *total == 0));
}
