use crate::{poll::PollSpec, status::Status};
use serde::Deserialize;
use std::time::Duration;

pub const NODES: &str = "/api/v1/nodes";
pub const KEY_BACKENDS: &str = "/api/v1/key-backends";
pub const DEPLOYMENTS: &str = "/api/v1/deployments";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    #[default]
    Virtual,
    BareMetal,
}

/// How readiness is awaited for each kind of managed object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollPreset {
    Node(NodeKind),
    KeyBackend,
    Deployment,
}

impl PollPreset {
    pub fn spec<P>(self, probe: P) -> PollSpec<P> {
        let spec = PollSpec::new(probe);
        match self {
            Self::Node(kind) => spec
                .interval(Duration::from_secs(2))
                .max_attempts(match kind {
                    NodeKind::Virtual => 30,
                    NodeKind::BareMetal => 60,
                })
                .succeed_when(node_running)
                .fail_when(node_failed),
            Self::KeyBackend => spec
                .interval(Duration::from_secs(2))
                .max_attempts(60)
                .succeed_when(key_backend_ready),
            Self::Deployment => spec
                .interval(Duration::from_secs(5))
                .max_attempts(60)
                .succeed_when(deployment_settled),
        }
    }

    /// Name of the field carrying the status discriminant.
    pub fn discriminant(self) -> &'static str {
        match self {
            Self::Node(_) | Self::KeyBackend => "status",
            Self::Deployment => "state",
        }
    }

    /// REST collection the object's status is read from.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Node(_) => NODES,
            Self::KeyBackend => KEY_BACKENDS,
            Self::Deployment => DEPLOYMENTS,
        }
    }

    pub fn path(self, id: &str) -> String {
        format!("{}/{}", self.collection(), id)
    }
}

fn node_running(status: &Status) -> bool {
    status.is("RUNNING")
}

fn node_failed(status: &Status) -> bool {
    status.is("ERROR") || status.is("FAILED")
}

/// All four conditions must hold at once, an absent flag does not count.
pub fn key_backend_ready(status: &Status) -> bool {
    status.flag("reachable") == Some(true)
        && status.flag("initialized") == Some(true)
        && status.flag("sealed") == Some(false)
        && status.flag("container_running") == Some(true)
}

/// A deployment stops being polled on `error` too, the caller decides what it means.
fn deployment_settled(status: &Status) -> bool {
    status.is("deployed") || status.is("error")
}
