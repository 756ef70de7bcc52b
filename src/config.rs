use crate::{preset::NodeKind, retry::RetryConfig};
use anyhow::Context;
use serde::de::{Error, MapAccess};
use serde::{de, Deserialize, Deserializer};
use std::fmt::{self, Formatter};
use std::fs;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub operator: OperatorConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Control plane API URL
    pub api: Url,

    /// Bearer token for authenticating to the control plane
    #[serde(default)]
    pub token: Option<Secret>,

    /// Ignore cert validation
    #[serde(default)]
    pub insecure_tls: bool,

    /// Interval between reconcile passes
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,

    /// Objects to reconcile on every pass, in order
    #[serde(default)]
    pub objects: Vec<ManagedObject>,
}

impl OperatorConfig {
    pub fn interval(&self) -> Duration {
        self.interval.unwrap_or(Duration::from_secs(60))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// Retries for pushing configuration to a node
    #[serde(default)]
    pub propagation: RetryConfig,

    /// Retries for each per-target sync call
    #[serde(default = "default_sync_retry")]
    pub sync: RetryConfig,

    /// Counters every sync report carries, even when nothing was synced
    #[serde(default = "default_counters")]
    pub counters: Vec<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            propagation: RetryConfig::default(),
            sync: default_sync_retry(),
            counters: default_counters(),
        }
    }
}

fn default_sync_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        ..Default::default()
    }
}

fn default_counters() -> Vec<String> {
    vec!["created".into(), "updated".into(), "deleted".into()]
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ManagedObject {
    Node {
        id: String,
        #[serde(default, rename = "nodeKind")]
        node_kind: NodeKind,
    },
    KeyBackend {
        id: String,
    },
    Deployment {
        id: String,
    },
    SyncSource {
        id: String,
    },
}

impl fmt::Display for ManagedObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node { id, .. } => write!(f, "node {id}"),
            Self::KeyBackend { id } => write!(f, "key backend {id}"),
            Self::Deployment { id } => write!(f, "deployment {id}"),
            Self::SyncSource { id } => write!(f, "sync source {id}"),
        }
    }
}

/// A secret value, given inline or read from a file.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StringOrFile;

        #[derive(serde::Deserialize)]
        struct File {
            path: String,
        }

        impl<'de> de::Visitor<'de> for StringOrFile {
            type Value = Secret;

            fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
                write!(
                    formatter,
                    "Expected either the secret value, or an object with a path field"
                )
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                Ok(Secret(v.to_string()))
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let file: File =
                    Deserialize::deserialize(de::value::MapAccessDeserializer::new(map))?;
                let content = fs::read_to_string(&file.path).map_err(|e| {
                    Error::custom(format!(
                        "failed to load secret from file ({}): {e}",
                        file.path
                    ))
                })?;
                Ok(Secret(content.trim().to_string()))
            }
        }

        deserializer.deserialize_any(StringOrFile)
    }
}

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("failed to open config {}", path.display()))?;
    serde_yaml::from_reader(file).with_context(|| format!("invalid config {}", path.display()))
}
