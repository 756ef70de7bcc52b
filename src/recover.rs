//! Recovering objects that were created although the creation call failed.
//!
//! The control plane may create an object and then fail a later step of the
//! same request. Its error body then tells whether the object was kept, and
//! under which id, so it can still be tracked and cleaned up later.

use crate::{
    client::{ClientError, RemoteApi},
    status::Status,
};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug)]
pub enum ProvisioningOutcome {
    FullyCreated {
        id: String,
        status: Status,
    },
    PartiallyCreated {
        id: String,
        status: Status,
        stage: String,
        cause: ClientError,
    },
    NotCreated {
        cause: ClientError,
    },
}

impl ProvisioningOutcome {
    /// Id of the remote object that must be tracked, if one exists.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::FullyCreated { id, .. } | Self::PartiallyCreated { id, .. } => Some(id),
            Self::NotCreated { .. } => None,
        }
    }

    pub fn should_persist(&self) -> bool {
        self.id().is_some()
    }

    /// Non-fatal problem to surface alongside persisted state.
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::PartiallyCreated {
                id, stage, cause, ..
            } => Some(format!(
                "object {id} was created but failed at stage '{stage}': {cause}"
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreationFailure {
    #[serde(default, alias = "object_created")]
    created: bool,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "failed_stage")]
    stage: Option<String>,
}

/// Normalize an id that may be sent as a number or a string.
pub fn object_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn parse_failure(body: &[u8]) -> Option<CreationFailure> {
    serde_json::from_slice(body).ok()
}

/// The failure payload may be wrapped in other text, look for the outermost object.
fn embedded_failure(text: &str) -> Option<CreationFailure> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    parse_failure(text[start..=end].as_bytes())
}

pub struct PartialCreationRecoverer {
    api: Arc<dyn RemoteApi>,
    collection: String,
    discriminant: String,
}

impl PartialCreationRecoverer {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        collection: impl Into<String>,
        discriminant: impl Into<String>,
    ) -> Self {
        Self {
            api,
            collection: collection.into(),
            discriminant: discriminant.into(),
        }
    }

    pub async fn recover(&self, cause: ClientError, raw: Option<&[u8]>) -> ProvisioningOutcome {
        let failure = raw
            .and_then(parse_failure)
            .or_else(|| embedded_failure(&cause.to_string()));

        let Some(failure) = failure.filter(|failure| failure.created) else {
            log::debug!("Creation failed without leaving an object behind: {cause}");
            return ProvisioningOutcome::NotCreated { cause };
        };

        let Some(id) = failure.id.as_ref().and_then(object_id) else {
            log::error!("Creation reported an object without an id, it cannot be tracked: {cause}");
            return ProvisioningOutcome::NotCreated { cause };
        };

        let stage = failure.stage.unwrap_or_else(|| "unknown".to_string());
        log::warn!("Object {id} was created despite failing at stage '{stage}'");

        // the failure response may not describe the object completely
        let path = format!("{}/{}", self.collection, id);
        let status = match self.api.invoke(Method::GET, &path, None).await {
            Ok(body) => Status::from_slice(&body, &self.discriminant).unwrap_or_else(|err| {
                log::warn!("Failed to decode status of {id}: {err}");
                Status::unknown()
            }),
            Err(err) => {
                log::warn!("Failed to read back partially created object {id}: {err}");
                Status::unknown()
            }
        };

        ProvisioningOutcome::PartiallyCreated {
            id,
            status,
            stage,
            cause,
        }
    }
}
