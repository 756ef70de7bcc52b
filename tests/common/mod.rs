//! Scripted in-memory control plane for exercising the provisioning flows.

use async_trait::async_trait;
use provision_operator::client::{ClientError, RemoteApi};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Clone, Debug)]
pub enum Reply {
    Ok(Value),
    Fail(StatusCode, String),
}

impl Reply {
    pub fn fail(code: u16, body: impl Into<String>) -> Self {
        Self::Fail(StatusCode::from_u16(code).unwrap(), body.into())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Replies are consumed in order per method and path, the last one repeats.
#[derive(Default)]
pub struct ScriptedApi {
    replies: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: Method, path: &str, replies: Vec<Reply>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert((method, path.to_string()), replies.into());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.method == method && call.path == path)
            .count()
    }
}

#[async_trait]
impl RemoteApi for ScriptedApi {
    async fn invoke(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, ClientError> {
        self.calls.lock().unwrap().push(Call {
            method: method.clone(),
            path: path.to_string(),
            body,
        });

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&(method, path.to_string())) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Ok(value)) => Ok(value.to_string().into_bytes()),
            Some(Reply::Fail(code, body)) => Err(ClientError::from_response(code, body)),
            None => Err(ClientError::from_response(
                StatusCode::NOT_FOUND,
                format!("no route for {path}"),
            )),
        }
    }
}
