use async_trait::async_trait;
use reqwest::{IntoUrl, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use tracing::instrument;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build request: {0}")]
    Request(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("not found: {body}")]
    NotFound { body: String },
    #[error("service error ({code}): {body}")]
    Service { code: StatusCode, body: String },
}

impl ClientError {
    pub fn from_response(code: StatusCode, body: impl Into<String>) -> Self {
        let body = body.into();
        match code {
            StatusCode::NOT_FOUND => Self::NotFound { body },
            code => Self::Service { code, body },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The response body the remote side sent along with the failure, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::NotFound { body } | Self::Service { body, .. } => Some(body),
            Self::Request(_) | Self::Transport(_) => None,
        }
    }
}

/// Access to the remote control plane.
///
/// Any non-2xx response is an error whose message embeds the response body.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn invoke(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, ClientError>;
}

#[derive(Clone, Debug)]
pub struct ApiClientBuilder {
    api: Url,
    token: Option<String>,
    insecure_tls: bool,
}

impl ApiClientBuilder {
    pub fn new<U>(api: U) -> Result<Self, reqwest::Error>
    where
        U: IntoUrl,
    {
        Ok(Self::from_url(api.into_url()?))
    }

    pub fn from_url(api: Url) -> Self {
        Self {
            api,
            token: None,
            insecure_tls: false,
        }
    }

    pub fn token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn insecure_tls(mut self, insecure_tls: bool) -> Self {
        self.insecure_tls = insecure_tls;
        self
    }

    pub fn build(self) -> anyhow::Result<ApiClient> {
        if self.insecure_tls {
            log::warn!("TLS certificate validation is disabled");
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.insecure_tls)
            .build()?;
        Ok(ApiClient::new(client, self.api, self.token))
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    api: Url,
    token: Option<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("api", &self.api.as_str())
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ApiClient {
    pub fn new(client: reqwest::Client, api: Url, token: Option<String>) -> Self {
        Self { client, api, token }
    }

    async fn request<R, F, FR, ResFut>(
        &self,
        method: Method,
        url: Url,
        request_handler: F,
        response_handler: FR,
    ) -> Result<R, ClientError>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
        FR: FnOnce(Response) -> ResFut,
        ResFut: Future<Output = Result<R, ClientError>>,
    {
        let mut request = self.client.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let request = request_handler(request);
        let response = request.send().await?;

        response_handler(response).await
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        let mut url = self.api.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::Request(format!("base URL cannot carry path '{path}'")))?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }
}

#[async_trait]
impl RemoteApi for ApiClient {
    #[instrument(skip_all, err, fields(method = %method, path = path))]
    async fn invoke(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, ClientError> {
        let url = self.url(path)?;
        match body {
            Some(body) => self.request(method, url, json(body), read_response).await,
            None => self.request(method, url, empty, read_response).await,
        }
    }
}

#[inline]
fn empty(request: RequestBuilder) -> RequestBuilder {
    request
}

fn json<S: Serialize>(payload: S) -> impl FnOnce(RequestBuilder) -> RequestBuilder {
    move |r| r.json(&payload)
}

async fn read_response(response: Response) -> Result<Vec<u8>, ClientError> {
    log::debug!("Eval response: {:#?}", response);
    let code = response.status();
    if code.is_success() {
        return Ok(response.bytes().await?.to_vec());
    }
    default_response(response).await
}

async fn default_response<T>(response: Response) -> Result<T, ClientError> {
    let code = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::from_response(code, body))
}
