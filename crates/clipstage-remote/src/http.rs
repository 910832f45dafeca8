//! reqwest-backed client for the highlights backend

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use url::Url;

use clipstage_core::{
    CommitRequest, CommitResult, CommitTransport, FetchError, Record, RecordFetcher,
    StagedOperation, TransportError,
};

use crate::config::{ConfigError, RemoteConfig};
use crate::envelope::{decode_commit_response, decode_scope_records};

/// Request body of the batch endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateBody<'a> {
    scope_id: &'a str,
    operations: &'a [StagedOperation],
}

pub struct HttpBackend {
    client: Client,
    config: RemoteConfig,
}

impl HttpBackend {
    pub fn new(config: RemoteConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(RemoteConfig::from_env()?)
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// `{base}/user/book/{scope}`
    pub fn scope_url(&self, scope_id: &str) -> Result<Url, TransportError> {
        self.endpoint(&["user", "book", scope_id])
    }

    /// `{base}/user/book/{scope}/batch-update`
    pub fn batch_update_url(&self, scope_id: &str) -> Result<Url, TransportError> {
        self.endpoint(&["user", "book", scope_id, "batch-update"])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Network(format!("{} cannot carry a path", self.config.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::TimedOut {
                    after: self.config.timeout(),
                }
            } else {
                TransportError::Network(e.to_string())
            }
        })
    }
}

async fn error_status(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    TransportError::Status { status, message }
}

#[async_trait]
impl CommitTransport for HttpBackend {
    async fn submit(&self, request: &CommitRequest) -> Result<CommitResult, TransportError> {
        let url = self.batch_update_url(&request.scope_id)?;
        let body = BatchUpdateBody {
            scope_id: &request.scope_id,
            operations: &request.operations,
        };

        tracing::debug!(%url, operations = request.operations.len(), "posting batch update");
        let response = self
            .send(self.authorize(self.client.post(url).json(&body)))
            .await?;

        if !response.status().is_success() {
            return Err(error_status(response).await);
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        decode_commit_response(&text)
    }
}

#[async_trait]
impl RecordFetcher for HttpBackend {
    async fn fetch(&self, scope_id: &str) -> Result<Vec<Record>, FetchError> {
        let url = self.scope_url(scope_id)?;

        tracing::debug!(%url, "fetching scope records");
        let response = self.send(self.authorize(self.client.get(url))).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(scope_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(error_status(response).await.into());
        }

        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        decode_scope_records(scope_id, &text)
    }
}
