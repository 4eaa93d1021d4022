//! Client side of the merge server protocol.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{Snapshot, SyncEnvelope};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error("Invalid sync payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The server holding canonical state.
///
/// Implemented over HTTP by [`HttpRemote`]; tests use [`super::InMemoryRemote`].
pub trait RemoteAuthority: Send + Sync + 'static {
    /// Send local state, receive the merged canonical state.
    fn push(
        &self,
        envelope: &SyncEnvelope,
    ) -> impl Future<Output = RemoteResult<SyncEnvelope>> + Send;

    /// Canonical state without contributing anything.
    fn fetch(&self) -> impl Future<Output = RemoteResult<Snapshot>> + Send;

    /// Cheap reachability check used as the connectivity signal.
    fn ping(&self) -> impl Future<Output = bool> + Send;
}

/// `reqwest` client for the kinsync API.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemote {
    /// `timeout` bounds every request, so a hung server fails the cycle instead
    /// of stalling the coordinator.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> RemoteResult<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|error| {
            RemoteError::InvalidPayload(format!("{error}: {}", compact_text(&body)))
        })
    }
}

impl RemoteAuthority for HttpRemote {
    async fn push(&self, envelope: &SyncEnvelope) -> RemoteResult<SyncEnvelope> {
        let response = self
            .client
            .post(self.endpoint("/api/sync"))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(envelope)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn fetch(&self) -> RemoteResult<Snapshot> {
        let response = self
            .client
            .get(self.endpoint("/api/store"))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn ping(&self) -> bool {
        match self.client.get(self.endpoint("/healthz")).send().await {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                tracing::debug!(%error, "Merge server unreachable");
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("server URL must not be empty".to_string())
    })?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "server URL must include http:// or https://".to_string(),
        ))
    }
}
