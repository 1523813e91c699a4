use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::prompt::HistoryEntry;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeReply {
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("completion endpoint returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// One stateless request/response round trip for a chat reply.
#[async_trait]
pub trait CompletionExchange: Send + Sync {
    async fn exchange(&self, req: ExchangeRequest) -> Result<ExchangeReply, CompletionError>;
}

#[derive(Clone)]
pub struct HttpCompletionExchange {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpCompletionExchange {
    pub fn new(endpoint: &str) -> Result<Self, CompletionError> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, CompletionError> {
        let endpoint = Url::parse(endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CompletionError::Transport)?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionExchange for HttpCompletionExchange {
    async fn exchange(&self, req: ExchangeRequest) -> Result<ExchangeReply, CompletionError> {
        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&req)
            .send()
            .await
            .map_err(CompletionError::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let message = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(CompletionError::Status { status, message });
        }

        resp.json::<ExchangeReply>()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))
    }
}
