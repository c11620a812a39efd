//! HTTP client for the operator API, used by the task loop.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::error::{BridgeError, ErrorKind};
use crate::session::{Instruction, Outcome, SessionSnapshot};

use super::routes::{RelayRequest, RelayResponse};

/// Errors from [`OperatorClient`] calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server rejected the call with a session-level error.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("operator API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("operator API returned {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    kind: Option<String>,
}

/// Talks to the operator routes served next to the agent transport.
#[derive(Debug, Clone)]
pub struct OperatorClient {
    base_url: String,
    http: reqwest::Client,
}

impl OperatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Liveness probe.
    pub async fn health(&self) -> Result<(), ClientError> {
        let resp = self.http.get(self.url("/health")).send().await?;
        check_status(resp).await.map(|_| ())
    }

    /// Poll [`Self::health`] every `interval` until it succeeds.
    ///
    /// Gives up after `max_attempts` failures when a limit is given.
    pub async fn wait_until_ready(
        &self,
        interval: Duration,
        max_attempts: Option<u32>,
    ) -> Result<(), ClientError> {
        let mut attempt = 0u32;
        loop {
            match self.health().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(e);
                    }
                    tracing::debug!(attempt, error = %e, "operator API not ready yet");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    /// Relay an instruction and wait, without timeout, for the outcome.
    pub async fn relay(&self, instruction: &Instruction) -> Result<Outcome, ClientError> {
        let body = RelayRequest {
            instruction: instruction.text.clone(),
            label: instruction.label.clone(),
        };
        let resp = self.http.post(self.url("/relay")).json(&body).send().await?;
        let resp = check_status(resp).await?;
        let relay: RelayResponse = resp.json().await?;
        Ok(Outcome {
            output: relay.result,
            success: relay.success,
        })
    }

    /// End the session.
    pub async fn terminate(&self) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(self.url("/terminate"))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }

    pub async fn status(&self) -> Result<SessionSnapshot, ClientError> {
        let resp = self.http.get(self.url("/status")).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }
}

/// Pass successful responses through; turn error bodies back into
/// [`BridgeError`] where the server said which one it was.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let Ok(body) = serde_json::from_str::<ErrorBody>(&text) else {
        return Err(ClientError::Api {
            status: status.as_u16(),
            message: text,
        });
    };

    let bridge = match body.kind.as_deref().map(str::parse::<ErrorKind>) {
        Some(Ok(ErrorKind::AlreadyPending)) => Some(BridgeError::AlreadyPending),
        Some(Ok(ErrorKind::SessionClosed)) => Some(BridgeError::SessionClosed),
        Some(Ok(ErrorKind::PeerDisconnected)) => Some(BridgeError::PeerDisconnected),
        _ => None,
    };
    match bridge {
        Some(err) => Err(ClientError::Bridge(err)),
        None => Err(ClientError::Api {
            status: status.as_u16(),
            message: body.error,
        }),
    }
}
