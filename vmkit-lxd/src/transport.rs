use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use vmkit_common::{Error, Result};

/// Default per-request timeout; state-change PUTs use a shorter one (the
/// daemon answers those immediately with a task handle).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const STATE_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a remote request that reached the daemon.
///
/// 404 is a value rather than an error: the daemon uses it both for genuine
/// absence ("needs creation", "already gone") and as an implicit completion
/// marker for pruned operation records, and every caller handles it locally.
#[derive(Debug, Clone)]
pub enum RemoteResponse {
    Found(Value),
    NotFound,
}

/// Thin request seam against the daemon's JSON API. One method keeps test
/// doubles trivial to script.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<RemoteResponse>;
}

/// Unwrap a reply that must exist. A 404 here means the remote contradicted
/// itself (e.g. answered a mutation on a resource it just accepted).
pub fn expect_found(method: &str, url: &str, response: RemoteResponse) -> Result<Value> {
    match response {
        RemoteResponse::Found(value) => Ok(value),
        RemoteResponse::NotFound => Err(Error::RequestFailed {
            method: method.to_string(),
            url: url.to_string(),
            detail: "remote answered 404 for a resource that must exist".to_string(),
        }),
    }
}

/// Default transport over reqwest.
///
/// Talks to the daemon's HTTP(S) listener. Deployments that only expose a
/// unix socket front it with their own `Transport` implementation.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        // No overall client timeout would let a stalled daemon hang a
        // lifecycle operation forever.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static configuration");
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<RemoteResponse> {
        let verb = reqwest::Method::from_bytes(method.as_bytes()).map_err(|_| {
            Error::RequestFailed {
                method: method.to_string(),
                url: url.to_string(),
                detail: "invalid HTTP method".to_string(),
            }
        })?;

        let mut request = self.client.request(verb, url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| Error::RequestFailed {
            method: method.to_string(),
            url: url.to_string(),
            detail: e.to_string(),
        })?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(RemoteResponse::NotFound);
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::RemoteFailure {
                url: url.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        let json: Value = response.json().await.map_err(|e| Error::RequestFailed {
            method: method.to_string(),
            url: url.to_string(),
            detail: format!("invalid JSON reply: {}", e),
        })?;

        Ok(RemoteResponse::Found(json))
    }
}
