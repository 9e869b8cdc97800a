//! Upstream HTTP calls for both wire formats.
//!
//! Grounded on `neuron-provider-anthropic/openai::client`'s builder shape
//! (base URL, API key, provider-specific auth header) — collapsed here
//! into one object with two call methods since the proxy always knows
//! which upstream a given request routes to.

use crate::error::ProxyError;
use crate::translate::TargetRequest;
use async_trait::async_trait;

/// One upstream HTTP round trip, abstracted so tests can inject a mock
/// that counts calls without touching the network.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Call the source-format upstream with a request body already in
    /// source wire format. Returns the upstream's raw status and body.
    async fn call_source(&self, body: &serde_json::Value) -> Result<(u16, serde_json::Value), ProxyError>;

    /// Call the target-format upstream with an already-translated request.
    async fn call_target(&self, body: &TargetRequest) -> Result<(u16, serde_json::Value), ProxyError>;
}

/// The real upstream client, built from per-provider base URLs and keys.
pub struct HttpUpstream {
    http: reqwest::Client,
    source_base_url: String,
    source_api_key: Option<String>,
    target_base_url: String,
    target_api_key: Option<String>,
}

impl HttpUpstream {
    /// Build an upstream client. Either api key may be `None` if that
    /// provider isn't configured in this installation; a request routed
    /// there then fails with [`ProxyError::MissingCredentials`].
    pub fn new(
        source_base_url: impl Into<String>,
        source_api_key: Option<String>,
        target_base_url: impl Into<String>,
        target_api_key: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            source_base_url: source_base_url.into(),
            source_api_key,
            target_base_url: target_base_url.into(),
            target_api_key,
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn call_source(&self, body: &serde_json::Value) -> Result<(u16, serde_json::Value), ProxyError> {
        let api_key = self.source_api_key.as_ref().ok_or(ProxyError::MissingCredentials)?;
        let resp = self
            .http
            .post(format!("{}/v1/messages", self.source_base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(body)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(e.to_string()))?;
        decode(resp).await
    }

    async fn call_target(&self, body: &TargetRequest) -> Result<(u16, serde_json::Value), ProxyError> {
        let api_key = self.target_api_key.as_ref().ok_or(ProxyError::MissingCredentials)?;
        let resp = self
            .http
            .post(format!("{}/v1/responses", self.target_base_url))
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(e.to_string()))?;
        decode(resp).await
    }
}

async fn decode(resp: reqwest::Response) -> Result<(u16, serde_json::Value), ProxyError> {
    let status = resp.status().as_u16();
    let value = resp
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ProxyError::UpstreamUnreachable(format!("unparsable upstream body: {e}")))?;
    Ok((status, value))
}
