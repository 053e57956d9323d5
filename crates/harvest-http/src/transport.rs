//! HTTP transport seam and its reqwest implementation

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::HarvestError;
use serde_json::Value;

use crate::config::ClientConfig;

/// Query parameters. Ordered so the cache key is independent of insertion order.
pub type Params = BTreeMap<String, String>;

/// Connect timeout for the pooled client
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest upstream body excerpt kept in an error message
const ERROR_BODY_EXCERPT: usize = 200;

/// One physical GET returning a parsed JSON body.
///
/// Implementations must map non-2xx statuses to [`HarvestError::UpstreamHttp`]
/// and connection failures to [`HarvestError::Network`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str, params: &Params) -> Result<Value, HarvestError>;
}

/// Pooled reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(8)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| HarvestError::config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
        })
    }
}

/// Map a reqwest error without leaking the URL (it may carry credentials).
fn network_error(e: reqwest::Error) -> HarvestError {
    let timeout = e.is_timeout();
    HarvestError::Network {
        message: e.without_url().to_string(),
        timeout,
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(ERROR_BODY_EXCERPT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get_json(&self, url: &str, params: &Params) -> Result<Value, HarvestError> {
        let mut request = self.client.get(url).query(params);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        let body = response.text().await.map_err(network_error)?;
        if !status.is_success() {
            return Err(HarvestError::UpstreamHttp {
                status: status.as_u16(),
                message: excerpt(&body),
            });
        }
        serde_json::from_str(&body).map_err(|e| HarvestError::Decode(e.to_string()))
    }
}
