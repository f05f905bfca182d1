//! Outgoing XML-RPC calls against the controller

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::trace;

use super::{codec, RpcCaller, RpcError, Value};

/// HTTP client for the controller's XML-RPC interface
#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
}

impl RpcClient {
    /// Create a client for `url` (e.g. `http://ccu:2010/`)
    ///
    /// No request timeout is configured: a call the controller never answers
    /// stays pending without affecting other calls.
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RpcError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl RpcCaller for RpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let body = codec::encode_call(method, &params);
        trace!("rpc > {} {}", method, body);

        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::HttpStatus(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        codec::decode_response(&codec::decode_body(&bytes))
    }
}
