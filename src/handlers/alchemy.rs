//! Alchemy endpoint family: JSON-RPC proxy.
//!
//! Request params are a JSON envelope `{"method": ..., "params": [...]}`;
//! the response bytes are the upstream JSON-RPC `result` re-serialized.

use crate::chain::types::{Endpoint, Request};
use crate::error::HandlerError;
use crate::handlers::{enforce_response_cap, EndpointHandler};
use alloy::primitives::Bytes;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const UPSTREAM_TIMEOUT_MS: u64 = 8_000;

#[derive(Deserialize)]
struct RpcEnvelope {
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<Value>,
}

pub struct AlchemyHandler {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl AlchemyHandler {
    pub fn from_env() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(UPSTREAM_TIMEOUT_MS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: std::env::var("ALCHEMY_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    fn upstream_url(&self, endpoint: &Endpoint) -> String {
        match &self.api_key {
            Some(key) => format!("{}/{key}", endpoint.url.trim_end_matches('/')),
            None => endpoint.url.clone(),
        }
    }
}

#[async_trait]
impl EndpointHandler for AlchemyHandler {
    fn name(&self) -> &'static str {
        "alchemy"
    }

    async fn produce(
        &self,
        request: &Request,
        endpoint: &Endpoint,
    ) -> Result<Bytes, HandlerError> {
        let envelope: RpcEnvelope = serde_json::from_slice(&request.params)
            .map_err(|e| HandlerError::BadParams(format!("rpc envelope: {e}")))?;

        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": envelope.method,
            "params": envelope.params,
        });

        let response = self
            .client
            .post(self.upstream_url(endpoint))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HandlerError::UpstreamTimeout(UPSTREAM_TIMEOUT_MS)
                } else {
                    HandlerError::Upstream(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::Upstream(format!("http {status}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| HandlerError::Upstream(format!("bad json: {e}")))?;
        if let Some(error) = body.error {
            return Err(HandlerError::Upstream(format!("rpc error: {error}")));
        }
        let result = body.result.unwrap_or(Value::Null);
        let bytes = serde_json::to_vec(&result)
            .map_err(|e| HandlerError::Upstream(format!("serialize: {e}")))?;
        enforce_response_cap(bytes, endpoint.max_response_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_rejects_non_json_params() {
        let raw = b"\x01\x02\x03";
        let parsed: Result<RpcEnvelope, _> = serde_json::from_slice(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn envelope_accepts_method_with_default_params() {
        let raw = br#"{"method":"eth_blockNumber"}"#;
        let parsed: RpcEnvelope = serde_json::from_slice(raw).unwrap();
        assert_eq!(parsed.method, "eth_blockNumber");
        assert!(parsed.params.is_null());
    }
}
