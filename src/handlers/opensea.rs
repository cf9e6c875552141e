//! OpenSea endpoint family: REST proxy.
//!
//! Request params are `{"path": "/api/v2/...", "query": {..}}`; the
//! response bytes are the upstream body verbatim.

use crate::chain::types::{Endpoint, Request};
use crate::error::HandlerError;
use crate::handlers::{enforce_response_cap, EndpointHandler};
use alloy::primitives::Bytes;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const UPSTREAM_TIMEOUT_MS: u64 = 8_000;

#[derive(Deserialize)]
struct RestEnvelope {
    path: String,
    #[serde(default)]
    query: BTreeMap<String, String>,
}

pub struct OpenSeaHandler {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl OpenSeaHandler {
    pub fn from_env() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(UPSTREAM_TIMEOUT_MS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: std::env::var("OPENSEA_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

#[async_trait]
impl EndpointHandler for OpenSeaHandler {
    fn name(&self) -> &'static str {
        "opensea"
    }

    async fn produce(
        &self,
        request: &Request,
        endpoint: &Endpoint,
    ) -> Result<Bytes, HandlerError> {
        let envelope: RestEnvelope = serde_json::from_slice(&request.params)
            .map_err(|e| HandlerError::BadParams(format!("rest envelope: {e}")))?;
        if !envelope.path.starts_with('/') {
            return Err(HandlerError::BadParams(
                "path must be absolute".to_string(),
            ));
        }

        let base = endpoint.url.trim_end_matches('/');
        let url = format!("{base}{}", envelope.path);
        let mut builder = self.client.get(&url).query(&envelope.query);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder.send().await.map_err(|e| {
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

        let body = response
            .bytes()
            .await
            .map_err(|e| HandlerError::Upstream(format!("body read: {e}")))?;
        enforce_response_cap(body.to_vec(), endpoint.max_response_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_requires_absolute_path() {
        let parsed: RestEnvelope =
            serde_json::from_slice(br#"{"path":"collections/cool-cats"}"#).unwrap();
        assert!(!parsed.path.starts_with('/'));
    }

    #[test]
    fn envelope_parses_query_map() {
        let parsed: RestEnvelope = serde_json::from_slice(
            br#"{"path":"/api/v2/listings","query":{"limit":"5","chain":"base"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.query.get("limit").map(String::as_str), Some("5"));
    }
}
