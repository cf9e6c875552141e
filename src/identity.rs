//! Address → basename resolution via the identity service.
//!
//! Failure mode is degrade-to-None: the snapshot keeps the endpoint and
//! just leaves the owner profile fields empty.

use alloy::primitives::Address;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const IDENTITY_HTTP_TIMEOUT_MS: u64 = 2_500;
const BATCH_CONCURRENCY: usize = 5;

#[derive(Deserialize)]
struct NameResponse {
    name: Option<String>,
}

#[derive(Clone)]
pub struct IdentityClient {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl IdentityClient {
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(IDENTITY_HTTP_TIMEOUT_MS))
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(%err, "identity http client build failed; using defaults");
                reqwest::Client::new()
            });
        Self {
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn resolve(&self, address: Address) -> Option<String> {
        let base = self.base_url.as_ref()?;
        let url = format!("{base}/v1/names/{address}");
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(%address, %err, "basename lookup failed");
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        match response.json::<NameResponse>().await {
            Ok(body) => body.name.filter(|n| !n.is_empty()),
            Err(err) => {
                tracing::debug!(%address, %err, "basename response malformed");
                None
            }
        }
    }

    /// Resolve a batch with bounded concurrency; output order matches input.
    pub async fn resolve_many(&self, addresses: Vec<Address>) -> Vec<Option<String>> {
        if self.base_url.is_none() {
            return vec![None; addresses.len()];
        }
        let total = addresses.len();
        let sem = Arc::new(Semaphore::new(BATCH_CONCURRENCY));
        let mut set = tokio::task::JoinSet::new();
        for (idx, address) in addresses.into_iter().enumerate() {
            let this = self.clone();
            let sem = Arc::clone(&sem);
            set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                (idx, this.resolve(address).await)
            });
        }
        let mut out = vec![None; total];
        while let Some(joined) = set.join_next().await {
            if let Ok((idx, name)) = joined {
                out[idx] = name;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_degrades_to_none() {
        let client = IdentityClient::new(None);
        assert!(!client.is_configured());
        assert_eq!(client.resolve(Address::ZERO).await, None);
        let batch = client
            .resolve_many(vec![Address::ZERO, Address::repeat_byte(1)])
            .await;
        assert_eq!(batch, vec![None, None]);
    }
}
