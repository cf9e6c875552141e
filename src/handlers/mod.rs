//! Upstream endpoint adapters.
//!
//! A handler turns request params into response bytes by calling the
//! upstream API behind the registered endpoint. Each endpoint family (the
//! URL host decides) implements [`EndpointHandler`].

pub mod alchemy;
pub mod opensea;

use crate::chain::types::{Endpoint, Request};
use crate::error::HandlerError;
use alloy::primitives::Bytes;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait EndpointHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Call the upstream API and produce the response bytes to write
    /// on-chain. Must respect `endpoint.max_response_bytes`.
    async fn produce(&self, request: &Request, endpoint: &Endpoint)
        -> Result<Bytes, HandlerError>;
}

/// Static registry of the endpoint families this agent can serve. An
/// endpoint whose URL matches no family is cancelled by the router so the
/// consumer's funds are refunded.
pub struct HandlerRegistry {
    handlers: Vec<(&'static str, Arc<dyn EndpointHandler>)>,
}

impl HandlerRegistry {
    pub fn with_default_handlers() -> Self {
        Self {
            handlers: vec![
                ("alchemy.com", Arc::new(alchemy::AlchemyHandler::from_env())),
                ("opensea.io", Arc::new(opensea::OpenSeaHandler::from_env())),
            ],
        }
    }

    pub fn resolve(&self, endpoint: &Endpoint) -> Option<Arc<dyn EndpointHandler>> {
        let url = endpoint.url.to_ascii_lowercase();
        self.handlers
            .iter()
            .find(|(marker, _)| url.contains(marker))
            .map(|(_, handler)| Arc::clone(handler))
    }

    pub fn family_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Enforce the endpoint's declared response-size cap before anything is
/// submitted on-chain.
pub fn enforce_response_cap(body: Vec<u8>, max_bytes: u64) -> Result<Bytes, HandlerError> {
    let max = usize::try_from(max_bytes).unwrap_or(usize::MAX);
    if max > 0 && body.len() > max {
        return Err(HandlerError::ResponseTooLarge {
            max,
            got: body.len(),
        });
    }
    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256, U256};

    fn endpoint_with_url(url: &str) -> Endpoint {
        Endpoint {
            id: B256::ZERO,
            url: url.to_string(),
            input_format: "json".to_string(),
            output_format: "json".to_string(),
            base_cost_units: U256::ZERO,
            max_response_bytes: 1_024,
            callback_gas_limit: 0,
            estimated_gas_cost_wei: U256::ZERO,
            owner: Address::ZERO,
            active: true,
            registered_at: 0,
        }
    }

    #[test]
    fn registry_routes_by_url_host() {
        let registry = HandlerRegistry::with_default_handlers();
        let alchemy = endpoint_with_url("https://base-mainnet.g.alchemy.com/v2");
        let opensea = endpoint_with_url("https://api.opensea.io/api/v2");
        let unknown = endpoint_with_url("https://api.example.org/v1");
        assert_eq!(registry.resolve(&alchemy).unwrap().name(), "alchemy");
        assert_eq!(registry.resolve(&opensea).unwrap().name(), "opensea");
        assert!(registry.resolve(&unknown).is_none());
    }

    #[test]
    fn response_cap_is_enforced() {
        assert!(enforce_response_cap(vec![0u8; 128], 128).is_ok());
        let err = enforce_response_cap(vec![0u8; 129], 128).unwrap_err();
        assert!(matches!(
            err,
            HandlerError::ResponseTooLarge { max: 128, got: 129 }
        ));
        // Zero cap means the endpoint declared no limit.
        assert!(enforce_response_cap(vec![0u8; 4_096], 0).is_ok());
    }
}
