use alloy::primitives::B256;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),
}

/// Typed RPC failure surface. The adapter never retries; callers own the
/// retry policy per loop.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc unavailable: {0}")]
    Unavailable(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("simulation reverted: {0}")]
    Reverted(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("rpc call timed out after {waited_ms}ms: {context}")]
    Timeout { waited_ms: u64, context: String },
    #[error("transaction {tx_hash} reverted on-chain in block {block}")]
    TxReverted { tx_hash: B256, block: u64 },
    #[error("writes disabled: no signing key configured")]
    WritesDisabled,
}

impl ChainError {
    /// Transient failures are re-observed by the next poll cycle; the
    /// watcher backoff only counts these.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Unavailable(_) | ChainError::RateLimited(_) | ChainError::Timeout { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream request timed out after {0}ms")]
    UpstreamTimeout(u64),
    #[error("no handler registered for endpoint {0}")]
    UnknownEndpoint(B256),
    #[error("response exceeded {max} bytes (got {got})")]
    ResponseTooLarge { max: usize, got: usize },
    #[error("malformed request params: {0}")]
    BadParams(String),
}
