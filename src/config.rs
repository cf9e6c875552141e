//! Environment-driven runtime configuration.
//!
//! All tunables come from environment variables with clamped fallbacks so a
//! mistyped value degrades to a sane default instead of wedging a loop.

use crate::error::{ConfigError, Result};
use alloy::primitives::Address;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Base mainnet: the deployment chain for the hub contracts.
pub const DEFAULT_CHAIN_ID: u64 = 8453;
pub const DEFAULT_RPC_URL: &str = "https://mainnet.base.org";

const DEFAULT_WATCHER_POLL_MS: u64 = 2_000;
const DEFAULT_WATCHER_MAX_POLL_MS: u64 = 30_000;
const DEFAULT_LOG_CHUNK_BLOCKS: u64 = 1_000;
const DEFAULT_LOOKBACK_BLOCKS: u64 = 1_000;
const DEFAULT_FALLBACK_POLL_MS: u64 = 30_000;
const DEFAULT_KEEPALIVE_POLL_MS: u64 = 10_000;
const DEFAULT_SWEEPER_INTERVAL_MS: u64 = 300_000;
const DEFAULT_BUYBACK_INTERVAL_MS: u64 = 3_600_000;
const DEFAULT_REWARDS_INTERVAL_MS: u64 = 300_000;
const DEFAULT_HOOK_INTERVAL_MS: u64 = 3_600_000;
const DEFAULT_CACHE_PROBE_MS: u64 = 5_000;
const DEFAULT_CACHE_MAX_STALENESS_MS: u64 = 30_000;
const DEFAULT_STALE_REQUEST_SECS: u64 = 300;
const DEFAULT_SUBSCRIPTION_CACHE_TTL_MS: u64 = 60_000;
const DEFAULT_HISTORY_SCAN_BLOCKS: u64 = 50_000;

fn load_env_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

fn load_env_address(name: &str) -> Result<Option<Address>> {
    match env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let addr = trimmed.parse::<Address>().map_err(|e| {
                ConfigError::Invalid(format!("{name} must be a 20-byte hex address: {e}"))
            })?;
            Ok(Some(addr))
        }
    }
}

fn require_address(name: &str) -> Result<Address> {
    load_env_address(name)?.ok_or_else(|| ConfigError::Missing(name.to_string()).into())
}

fn validate_http_url(name: &str, raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::Invalid(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))
        .into()),
    }
}

/// Contract addresses the agent talks to. The hub and keep-alive contracts
/// are required; the rest disable their owning loop when unset.
#[derive(Debug, Clone)]
pub struct Contracts {
    pub hub: Address,
    pub keepalive: Address,
    pub staking: Option<Address>,
    pub usdc: Option<Address>,
    pub buyback_module: Option<Address>,
    pub price_oracle: Option<Address>,
    pub token: Option<Address>,
    pub swap_router: Option<Address>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contracts: Contracts,
    /// Signing key. Absent means the agent runs read-only: every write path
    /// logs a warning at startup and stays disabled.
    pub admin_private_key: Option<String>,
    pub identity_service_url: Option<String>,
    pub cursor_dir: PathBuf,

    pub watcher_poll: Duration,
    pub watcher_max_poll: Duration,
    pub log_chunk_blocks: u64,
    pub default_lookback_blocks: u64,
    pub fallback_poll: Duration,
    pub keepalive_poll: Duration,
    pub sweeper_interval: Duration,
    pub buyback_interval: Duration,
    pub rewards_interval: Duration,
    pub hook_interval: Duration,
    pub cache_probe_interval: Duration,
    pub cache_max_staleness: Duration,
    pub stale_request_after: Duration,
    pub subscription_cache_ttl: Duration,
    pub history_scan_blocks: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let rpc_url = env::var("RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string());
        validate_http_url("RPC_URL", &rpc_url)?;

        let chain_id = load_env_u64("CHAIN_ID", DEFAULT_CHAIN_ID, 1, u64::MAX);

        let contracts = Contracts {
            hub: require_address("HUB_CONTRACT")?,
            keepalive: require_address("KEEPALIVE_CONTRACT")?,
            staking: load_env_address("STAKING_CONTRACT")?,
            usdc: load_env_address("USDC_CONTRACT")?,
            buyback_module: load_env_address("BUYBACK_MODULE")?,
            price_oracle: load_env_address("PRICE_ORACLE")?,
            token: load_env_address("TOKEN_CONTRACT")?,
            swap_router: load_env_address("SWAP_ROUTER")?,
        };

        let admin_private_key = env::var("ADMIN_PRIVATE_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let identity_service_url = env::var("IDENTITY_SERVICE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if let Some(url) = &identity_service_url {
            validate_http_url("IDENTITY_SERVICE_URL", url)?;
        }

        let cursor_dir = env::var("CURSOR_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Ok(Self {
            rpc_url,
            chain_id,
            contracts,
            admin_private_key,
            identity_service_url,
            cursor_dir,
            watcher_poll: Duration::from_millis(load_env_u64(
                "WATCHER_POLL_MS",
                DEFAULT_WATCHER_POLL_MS,
                250,
                60_000,
            )),
            watcher_max_poll: Duration::from_millis(load_env_u64(
                "WATCHER_MAX_POLL_MS",
                DEFAULT_WATCHER_MAX_POLL_MS,
                1_000,
                300_000,
            )),
            log_chunk_blocks: load_env_u64("LOG_CHUNK_BLOCKS", DEFAULT_LOG_CHUNK_BLOCKS, 10, 1_000),
            default_lookback_blocks: load_env_u64(
                "DEFAULT_LOOKBACK_BLOCKS",
                DEFAULT_LOOKBACK_BLOCKS,
                10,
                100_000,
            ),
            fallback_poll: Duration::from_millis(load_env_u64(
                "FALLBACK_POLL_MS",
                DEFAULT_FALLBACK_POLL_MS,
                5_000,
                600_000,
            )),
            keepalive_poll: Duration::from_millis(load_env_u64(
                "KEEPALIVE_POLL_MS",
                DEFAULT_KEEPALIVE_POLL_MS,
                1_000,
                600_000,
            )),
            sweeper_interval: Duration::from_millis(load_env_u64(
                "SWEEPER_INTERVAL_MS",
                DEFAULT_SWEEPER_INTERVAL_MS,
                30_000,
                3_600_000,
            )),
            buyback_interval: Duration::from_millis(load_env_u64(
                "BUYBACK_INTERVAL_MS",
                DEFAULT_BUYBACK_INTERVAL_MS,
                60_000,
                86_400_000,
            )),
            rewards_interval: Duration::from_millis(load_env_u64(
                "REWARDS_INTERVAL_MS",
                DEFAULT_REWARDS_INTERVAL_MS,
                30_000,
                86_400_000,
            )),
            hook_interval: Duration::from_millis(load_env_u64(
                "HOOK_INTERVAL_MS",
                DEFAULT_HOOK_INTERVAL_MS,
                60_000,
                86_400_000,
            )),
            cache_probe_interval: Duration::from_millis(load_env_u64(
                "CACHE_PROBE_MS",
                DEFAULT_CACHE_PROBE_MS,
                1_000,
                60_000,
            )),
            cache_max_staleness: Duration::from_millis(load_env_u64(
                "CACHE_MAX_STALENESS_MS",
                DEFAULT_CACHE_MAX_STALENESS_MS,
                5_000,
                600_000,
            )),
            stale_request_after: Duration::from_secs(load_env_u64(
                "STALE_REQUEST_SECS",
                DEFAULT_STALE_REQUEST_SECS,
                60,
                3_600,
            )),
            subscription_cache_ttl: Duration::from_millis(load_env_u64(
                "SUBSCRIPTION_CACHE_TTL_MS",
                DEFAULT_SUBSCRIPTION_CACHE_TTL_MS,
                5_000,
                600_000,
            )),
            history_scan_blocks: load_env_u64(
                "HISTORY_SCAN_BLOCKS",
                DEFAULT_HISTORY_SCAN_BLOCKS,
                1_000,
                500_000,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rejects_out_of_range_values() {
        std::env::set_var("HUB_AGENT_TEST_CLAMP", "999999999");
        assert_eq!(load_env_u64("HUB_AGENT_TEST_CLAMP", 5, 1, 100), 100);
        std::env::set_var("HUB_AGENT_TEST_CLAMP", "not-a-number");
        assert_eq!(load_env_u64("HUB_AGENT_TEST_CLAMP", 5, 1, 100), 5);
        std::env::remove_var("HUB_AGENT_TEST_CLAMP");
    }

    #[test]
    fn http_url_validation_rejects_ws_scheme() {
        assert!(validate_http_url("RPC_URL", "https://mainnet.base.org").is_ok());
        assert!(validate_http_url("RPC_URL", "wss://mainnet.base.org").is_err());
        assert!(validate_http_url("RPC_URL", "not a url").is_err());
    }
}
