//! Agent orchestrator binary: wires the watchers, router, keep-alive
//! driver, maintenance loops, and state cache onto one runtime and runs
//! until interrupted.

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::Log;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use hub_agent::broadcast::Broadcaster;
use hub_agent::cache::{CacheConfig, StateCache};
use hub_agent::chain::bindings::Hub;
use hub_agent::chain::ChainAdapter;
use hub_agent::config::Config;
use hub_agent::cursor::CursorStore;
use hub_agent::gate::{DEFAULT_GAS_BUFFER_PCT, DEFAULT_LOSS_TOLERANCE_UNITS};
use hub_agent::handlers::HandlerRegistry;
use hub_agent::identity::IdentityClient;
use hub_agent::keepalive::{KeepAliveConfig, KeepAliveDriver};
use hub_agent::maintenance::{Maintenance, MaintenanceConfig};
use hub_agent::router::{FulfillmentRouter, RouterConfig};
use hub_agent::sender::TxSender;
use hub_agent::watcher::{EventWatcher, WatcherConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const EVENT_CHANNEL_CAPACITY: usize = 1_024;
const CONFIG_NUDGE_CAPACITY: usize = 8;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to `info` when RUST_LOG is unset or invalid to avoid a
    // silent startup.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    tracing::info!(
        rpc = %config.rpc_url,
        chain_id = config.chain_id,
        hub = %config.contracts.hub,
        keepalive = %config.contracts.keepalive,
        "hub-agent starting"
    );

    // Probe connectivity early so configuration failures are visible
    // immediately instead of surfacing inside the first watcher poll.
    let probe = ProviderBuilder::new().on_http(config.rpc_url.parse()?);
    match probe.get_block_number().await {
        Ok(block) => tracing::info!(block, "rpc connectivity ok"),
        Err(err) => tracing::warn!(%err, "rpc connectivity probe failed; loops will back off"),
    }

    match config.admin_private_key.clone() {
        Some(key) => {
            let signer: PrivateKeySigner = key
                .parse()
                .map_err(|e| anyhow::anyhow!("ADMIN_PRIVATE_KEY invalid: {e}"))?;
            let agent = signer.address();
            tracing::info!(%agent, "signing identity loaded; writes enabled");
            // ProviderBuilder's default fillers handle nonce, chain id and
            // fee fields; write serialization is still the sender's job.
            let provider = ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .on_http(config.rpc_url.parse()?);
            run_agent(provider, agent, true, config).await
        }
        None => {
            tracing::warn!(
                "ADMIN_PRIVATE_KEY unset; write paths disabled, read paths still function"
            );
            let provider = ProviderBuilder::new().on_http(config.rpc_url.parse()?);
            run_agent(provider, Address::ZERO, false, config).await
        }
    }
}

async fn run_agent<P>(
    provider: P,
    agent: Address,
    writes_enabled: bool,
    config: Config,
) -> anyhow::Result<()>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    match provider.get_chain_id().await {
        Ok(chain_id) if chain_id != config.chain_id => {
            anyhow::bail!(
                "chain id mismatch: rpc reports {chain_id}, configured {}",
                config.chain_id
            );
        }
        Ok(chain_id) => tracing::info!(chain_id, "chain id pinned"),
        Err(err) => tracing::warn!(%err, "chain id check failed; proceeding"),
    }

    let stop = Arc::new(AtomicBool::new(false));
    let adapter = Arc::new(ChainAdapter::new(
        provider,
        config.contracts.hub,
        config.contracts.keepalive,
        config.contracts.staking,
        agent,
    ));
    let cursors = Arc::new(CursorStore::new(config.cursor_dir.clone()));
    let sender = Arc::new(TxSender::new(writes_enabled));
    let broadcaster = Arc::new(Broadcaster::new());
    let registry = Arc::new(HandlerRegistry::with_default_handlers());
    tracing::info!(families = registry.family_count(), "handler registry ready");

    // Request pipeline: hub watcher -> router, plus the fallback poll.
    let (hub_tx, hub_rx) = mpsc::channel::<Log>(EVENT_CHANNEL_CAPACITY);
    let hub_watcher = EventWatcher::new(
        Arc::clone(&adapter),
        Arc::clone(&cursors),
        WatcherConfig {
            label: "hub-watcher".to_string(),
            address: config.contracts.hub,
            topic0s: FulfillmentRouter::<P>::event_topics(),
            poll_interval: config.watcher_poll,
            max_poll_interval: config.watcher_max_poll,
            chunk_blocks: config.log_chunk_blocks,
            default_lookback_blocks: config.default_lookback_blocks,
        },
        Arc::clone(&stop),
    );
    tokio::spawn(hub_watcher.run(hub_tx));

    let router = FulfillmentRouter::new(
        Arc::clone(&adapter),
        Arc::clone(&sender),
        hub_agent::inflight::InflightSet::new("requests"),
        Arc::clone(&registry),
        Arc::clone(&broadcaster),
        Arc::clone(&cursors),
        RouterConfig {
            stale_after: config.stale_request_after,
            fallback_poll: config.fallback_poll,
            chunk_blocks: config.log_chunk_blocks,
            lookback_blocks: config.default_lookback_blocks,
            gas_buffer_pct: DEFAULT_GAS_BUFFER_PCT,
            loss_tolerance_units: DEFAULT_LOSS_TOLERANCE_UNITS,
        },
        Arc::clone(&stop),
    );
    tokio::spawn(Arc::clone(&router).run(hub_rx));
    tokio::spawn(Arc::clone(&router).run_fallback());

    // Keep-alive pipeline: poll-and-fulfill plus the subscription watcher.
    let driver = KeepAliveDriver::new(
        Arc::clone(&adapter),
        Arc::clone(&sender),
        Arc::clone(&broadcaster),
        KeepAliveConfig {
            poll_interval: config.keepalive_poll,
            id_cache_ttl: config.subscription_cache_ttl,
            gas_buffer_pct: DEFAULT_GAS_BUFFER_PCT,
            loss_tolerance_units: DEFAULT_LOSS_TOLERANCE_UNITS,
        },
        Arc::clone(&stop),
    );
    let (ka_tx, ka_rx) = mpsc::channel::<Log>(EVENT_CHANNEL_CAPACITY);
    let ka_watcher = EventWatcher::new(
        Arc::clone(&adapter),
        Arc::clone(&cursors),
        WatcherConfig {
            label: "keepalive-watcher".to_string(),
            address: config.contracts.keepalive,
            topic0s: KeepAliveDriver::<P>::event_topics(),
            poll_interval: config.watcher_poll,
            max_poll_interval: config.watcher_max_poll,
            chunk_blocks: config.log_chunk_blocks,
            default_lookback_blocks: config.default_lookback_blocks,
        },
        Arc::clone(&stop),
    );
    tokio::spawn(ka_watcher.run(ka_tx));
    tokio::spawn(Arc::clone(&driver).run());
    tokio::spawn(Arc::clone(&driver).run_events(ka_rx));

    // Config-change watcher nudges the cache's pricing-only path.
    let (cfg_log_tx, mut cfg_log_rx) = mpsc::channel::<Log>(EVENT_CHANNEL_CAPACITY);
    let config_watcher = EventWatcher::new(
        Arc::clone(&adapter),
        Arc::clone(&cursors),
        WatcherConfig {
            label: "hub-config".to_string(),
            address: config.contracts.hub,
            topic0s: vec![
                Hub::PriceOracleUpdated::SIGNATURE_HASH,
                Hub::EndpointUpdated::SIGNATURE_HASH,
                Hub::EndpointGasConfigUpdated::SIGNATURE_HASH,
            ],
            poll_interval: config.watcher_poll,
            max_poll_interval: config.watcher_max_poll,
            chunk_blocks: config.log_chunk_blocks,
            default_lookback_blocks: config.default_lookback_blocks,
        },
        Arc::clone(&stop),
    );
    tokio::spawn(config_watcher.run(cfg_log_tx));
    let (nudge_tx, nudge_rx) = mpsc::channel::<()>(CONFIG_NUDGE_CAPACITY);
    tokio::spawn(async move {
        while let Some(log) = cfg_log_rx.recv().await {
            tracing::debug!(topic = ?log.topic0(), "config change observed");
            // A full nudge queue already has a refresh pending.
            let _ = nudge_tx.try_send(());
        }
    });

    // Maintenance: sweeper, buyback flush, rewards, allowance hook.
    let maintenance = Maintenance::new(
        Arc::clone(&adapter),
        Arc::clone(&sender),
        router.inflight(),
        Arc::clone(&broadcaster),
        Arc::clone(&cursors),
        config.contracts.usdc,
        MaintenanceConfig {
            sweeper_interval: config.sweeper_interval,
            buyback_interval: config.buyback_interval,
            rewards_interval: config.rewards_interval,
            hook_interval: config.hook_interval,
            stale_after: config.stale_request_after,
            chunk_blocks: config.log_chunk_blocks,
            lookback_blocks: config.default_lookback_blocks,
        },
        Arc::clone(&stop),
    );
    maintenance.spawn_all();

    // State cache feeds downstream read consumers and the broadcast sink.
    let cache = StateCache::new(
        Arc::clone(&adapter),
        IdentityClient::new(config.identity_service_url.clone()),
        Arc::clone(&broadcaster),
        CacheConfig {
            probe_interval: config.cache_probe_interval,
            max_staleness: config.cache_max_staleness,
            history_scan_blocks: config.history_scan_blocks,
            chunk_blocks: config.log_chunk_blocks,
        },
        Arc::clone(&stop),
    );
    tokio::spawn(Arc::clone(&cache).run(nudge_rx));

    let status = hub_agent::status::StatusReporter::new(
        Arc::clone(&adapter),
        Arc::clone(&sender),
        router.inflight(),
        Arc::clone(&cache),
        Arc::clone(&stop),
    );
    tokio::spawn(status.run());

    tracing::info!("all loops running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested; stopping loops");
    stop.store(true, Ordering::Relaxed);
    // In-flight RPC calls complete and their results are discarded; this
    // keeps nonce ordering simple during shutdown.
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    tracing::info!(submitted = sender.submitted_count(), "hub-agent stopped");
    Ok(())
}
