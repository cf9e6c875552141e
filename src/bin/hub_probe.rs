//! One-shot protocol state dump for operators.
//!
//! Reads the same env configuration as the agent, connects read-only, and
//! prints hub/keep-alive state plus the endpoint table. Useful for
//! verifying contract addresses and RPC health before starting the agent.

use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use hub_agent::cache::snapshot::format_usd;
use hub_agent::chain::ChainAdapter;
use hub_agent::config::Config;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    let provider = ProviderBuilder::new().on_http(config.rpc_url.parse()?);
    let adapter = Arc::new(ChainAdapter::new(
        provider,
        config.contracts.hub,
        config.contracts.keepalive,
        config.contracts.staking,
        Address::ZERO,
    ));

    let head = adapter.block_number().await?;
    println!("rpc:        {}", config.rpc_url);
    println!("head block: {head}");
    println!("hub:        {}", config.contracts.hub);
    println!("keepalive:  {}", config.contracts.keepalive);

    match adapter.get_eth_price().await {
        Ok(price) => println!("eth price:  {} ({price} units)", format_usd(price)),
        Err(err) => println!("eth price:  unavailable ({err})"),
    }

    match adapter.get_hub_stats().await {
        Ok(stats) => {
            println!(
                "hub stats:  {} total / {} served, {} pending fees, volume {}",
                stats.total_requests,
                stats.served_requests,
                format_usd(stats.pending_protocol_fees_units),
                format_usd(stats.total_volume_units),
            );
        }
        Err(err) => println!("hub stats:  unavailable ({err})"),
    }

    match adapter.get_keepalive_stats().await {
        Ok(stats) => {
            println!(
                "keepalive:  {} subscriptions ({} active), {} fulfillments, fees {}",
                stats.subscription_count,
                stats.active_subscriptions,
                stats.total_fulfillments,
                format_usd(stats.total_fees_paid_units),
            );
        }
        Err(err) => println!("keepalive:  unavailable ({err})"),
    }

    let count = adapter.get_endpoint_count().await?;
    println!("endpoints:  {count}");
    for index in 0..count {
        let id = match adapter.endpoint_id_at(index).await {
            Ok(id) => id,
            Err(err) => {
                println!("  [{index}] id unavailable ({err})");
                continue;
            }
        };
        match adapter.get_endpoint(id).await {
            Ok(endpoint) => {
                let base = u128::try_from(endpoint.base_cost_units).unwrap_or(u128::MAX);
                println!(
                    "  [{index}] {id} {} base={} active={} owner={}",
                    endpoint.url,
                    format_usd(base),
                    endpoint.active,
                    endpoint.owner,
                );
            }
            Err(err) => println!("  [{index}] {id} unavailable ({err})"),
        }
    }

    Ok(())
}
