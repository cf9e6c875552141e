//! Periodic operator status line.
//!
//! One structured log per interval with the numbers an operator checks
//! first: head block, submitted writes, in-flight counts, and snapshot
//! age. Complements the per-watcher heartbeat, which only proves a single
//! loop is alive.

use crate::cache::StateCache;
use crate::chain::ChainAdapter;
use crate::inflight::InflightSet;
use crate::sender::TxSender;
use alloy::providers::Provider;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_STATUS_INTERVAL_MS: u64 = 60_000;

fn status_interval() -> Duration {
    let ms = std::env::var("STATUS_INTERVAL_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| (5_000..=3_600_000).contains(v))
        .unwrap_or(DEFAULT_STATUS_INTERVAL_MS);
    Duration::from_millis(ms)
}

pub struct StatusReporter<P> {
    adapter: Arc<ChainAdapter<P>>,
    sender: Arc<TxSender>,
    request_inflight: Arc<InflightSet>,
    cache: Arc<StateCache<P>>,
    stop: Arc<AtomicBool>,
}

impl<P: Provider + Clone + Send + Sync + 'static> StatusReporter<P> {
    pub fn new(
        adapter: Arc<ChainAdapter<P>>,
        sender: Arc<TxSender>,
        request_inflight: Arc<InflightSet>,
        cache: Arc<StateCache<P>>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            adapter,
            sender,
            request_inflight,
            cache,
            stop,
        }
    }

    pub async fn run(self) {
        let interval = status_interval();
        loop {
            tokio::time::sleep(interval).await;
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            let head = self.adapter.block_number().await.ok();
            let (cache_age_ms, cached_block) = match self.cache.snapshot().await {
                Some(snapshot) => (Some(snapshot.cache_age_ms()), Some(snapshot.block_number)),
                None => (None, None),
            };
            tracing::info!(
                head = head.unwrap_or(0),
                writes_enabled = self.sender.writes_enabled(),
                submitted = self.sender.submitted_count(),
                requests_in_flight = self.request_inflight.len(),
                cache_age_ms = cache_age_ms.unwrap_or(0),
                cached_block = cached_block.unwrap_or(0),
                "agent status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_clamps_out_of_range_overrides() {
        std::env::set_var("STATUS_INTERVAL_MS", "10");
        assert_eq!(status_interval(), Duration::from_millis(60_000));
        std::env::set_var("STATUS_INTERVAL_MS", "30000");
        assert_eq!(status_interval(), Duration::from_millis(30_000));
        std::env::remove_var("STATUS_INTERVAL_MS");
    }
}
