//! State cache owner.
//!
//! Amortizes RPC cost: a cheap delta probe on two monotone counters decides
//! when a full refresh is worth it, a max-staleness bound forces one
//! regardless, and config-change nudges trigger the lightweight
//! pricing-only path. Readers get sub-millisecond access to the last
//! complete snapshot.

pub mod refresh;
pub mod snapshot;

use crate::broadcast::Broadcaster;
use crate::chain::ChainAdapter;
use crate::identity::IdentityClient;
use alloy::providers::Provider;
use snapshot::AppSnapshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub probe_interval: Duration,
    pub max_staleness: Duration,
    pub history_scan_blocks: u64,
    pub chunk_blocks: u64,
}

#[derive(Default, Clone, Copy, PartialEq, Eq)]
struct ProbeSample {
    protocol_fees_units: u128,
    served_requests: u64,
}

struct RefreshState {
    last_probe: Option<ProbeSample>,
    last_refresh: Option<Instant>,
}

pub struct StateCache<P> {
    adapter: Arc<ChainAdapter<P>>,
    identity: IdentityClient,
    broadcaster: Arc<Broadcaster>,
    current: RwLock<Option<Arc<AppSnapshot>>>,
    state: Mutex<RefreshState>,
    cfg: CacheConfig,
    stop: Arc<AtomicBool>,
}

impl<P: Provider + Clone + Send + Sync + 'static> StateCache<P> {
    pub fn new(
        adapter: Arc<ChainAdapter<P>>,
        identity: IdentityClient,
        broadcaster: Arc<Broadcaster>,
        cfg: CacheConfig,
        stop: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            identity,
            broadcaster,
            current: RwLock::new(None),
            state: Mutex::new(RefreshState {
                last_probe: None,
                last_refresh: None,
            }),
            cfg,
            stop,
        })
    }

    /// The last complete snapshot. `None` only before the first successful
    /// refresh; a failing refresh never clears the previous value.
    pub async fn snapshot(&self) -> Option<Arc<AppSnapshot>> {
        self.current.read().await.clone()
    }

    /// Refresh loop. `nudges` carries config-change signals from the config
    /// watcher; each triggers the pricing-only broadcast.
    pub async fn run(self: Arc<Self>, mut nudges: mpsc::Receiver<()>) {
        tracing::info!(
            probe_ms = self.cfg.probe_interval.as_millis() as u64,
            max_staleness_ms = self.cfg.max_staleness.as_millis() as u64,
            "state cache started"
        );
        // Seed eagerly so downstream readers have data from the start.
        self.refresh_if_due(true).await;

        loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("state cache stopped");
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.probe_interval) => {
                    self.refresh_if_due(false).await;
                }
                nudge = nudges.recv() => {
                    match nudge {
                        Some(()) => self.refresh_pricing().await,
                        None => {
                            tracing::info!("config nudge channel closed; cache exiting");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Decide between skip and full refresh: refresh when a probe counter
    /// moved, when max staleness elapsed, or when forced.
    async fn refresh_if_due(&self, force: bool) {
        let due = force || self.probe_says_refresh().await;
        if !due {
            return;
        }
        match self.refresh_full().await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                state.last_refresh = Some(Instant::now());
            }
            Err(err) => {
                // Consumers keep reading the previous snapshot.
                tracing::warn!(%err, "cache refresh failed; serving last good snapshot");
            }
        }
    }

    async fn probe_says_refresh(&self) -> bool {
        let stale = {
            let state = self.state.lock().await;
            match state.last_refresh {
                None => true,
                Some(at) => at.elapsed() >= self.cfg.max_staleness,
            }
        };
        if stale {
            return true;
        }

        // Two monotone counters: accumulated protocol fees and the served
        // request count. Either moving means observable state changed.
        let fees = match self.adapter.protocol_fees_accumulator().await {
            Ok(v) => v,
            Err(err) => {
                tracing::debug!(%err, "fee probe failed; skipping refresh decision");
                return false;
            }
        };
        let served = match self.adapter.get_hub_stats().await {
            Ok(stats) => stats.served_requests,
            Err(err) => {
                tracing::debug!(%err, "stats probe failed; skipping refresh decision");
                return false;
            }
        };

        let sample = ProbeSample {
            protocol_fees_units: fees,
            served_requests: served,
        };
        let mut state = self.state.lock().await;
        let changed = state.last_probe != Some(sample);
        state.last_probe = Some(sample);
        changed
    }

    async fn swap_in(&self, snapshot: AppSnapshot) {
        let mut slot = self.current.write().await;
        *slot = Some(Arc::new(snapshot));
    }
}
