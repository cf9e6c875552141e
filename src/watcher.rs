//! Chunked `eth_getLogs` polling with cursor resume.
//!
//! Each watcher owns one durable cursor label. The loop reads the head,
//! scans `[cursor+1, head]` in chunks of at most 1000 blocks, pushes every
//! log into a bounded channel, and persists the cursor only after the full
//! range completed. Error policy: after 3 consecutive transient RPC errors
//! the poll interval doubles (and again every second error after that) up
//! to a 30 s ceiling; after 10 the in-memory cursor resets to 0, which
//! forces a rescan of the configured lookback on the next success.
//! Non-transient failures are logged without feeding the backoff.

use crate::chain::adapter::MAX_LOG_RANGE_BLOCKS;
use crate::chain::ChainAdapter;
use crate::cursor::CursorStore;
use crate::error::ChainError;
use alloy::primitives::{Address, B256};
use alloy::providers::Provider;
use alloy::rpc::types::Log;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const BACKOFF_ERROR_THRESHOLD: u32 = 3;
pub const CURSOR_RESET_ERROR_THRESHOLD: u32 = 10;
pub const HEARTBEAT_EVERY_POLLS: u64 = 100;

/// Poll interval under consecutive errors: base until the third error, then
/// doubling every second error, capped.
pub fn backoff_poll_ms(base_ms: u64, consecutive_errors: u32, cap_ms: u64) -> u64 {
    if consecutive_errors < BACKOFF_ERROR_THRESHOLD {
        return base_ms;
    }
    let doublings = 1 + (consecutive_errors - BACKOFF_ERROR_THRESHOLD) / 2;
    let doublings = doublings.min(16);
    base_ms.saturating_mul(1u64 << doublings).min(cap_ms)
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub label: String,
    pub address: Address,
    pub topic0s: Vec<B256>,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub chunk_blocks: u64,
    pub default_lookback_blocks: u64,
}

pub struct EventWatcher<P> {
    adapter: Arc<ChainAdapter<P>>,
    cursors: Arc<CursorStore>,
    cfg: WatcherConfig,
    stop: Arc<AtomicBool>,
}

impl<P: Provider + Clone + Send + Sync + 'static> EventWatcher<P> {
    pub fn new(
        adapter: Arc<ChainAdapter<P>>,
        cursors: Arc<CursorStore>,
        cfg: WatcherConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            adapter,
            cursors,
            cfg,
            stop,
        }
    }

    /// Run until stopped, pushing each matched log into `sink`. Returns when
    /// the stop flag is set or the receiving side is gone.
    pub async fn run(self, sink: mpsc::Sender<Log>) {
        let label = self.cfg.label.clone();
        let mut last_block = self.cursors.load(&label);
        let mut consecutive_errors: u32 = 0;
        let mut successful_polls: u64 = 0;
        let base_ms = self.cfg.poll_interval.as_millis() as u64;
        let cap_ms = self.cfg.max_poll_interval.as_millis() as u64;

        tracing::info!(label = %label, cursor = last_block, "watcher started");

        loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!(label = %label, "watcher stopped");
                return;
            }

            match self.poll_once(last_block, &sink).await {
                Ok(Some(scanned_to)) => {
                    last_block = scanned_to;
                    if let Err(err) = self.cursors.save(&label, scanned_to) {
                        tracing::warn!(label = %label, %err, "cursor save failed; next restart re-scans");
                    }
                    if consecutive_errors >= BACKOFF_ERROR_THRESHOLD {
                        tracing::info!(
                            label = %label,
                            block = scanned_to,
                            "watcher recovered; poll interval restored"
                        );
                    }
                    consecutive_errors = 0;
                    successful_polls += 1;
                    if successful_polls % HEARTBEAT_EVERY_POLLS == 0 {
                        tracing::info!(label = %label, block = scanned_to, polls = successful_polls, "watcher heartbeat");
                    }
                }
                Ok(None) => {
                    // Head has not advanced; a quiet poll still counts as success.
                    if consecutive_errors >= BACKOFF_ERROR_THRESHOLD {
                        tracing::info!(label = %label, "watcher recovered; poll interval restored");
                    }
                    consecutive_errors = 0;
                    successful_polls += 1;
                    if successful_polls % HEARTBEAT_EVERY_POLLS == 0 {
                        tracing::info!(label = %label, block = last_block, polls = successful_polls, "watcher heartbeat");
                    }
                }
                Err(PollError::SinkClosed) => {
                    tracing::info!(label = %label, "watcher sink closed; exiting");
                    return;
                }
                Err(PollError::Chain(err)) => {
                    if err.is_transient() {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        tracing::warn!(label = %label, %err, consecutive_errors, "watcher poll failed");
                        if consecutive_errors == CURSOR_RESET_ERROR_THRESHOLD {
                            tracing::warn!(
                                label = %label,
                                lookback = self.cfg.default_lookback_blocks,
                                "persistent errors; resetting cursor to force lookback rescan"
                            );
                            last_block = 0;
                        }
                    } else {
                        // A revert or invalid-args from a log poll means a
                        // bad filter or contract address; backing off would
                        // only delay the operator noticing.
                        tracing::warn!(label = %label, %err, "watcher poll failed (non-transient)");
                    }
                }
            }

            let sleep_ms = backoff_poll_ms(base_ms, consecutive_errors, cap_ms);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
    }

    /// One poll: scan `[last_block+1, head]` (or the default lookback when
    /// the cursor is 0). Returns the new cursor position, or `None` when the
    /// head has not advanced.
    async fn poll_once(
        &self,
        last_block: u64,
        sink: &mpsc::Sender<Log>,
    ) -> Result<Option<u64>, PollError> {
        let current = self.adapter.block_number().await.map_err(PollError::Chain)?;
        if current <= last_block {
            return Ok(None);
        }

        let from = scan_start(last_block, current, self.cfg.default_lookback_blocks);
        let logs = collect_chunked(
            &self.adapter,
            self.cfg.address,
            self.cfg.topic0s.clone(),
            from,
            current,
            self.cfg.chunk_blocks,
        )
        .await
        .map_err(PollError::Chain)?;

        for log in logs {
            if sink.send(log).await.is_err() {
                return Err(PollError::SinkClosed);
            }
        }
        Ok(Some(current))
    }
}

enum PollError {
    Chain(ChainError),
    SinkClosed,
}

/// First block of the next scan. A zero cursor means fresh install or forced
/// rescan: fall back to the last `lookback` blocks.
pub fn scan_start(last_block: u64, current: u64, lookback: u64) -> u64 {
    if last_block == 0 {
        current.saturating_sub(lookback.saturating_sub(1)).max(1)
    } else {
        last_block + 1
    }
}

/// Inclusive chunk bounds covering `[from, to]` with at most `chunk` blocks
/// per call.
pub fn chunk_ranges(from: u64, to: u64, chunk: u64) -> Vec<(u64, u64)> {
    let chunk = chunk.clamp(1, MAX_LOG_RANGE_BLOCKS);
    let mut out = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(chunk - 1).min(to);
        out.push((start, end));
        start = end.saturating_add(1);
    }
    out
}

/// Sequential chunked scan of `[from, to]`. Fails on the first bad chunk so
/// the cursor is only advanced after a fully successful range.
pub async fn collect_chunked<P: Provider + Clone>(
    adapter: &ChainAdapter<P>,
    address: Address,
    topic0s: Vec<B256>,
    from: u64,
    to: u64,
    chunk: u64,
) -> Result<Vec<Log>, ChainError> {
    let mut out = Vec::new();
    for (chunk_from, chunk_to) in chunk_ranges(from, to, chunk) {
        let logs = adapter
            .get_logs(address, topic0s.clone(), chunk_from, chunk_to)
            .await?;
        out.extend(logs);
    }
    Ok(out)
}

/// One-shot cursor-labelled scan used by the fallback poll and the sweeper:
/// scan from the label's cursor (or lookback) to the current head, persist
/// the cursor on success, and return the logs.
pub async fn collect_labelled<P: Provider + Clone>(
    adapter: &ChainAdapter<P>,
    cursors: &CursorStore,
    label: &str,
    address: Address,
    topic0s: Vec<B256>,
    chunk: u64,
    lookback: u64,
) -> Result<Vec<Log>, ChainError> {
    let current = adapter.block_number().await?;
    let last = cursors.load(label);
    if current <= last {
        return Ok(Vec::new());
    }
    let from = scan_start(last, current, lookback);
    let logs = collect_chunked(adapter, address, topic0s, from, current, chunk).await?;
    if let Err(err) = cursors.save(label, current) {
        tracing::warn!(label = %label, %err, "cursor save failed");
    }
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_observed_recovery_cycle() {
        // 2s base: errors 1-2 keep the base, the 3rd doubles to 4s, two
        // more errors reach 8s, and the cap holds at 30s.
        assert_eq!(backoff_poll_ms(2_000, 0, 30_000), 2_000);
        assert_eq!(backoff_poll_ms(2_000, 1, 30_000), 2_000);
        assert_eq!(backoff_poll_ms(2_000, 2, 30_000), 2_000);
        assert_eq!(backoff_poll_ms(2_000, 3, 30_000), 4_000);
        assert_eq!(backoff_poll_ms(2_000, 4, 30_000), 4_000);
        assert_eq!(backoff_poll_ms(2_000, 5, 30_000), 8_000);
        assert_eq!(backoff_poll_ms(2_000, 7, 30_000), 16_000);
        assert_eq!(backoff_poll_ms(2_000, 9, 30_000), 30_000);
        assert_eq!(backoff_poll_ms(2_000, 60, 30_000), 30_000);
    }

    #[test]
    fn chunking_never_exceeds_the_range_cap() {
        let ranges = chunk_ranges(1_001, 4_700, 1_000);
        assert_eq!(
            ranges,
            vec![(1_001, 2_000), (2_001, 3_000), (3_001, 4_000), (4_001, 4_700)]
        );
        for (from, to) in ranges {
            assert!(to - from < 1_000);
        }
    }

    #[test]
    fn chunking_handles_single_block_ranges() {
        assert_eq!(chunk_ranges(42, 42, 1_000), vec![(42, 42)]);
    }

    #[test]
    fn fresh_cursor_scans_the_default_lookback() {
        // Cursor 0 at head 10_000 with lookback 1000 scans the last 1000
        // blocks inclusive.
        assert_eq!(scan_start(0, 10_000, 1_000), 9_001);
        // Early chain: never scan below block 1.
        assert_eq!(scan_start(0, 500, 1_000), 1);
        // Warm cursor resumes right after the last scanned block.
        assert_eq!(scan_start(8_999, 10_000, 1_000), 9_000);
    }
}
