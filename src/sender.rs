//! Serialized transaction dispatch for the agent identity.
//!
//! Every signed write in the process goes through one [`TxSender`]. The
//! queue invariant: at most one transaction is being prepared at a time for
//! the signing identity, so nonces can never collide on RPC latency. The
//! slot is held until the receipt resolves, which also gives strict
//! submission order. Throughput is capped at one write at a time; that is
//! the trade.

use crate::chain::types::TxOutcome;
use crate::error::ChainError;
use alloy::rpc::types::TransactionReceipt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

pub struct TxSender {
    /// tokio's Mutex hands the lock out in FIFO order, which is exactly the
    /// queue discipline required here.
    slot: Mutex<()>,
    enabled: bool,
    submitted: AtomicU64,
}

impl TxSender {
    pub fn new(enabled: bool) -> Self {
        Self {
            slot: Mutex::new(()),
            enabled,
            submitted: AtomicU64::new(0),
        }
    }

    pub fn writes_enabled(&self) -> bool {
        self.enabled
    }

    /// Writes submitted so far (successful receipts only).
    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Run `dispatch` exclusively. The closure performs the send and awaits
    /// the receipt; a receipt with reverted status is surfaced as
    /// [`ChainError::TxReverted`], never as success.
    pub async fn submit<F, Fut>(&self, label: &str, dispatch: F) -> Result<TxOutcome, ChainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TransactionReceipt, ChainError>>,
    {
        if !self.enabled {
            tracing::warn!(label, "write skipped: sender disabled (no signing key)");
            return Err(ChainError::WritesDisabled);
        }

        let _slot = self.slot.lock().await;
        let receipt = dispatch().await?;

        let tx_hash = receipt.transaction_hash;
        let block = receipt.block_number.unwrap_or(0);
        let gas_used = receipt.gas_used as u64;

        if !receipt.status() {
            tracing::warn!(label, %tx_hash, block, "transaction reverted on-chain");
            return Err(ChainError::TxReverted { tx_hash, block });
        }

        self.submitted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(label, %tx_hash, block, gas_used, "transaction confirmed");
        Ok(TxOutcome {
            tx_hash,
            block,
            gas_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;

    #[tokio::test]
    async fn disabled_sender_rejects_without_running_closure() {
        let sender = TxSender::new(false);
        let ran = Arc::new(AtomicBool::new(false));
        let ran_inner = Arc::clone(&ran);
        let result = sender
            .submit("test", move || async move {
                ran_inner.store(true, Ordering::SeqCst);
                Err(ChainError::Unavailable("unreachable".to_string()))
            })
            .await;
        assert!(matches!(result, Err(ChainError::WritesDisabled)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closures_never_overlap() {
        let sender = Arc::new(TxSender::new(true));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let sender = Arc::clone(&sender);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            tasks.push(tokio::spawn(async move {
                let _ = sender
                    .submit("test", move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        // Fail the dispatch so no receipt decoding is needed.
                        Err(ChainError::Unavailable("test".to_string()))
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(sender.submitted_count(), 0);
    }
}
