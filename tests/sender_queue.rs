//! Sender queue discipline: strict serialization, FIFO dispatch order,
//! and the disabled-writes path.

use hub_agent::error::ChainError;
use hub_agent::sender::TxSender;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn writes_dispatch_in_submission_order() {
    let sender = Arc::new(TxSender::new(true));
    let order = Arc::new(Mutex::new(Vec::new()));

    // Queue up closures from a single task; the FIFO lock must invoke them
    // in the same order they were submitted.
    let mut tasks = Vec::new();
    for i in 0..5u64 {
        let sender = Arc::clone(&sender);
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let _ = sender
                .submit("ordered", move || async move {
                    order.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    Err::<alloy::rpc::types::TransactionReceipt, _>(ChainError::Unavailable(
                        "test".to_string(),
                    ))
                })
                .await;
        }));
        // Stagger spawns so queue arrival order is deterministic.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn at_most_one_transaction_is_in_preparation() {
    let sender = Arc::new(TxSender::new(true));
    let concurrent = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let sender = Arc::clone(&sender);
        let concurrent = Arc::clone(&concurrent);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            let _ = sender
                .submit("exclusive", move || async move {
                    let active = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(active, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(3)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    Err::<alloy::rpc::types::TransactionReceipt, _>(ChainError::Unavailable(
                        "test".to_string(),
                    ))
                })
                .await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_writes_surface_a_typed_error() {
    let sender = TxSender::new(false);
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_inner = Arc::clone(&ran);
    let result = sender
        .submit("noop", move || async move {
            ran_inner.fetch_add(1, Ordering::SeqCst);
            Err::<alloy::rpc::types::TransactionReceipt, _>(ChainError::Unavailable(
                "must not run".to_string(),
            ))
        })
        .await;
    assert!(matches!(result, Err(ChainError::WritesDisabled)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(sender.submitted_count(), 0);
}

#[tokio::test]
async fn dispatch_errors_propagate_without_counting_as_submissions() {
    let sender = TxSender::new(true);
    let result = sender
        .submit("failing", || async {
            Err::<alloy::rpc::types::TransactionReceipt, _>(ChainError::Reverted(
                "simulation failed".to_string(),
            ))
        })
        .await;
    assert!(matches!(result, Err(ChainError::Reverted(_))));
    assert_eq!(sender.submitted_count(), 0);
}
