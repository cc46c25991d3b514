use std::sync::Arc;
use wallet_ledger::application::{BalanceLedger, PaymentSettlement, ProcessPayment};
use wallet_ledger::domain::currency::{CurrencyKind, Metadata, UserId};
use wallet_ledger::domain::entry::EntryStatus;
use wallet_ledger::domain::payment::{NewPaymentRequest, PaymentStatus};
use wallet_ledger::error::LedgerError;
use wallet_ledger::infrastructure::in_memory::InMemoryStore;

mod common;

fn buyer() -> UserId {
    UserId::from("buyer")
}

async fn setup(paid: i64, free: i64) -> (BalanceLedger, PaymentSettlement) {
    let (ctx, _) = common::context();
    let ledger = BalanceLedger::new(ctx.clone());
    ledger
        .grant(&buyer(), CurrencyKind::Paid, paid, Metadata::new())
        .await
        .unwrap();
    ledger
        .grant(&buyer(), CurrencyKind::Free, free, Metadata::new())
        .await
        .unwrap();
    (ledger, PaymentSettlement::new(ctx))
}

async fn open_request(settlement: &PaymentSettlement, id: &str, amount: i64) {
    settlement
        .create_payment_request(NewPaymentRequest {
            payment_request_id: id.to_string(),
            user_id: buyer(),
            amount,
            currency_label: "gems".to_string(),
            kind: None,
            details: Metadata::new(),
        })
        .await
        .unwrap();
}

fn pay(id: &str, amount: i64) -> ProcessPayment {
    ProcessPayment {
        payment_request_id: id.to_string(),
        user_id: buyer(),
        method_name: "ledger".to_string(),
        amount,
        currency_label: "gems".to_string(),
        details: Metadata::new(),
    }
}

#[tokio::test]
async fn test_priority_settlement_order() {
    let (ledger, settlement) = setup(500, 300).await;
    open_request(&settlement, "order-700", 700).await;

    let receipt = settlement.process_payment(pay("order-700", 700)).await.unwrap();
    let legs: Vec<_> = receipt
        .entries
        .iter()
        .map(|e| (e.kind, e.amount))
        .collect();
    assert_eq!(
        legs,
        vec![(CurrencyKind::Paid, 500), (CurrencyKind::Free, 200)]
    );
    assert_eq!(receipt.total_consumed, 700);

    let balances = ledger.balances(&buyer()).await.unwrap();
    let amounts: Vec<_> = balances.iter().map(|b| (b.kind, b.amount)).collect();
    assert_eq!(
        amounts,
        vec![(CurrencyKind::Paid, 0), (CurrencyKind::Free, 100)]
    );
}

#[tokio::test]
async fn test_insufficient_settlement_mutates_nothing() {
    let (ledger, settlement) = setup(500, 300).await;
    open_request(&settlement, "order-900", 900).await;

    assert!(matches!(
        settlement.process_payment(pay("order-900", 900)).await,
        Err(LedgerError::InsufficientBalance {
            requested: 900,
            available: 800
        })
    ));

    let paid = ledger.read(&buyer(), CurrencyKind::Paid).await.unwrap();
    let free = ledger.read(&buyer(), CurrencyKind::Free).await.unwrap();
    assert_eq!((paid.amount, paid.version), (500, 0));
    assert_eq!((free.amount, free.version), (300, 0));

    let request = settlement.payment_request("order-900").await.unwrap();
    assert_eq!(request.status, PaymentStatus::Failed);
    let entries = ledger.entries_for("order-900").await.unwrap();
    assert!(entries.iter().all(|e| e.status == EntryStatus::Failed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlement_debits_once() {
    let (ledger, settlement) = setup(1_000, 0).await;
    open_request(&settlement, "order-dup", 400).await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let settlement = settlement.clone();
            tokio::spawn(async move { settlement.process_payment(pay("order-dup", 400)).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(LedgerError::PaymentRequestAlreadyProcessed { .. })
            | Err(LedgerError::OptimisticLockConflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(
        ledger.read(&buyer(), CurrencyKind::Paid).await.unwrap().amount,
        600
    );
    assert_eq!(
        settlement.payment_request("order-dup").await.unwrap().status,
        PaymentStatus::Completed
    );
}

#[tokio::test]
async fn test_stale_second_leg_rolls_back_settlement() {
    let store = InMemoryStore::in_memory();
    let (plain, _) = common::context_over(Arc::new(store.clone()));
    let ledger = BalanceLedger::new(plain.clone());
    ledger
        .grant(&buyer(), CurrencyKind::Paid, 500, Metadata::new())
        .await
        .unwrap();
    ledger
        .grant(&buyer(), CurrencyKind::Free, 300, Metadata::new())
        .await
        .unwrap();

    // The paid leg applies, the free leg finds its version moved.
    let (ctx, _) =
        common::context_over(Arc::new(common::FaultyStore::new(store).stale_on(CurrencyKind::Free)));
    let settlement = PaymentSettlement::new(ctx);
    open_request(&settlement, "order-stale", 700).await;

    assert!(matches!(
        settlement.process_payment(pay("order-stale", 700)).await,
        Err(LedgerError::OptimisticLockConflict { .. })
    ));

    let paid = ledger.read(&buyer(), CurrencyKind::Paid).await.unwrap();
    assert_eq!((paid.amount, paid.version), (500, 0));
    assert!(ledger.entries_for("order-stale").await.unwrap().is_empty());
    assert_eq!(ledger.history(&buyer()).await.unwrap().len(), 2);
    assert_eq!(
        PaymentSettlement::new(plain)
            .payment_request("order-stale")
            .await
            .unwrap()
            .status,
        PaymentStatus::Pending
    );
}

#[tokio::test]
async fn test_conflict_recheck_failure_is_reported() {
    let store = InMemoryStore::in_memory();
    let (plain, _) = common::context_over(Arc::new(store.clone()));
    let ledger = BalanceLedger::new(plain.clone());
    ledger
        .grant(&buyer(), CurrencyKind::Paid, 100, Metadata::new())
        .await
        .unwrap();
    open_request(&PaymentSettlement::new(plain), "order-flaky", 50).await;

    let faulty = common::FaultyStore::new(store)
        .stale_on(CurrencyKind::Paid)
        .failing_after(1);
    let (ctx, observer) = common::context_over(Arc::new(faulty));
    let result = PaymentSettlement::new(ctx)
        .process_payment(pay("order-flaky", 50))
        .await;

    assert!(matches!(
        result,
        Err(LedgerError::OptimisticLockConflict { .. })
    ));
    assert_eq!(
        *observer.rejections.lock().unwrap(),
        vec!["storage_error", "optimistic_lock_conflict"]
    );
    assert_eq!(
        ledger.read(&buyer(), CurrencyKind::Paid).await.unwrap().amount,
        100
    );
}
