//! Concurrent access to the ledger
//!
//! Many tasks hammer the same stream (must serialize) or distinct streams
//! (must not interfere).

use escrow_core::{
    AccountId, Amount, ClockSource, Config, Error, ManualClock, PayoutBook, StreamLedger,
};
use std::sync::Arc;

fn create_test_ledger() -> (Arc<StreamLedger>, Arc<ManualClock>, Arc<PayoutBook>) {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let book = Arc::new(PayoutBook::new());
    let ledger = StreamLedger::new(&Config::default(), clock.clone(), book.clone()).unwrap();
    (Arc::new(ledger), clock, book)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_withdrawals_pay_once() {
    let (ledger, clock, book) = create_test_ledger();
    let alice = AccountId::new("alice");
    let bob = AccountId::new("bob");
    let now = clock.now();

    let id = ledger
        .create_stream(&alice, &bob, 1_000_000, now, now + 1_000, 1_000_000)
        .unwrap();
    clock.advance(400);

    let mut tasks = Vec::new();
    for _ in 0..64 {
        let ledger = ledger.clone();
        let bob = bob.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            ledger.withdraw_max(id, &bob)
        }));
    }

    let mut successes = 0;
    let mut paid: Amount = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(amount) => {
                successes += 1;
                paid += amount;
            }
            Err(err) => assert_eq!(err, Error::NothingToWithdraw(id)),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(paid, 400_000);
    assert_eq!(book.balance_of(&bob), 400_000);
    assert!(ledger.check_conservation(id).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_withdraw_racing_cancel_never_overpays() {
    for round in 0..20 {
        let (ledger, clock, book) = create_test_ledger();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");
        let now = clock.now();

        let id = ledger
            .create_stream(&alice, &bob, 10_000, now, now + 100, 10_000)
            .unwrap();
        clock.advance(30 + round);

        let withdraw = {
            let ledger = ledger.clone();
            let bob = bob.clone();
            tokio::task::spawn_blocking(move || ledger.withdraw_max(id, &bob))
        };
        let cancel = {
            let ledger = ledger.clone();
            let alice = alice.clone();
            tokio::task::spawn_blocking(move || ledger.cancel(id, &alice))
        };

        let _ = withdraw.await.unwrap();
        let outcome = cancel.await.unwrap().unwrap();

        let vested = (30 + round) as Amount * 100;
        assert_eq!(book.balance_of(&bob), vested);
        assert_eq!(outcome.sender_amount, 10_000 - vested);
        assert_eq!(book.total(), 10_000);
        assert_eq!(ledger.total_locked(), 0);
        assert!(ledger.check_conservation(id).unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_distinct_streams_are_independent() {
    let (ledger, clock, book) = create_test_ledger();
    let now = clock.now();

    let mut streams = Vec::new();
    for i in 0..32 {
        let sender = AccountId::new(format!("sender-{}", i));
        let recipient = AccountId::new(format!("recipient-{}", i));
        let id = ledger
            .create_stream(&sender, &recipient, 1_000, now, now + 10, 1_000)
            .unwrap();
        streams.push((id, recipient));
    }
    clock.advance(10);

    let tasks: Vec<_> = streams
        .iter()
        .cloned()
        .map(|(id, recipient)| {
            let ledger = ledger.clone();
            tokio::task::spawn_blocking(move || ledger.withdraw_max(id, &recipient))
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 1_000);
    }

    for (id, recipient) in &streams {
        assert_eq!(book.balance_of(recipient), 1_000);
        assert_eq!(ledger.balance_of(*id).unwrap(), 0);
    }
    assert_eq!(ledger.stream_count(), 32);
    assert_eq!(ledger.total_locked(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_creation_assigns_unique_ids() {
    let (ledger, clock, _) = create_test_ledger();
    let now = clock.now();

    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let ledger = ledger.clone();
            tokio::task::spawn_blocking(move || {
                ledger.create_stream(
                    &AccountId::new(format!("s{}", i)),
                    &AccountId::new("r"),
                    10,
                    now,
                    now + 10,
                    10,
                )
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    ids.sort_unstable();
    ids.dedup();

    assert_eq!(ids.len(), 100);
    assert_eq!(ids.first(), Some(&1));
    assert_eq!(ids.last(), Some(&100));
    assert_eq!(ledger.streams_of_recipient(&AccountId::new("r")).len(), 100);
}
