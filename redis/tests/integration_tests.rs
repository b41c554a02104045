//! Integration tests for `RedisStore` using testcontainers.
//!
//! These tests run the guarded-transaction script against a real Redis server.
//!
//! # Requirements
//!
//! Docker must be running. The tests are ignored by default; run them with
//! `cargo test -p ticket-gate-redis -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code uses expect for clear failure messages

use std::sync::Arc;
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use ticket_gate_core::StoreError;
use ticket_gate_core::catalog::StaticDirectory;
use ticket_gate_core::environment::SystemClock;
use ticket_gate_core::keys::KeySpace;
use ticket_gate_core::store::{Guard, KeyValueStore, Mutation, Transaction, TxOutcome};
use ticket_gate_core::types::{Admission, EventId, UserId, UserStatus};
use ticket_gate_redis::RedisStore;
use ticket_gate_runtime::{GateSettings, TicketGate};

/// Start a Redis container and connect a store to it.
///
/// Returns both the container (to keep it alive) and the store.
async fn setup_redis_store() -> (ContainerAsync<Redis>, RedisStore) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");

    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");
    let url = format!("redis://127.0.0.1:{port}");

    // The port can be mapped before the server accepts connections
    let mut last_error = None;
    for _ in 0..20 {
        match RedisStore::new(&url, Duration::from_secs(2)).await {
            Ok(store) => return (container, store),
            Err(e) => {
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
    }
    panic!("Failed to connect to redis: {last_error:?}");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_reads_and_direct_writes() {
    let (_container, store) = setup_redis_store().await;

    store.ping().await.expect("ping");
    assert_eq!(store.get("missing").await.unwrap(), None);

    store.set("stock", "5", None).await.unwrap();
    assert_eq!(store.increment_by("stock", -2).await.unwrap(), 3);

    store.set("status", "payment", Some(50)).await.unwrap();
    assert_eq!(store.get("status").await.unwrap().as_deref(), Some("payment"));
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(store.get("status").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_guarded_transaction_is_all_or_nothing() {
    let (_container, store) = setup_redis_store().await;
    store.set("stock", "1", None).await.unwrap();

    let mut tx = Transaction::new();
    tx.guard(Guard::CounterAtLeast {
        key: "stock".into(),
        min: 1,
    });
    let capacity = tx.guard(Guard::CardinalityBelow {
        key: "payment".into(),
        limit: 1,
    });
    tx.mutate(Mutation::IncrementBy {
        key: "stock".into(),
        delta: -1,
        ceiling: None,
    })
    .mutate(Mutation::SortedSetAdd {
        key: "payment".into(),
        member: "u1".into(),
        score: 1_735_689_900_123,
    });

    assert_eq!(store.execute(&tx).await.unwrap(), TxOutcome::Committed);
    assert_eq!(store.get("stock").await.unwrap().as_deref(), Some("0"));
    assert_eq!(
        store.sorted_set_score("payment", "u1").await.unwrap(),
        Some(1_735_689_900_123)
    );

    store.set("stock", "3", None).await.unwrap();
    let outcome = store.execute(&tx).await.unwrap();
    assert!(outcome.rejected_by(capacity));
    assert_eq!(store.get("stock").await.unwrap().as_deref(), Some("3"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_every_guard_and_mutation_kind() {
    let (_container, store) = setup_redis_store().await;

    let mut seed = Transaction::new();
    seed.guard(Guard::ValueEquals {
        key: "status".into(),
        expected: None,
    });
    seed.guard(Guard::ListEmpty {
        key: "waiting".into(),
    });
    seed.mutate(Mutation::Set {
        key: "status".into(),
        value: "waiting".into(),
        ttl_ms: None,
    })
    .mutate(Mutation::ListPushBack {
        key: "waiting".into(),
        member: "u1".into(),
    })
    .mutate(Mutation::ListPushBack {
        key: "waiting".into(),
        member: "u2".into(),
    })
    .mutate(Mutation::SortedSetAdd {
        key: "payment".into(),
        member: "u9".into(),
        score: 100,
    });
    assert!(store.execute(&seed).await.unwrap().is_committed());

    let mut promote = Transaction::new();
    promote.guard(Guard::ListHeadEquals {
        key: "waiting".into(),
        member: "u1".into(),
    });
    promote.guard(Guard::ValueEquals {
        key: "status".into(),
        expected: Some("waiting".into()),
    });
    promote.guard(Guard::MemberPresent {
        key: "payment".into(),
        member: "u9".into(),
    });
    promote.guard(Guard::MemberAbsent {
        key: "payment".into(),
        member: "u1".into(),
    });
    promote.guard(Guard::ScoreAtMost {
        key: "payment".into(),
        member: "u9".into(),
        max: 100,
    });
    promote
        .mutate(Mutation::ListPopFront {
            key: "waiting".into(),
        })
        .mutate(Mutation::SortedSetRemove {
            key: "payment".into(),
            member: "u9".into(),
        })
        .mutate(Mutation::ListRemove {
            key: "waiting".into(),
            member: "u2".into(),
        })
        .mutate(Mutation::Delete {
            key: "status".into(),
        })
        .mutate(Mutation::IncrementBy {
            key: "stock".into(),
            delta: 5,
            ceiling: Some(4),
        });
    assert!(store.execute(&promote).await.unwrap().is_committed());

    assert_eq!(store.list_len("waiting").await.unwrap(), 0);
    assert_eq!(store.sorted_set_card("payment").await.unwrap(), 0);
    assert_eq!(store.get("status").await.unwrap(), None);
    // Increment above the ceiling was skipped
    assert_eq!(store.get("stock").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_corrupt_counter_writes_nothing() {
    let (_container, store) = setup_redis_store().await;
    store.set("stock", "lots", None).await.unwrap();

    let mut tx = Transaction::new();
    tx.mutate(Mutation::ListPushBack {
        key: "waiting".into(),
        member: "u1".into(),
    })
    .mutate(Mutation::IncrementBy {
        key: "stock".into(),
        delta: 1,
        ceiling: None,
    });

    let err = store.execute(&tx).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(_)));
    assert_eq!(store.list_len("waiting").await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_range_by_score_and_list_range() {
    let (_container, store) = setup_redis_store().await;
    let mut tx = Transaction::new();
    for (member, score) in [("u1", 10), ("u2", 20), ("u3", 30)] {
        tx.mutate(Mutation::SortedSetAdd {
            key: "payment".into(),
            member: member.into(),
            score,
        })
        .mutate(Mutation::ListPushBack {
            key: "waiting".into(),
            member: member.into(),
        });
    }
    store.execute(&tx).await.unwrap();

    let due = store
        .sorted_set_range_by_score("payment", 20, 10)
        .await
        .unwrap();
    assert_eq!(due, vec![("u1".to_string(), 10), ("u2".to_string(), 20)]);
    assert_eq!(
        store.sorted_set_range_by_score("payment", 30, 1).await.unwrap().len(),
        1
    );
    assert_eq!(store.list_range("waiting", 0, 0).await.unwrap(), vec!["u1"]);
    assert_eq!(
        store.list_range("waiting", 0, -1).await.unwrap(),
        vec!["u1", "u2", "u3"]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_gate_end_to_end_on_redis() {
    let (_container, store) = setup_redis_store().await;
    let directory = StaticDirectory::parse("1001:1", "u1,u2,u3").unwrap();
    let gate = TicketGate::new(
        store,
        KeySpace::with_namespace("it"),
        Arc::new(directory),
        Arc::new(SystemClock),
        GateSettings::default(),
    );
    assert_eq!(gate.seed_stock().await.unwrap(), 1);
    assert_eq!(gate.seed_stock().await.unwrap(), 0);

    let event = EventId::new("1001");
    let users: Vec<UserId> = ["u1", "u2", "u3"].into_iter().map(UserId::new).collect();
    let results = futures::future::join_all(
        users.iter().map(|user| gate.request_ticket(&event, user)),
    )
    .await;

    let payments = results
        .iter()
        .filter(|r| matches!(r, Ok(Admission::Payment { .. })))
        .count();
    let waiting = results
        .iter()
        .filter(|r| matches!(r, Ok(Admission::Waiting)))
        .count();
    assert_eq!((payments, waiting), (1, 2));

    let snapshot = gate.snapshot(&event).await.unwrap();
    assert_eq!(snapshot.remaining_stock, 0);
    assert_eq!(snapshot.active_reservations, 1);
    assert_eq!(snapshot.waiting, 2);

    let holder = users
        .iter()
        .zip(&results)
        .find(|(_, r)| matches!(r, Ok(Admission::Payment { .. })))
        .map(|(user, _)| user.clone())
        .unwrap();
    assert!(gate.confirm(&event, &holder).await.unwrap());
    assert_eq!(
        gate.status(&event, &holder).await.unwrap().status,
        UserStatus::Confirmed
    );
}
