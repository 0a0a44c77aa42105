//! Competing claimers on one store.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use booking_outbox::{ClaimToken, MessageStore, OutboxProcessor};

use crate::support::{self, ScriptedPublisher};

/// Two threads claim at the same instant; returns the ids each one got.
fn race_claims<S>(store: S, limit: usize) -> (Vec<i64>, Vec<i64>)
where
    S: MessageStore + Clone + 'static,
{
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store
                    .lock_all_deliverable(&ClaimToken::new(), limit)
                    .unwrap()
                    .iter()
                    .map(|message| message.sequence_id.value())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut results = handles.into_iter().map(|handle| handle.join().unwrap());
    (results.next().unwrap(), results.next().unwrap())
}

fn assert_disjoint_and_complete(a: &[i64], b: &[i64], expected: usize) {
    let a_ids: HashSet<i64> = a.iter().copied().collect();
    let b_ids: HashSet<i64> = b.iter().copied().collect();
    assert!(a_ids.is_disjoint(&b_ids), "overlapping claims: {a:?} / {b:?}");
    assert_eq!(a.len() + b.len(), expected);
}

#[test]
fn concurrent_claims_never_overlap_in_memory() {
    let (store, _clock) = support::memory_store(10);
    for n in 0..15 {
        store
            .enqueue(&format!("Booking-{n}"), "BookingChanged", n.to_string().into_bytes())
            .unwrap();
    }

    let (a, b) = race_claims(store, 10);
    assert_disjoint_and_complete(&a, &b, 15);
}

#[cfg(feature = "sqlite")]
#[test]
fn concurrent_claims_never_overlap_in_sqlite() {
    use booking_outbox::SqliteMessageStore;

    let store = Arc::new(
        SqliteMessageStore::open_in_memory()
            .unwrap()
            .with_settings(support::store_settings(10)),
    );
    for n in 0..15 {
        store
            .enqueue(&format!("Booking-{n}"), "BookingChanged", n.to_string().into_bytes())
            .unwrap();
    }

    let (a, b) = race_claims(store, 10);
    assert_disjoint_and_complete(&a, &b, 15);
}

#[test]
fn a_claimed_group_is_closed_to_other_claimers() {
    let (store, _clock) = support::memory_store(10);
    for n in 0..6 {
        store
            .enqueue(&format!("Booking-{}", n % 2), "BookingChanged", n.to_string().into_bytes())
            .unwrap();
    }

    let first = store.lock_all_deliverable(&ClaimToken::new(), 1).unwrap();
    assert_eq!(first[0].group_key, "Booking-0");

    let second = store.lock_all_deliverable(&ClaimToken::new(), 10).unwrap();
    assert!(second.iter().all(|message| message.group_key == "Booking-1"));
    assert_eq!(second.len(), 3);
}

#[test]
fn competing_processors_deliver_each_message_once() {
    let (store, _clock) = support::memory_store(10);
    for n in 1..=40 {
        store
            .enqueue(&format!("Booking-{}", n % 7), "BookingChanged", n.to_string().into_bytes())
            .unwrap();
    }

    let publisher = ScriptedPublisher::new().with_latency(Duration::from_millis(1));
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let processor = OutboxProcessor::new(store.clone(), publisher.clone())
                .with_settings(support::processor_settings(5));
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut delivered = 0;
                loop {
                    let report = processor.run(&ClaimToken::new()).unwrap();
                    if report.is_idle() {
                        break delivered;
                    }
                    delivered += report.delivered;
                }
            })
        })
        .collect();

    let delivered: usize = handles.into_iter().map(|handle| handle.join().unwrap()).sum();
    assert_eq!(delivered, 40);
    assert_eq!(publisher.overlaps(), 0);

    let bodies: HashSet<String> = publisher.published_bodies().into_iter().collect();
    assert_eq!(bodies.len(), 40);
    assert_eq!(store.count().unwrap().total(), 0);
}
