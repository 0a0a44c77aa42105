//! Admin HTTP surface, exercised with reqwest against a live server.

use std::sync::Arc;
use std::time::Duration;

use booking_outbox::http;
use booking_outbox::{ClaimToken, InMemoryMessageStore, MessageStore, OutboxAdmin, SequenceId};
use serde_json::Value;

use crate::support;

/// Bind to port 0 and return the actual address.
async fn start_server<S: MessageStore + 'static>(store: S) -> String {
    let app = http::router(Arc::new(OutboxAdmin::new(store)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// One quarantined message (seq 1) and one deliverable (seq 2).
fn seeded_store() -> InMemoryMessageStore {
    let store = InMemoryMessageStore::new().with_settings(support::store_settings(1));
    store.enqueue("Booking-A", "BookingCreated", b"stuck".to_vec()).unwrap();
    let token = ClaimToken::new();
    store.lock_all_deliverable(&token, 1).unwrap();
    store.requeue(SequenceId(1), &token, Duration::ZERO).unwrap();
    store.enqueue("Booking-B", "BookingCreated", b"fresh".to_vec()).unwrap();
    store
}

#[tokio::test]
async fn lists_messages_with_states() {
    let base = start_server(seeded_store()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/outbox/messages?offset=0&limit=10"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let messages = body.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["state"], "quarantined");
    assert_eq!(messages[1]["state"], "deliverable");
    assert_eq!(messages[1]["body_base64"], "ZnJlc2g=");
}

#[tokio::test]
async fn unknown_message_is_404() {
    let base = start_server(seeded_store()).await;
    let resp = reqwest::get(format!("{base}/outbox/messages/99")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn health_reports_degraded_until_requeued() {
    let store = seeded_store();
    let base = start_server(store.clone()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/outbox/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["details"]["quarantined"], 1);

    let resp = client
        .post(format!("{base}/outbox/messages/1/requeue"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(store.peek(SequenceId(1)).unwrap().attempt_count, 0);

    let body: Value = client
        .get(format!("{base}/outbox/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn delete_force_dequeues() {
    let store = seeded_store();
    let base = start_server(store.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .delete(format!("{base}/outbox/messages/2"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(store.peek(SequenceId(2)).unwrap_err().is_not_found());

    let counts: Value = client
        .get(format!("{base}/outbox/counts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(counts["quarantined"], 1);
    assert_eq!(counts["deliverable"], 0);
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "current_thread")]
async fn busy_store_does_not_stall_the_runtime() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use booking_outbox::{SqliteMessageStore, StoreError};

    let store = Arc::new(SqliteMessageStore::open_in_memory().unwrap());
    let base = start_server(store.clone()).await;

    // another writer holds the connection for a while
    let (held_tx, held_rx) = tokio::sync::oneshot::channel();
    let writer = thread::spawn(move || {
        store.transaction(|_tx| {
            let _ = held_tx.send(());
            thread::sleep(Duration::from_millis(300));
            Ok::<_, StoreError>(())
        })
    });
    held_rx.await.unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let resp = reqwest::get(format!("{base}/outbox/counts")).await.unwrap();
    assert_eq!(resp.status(), 200);
    ticker.abort();
    writer.join().unwrap().unwrap();

    let ticks = ticks.load(Ordering::SeqCst);
    assert!(ticks >= 5, "runtime stalled while the store was busy ({ticks} ticks)");
}
