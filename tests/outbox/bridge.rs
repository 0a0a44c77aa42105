//! Aggregate state and its outbox messages share one SQLite transaction.

use booking_outbox::{
    AggregateRoot, ClaimToken, EventBridge, InMemoryMessageStore, Message, MessageStore,
    OutboxProcessor, SqliteMessageStore, StoreError,
};
use rusqlite::{params, OptionalExtension};

use crate::support::{self, Booking, BookingEvent, BookingStatus, ScriptedPublisher};

fn bookings_store() -> SqliteMessageStore {
    let store = SqliteMessageStore::open_in_memory()
        .unwrap()
        .with_settings(support::store_settings(10));
    store
        .transaction(|tx| -> Result<(), StoreError> {
            tx.execute_batch(
                "CREATE TABLE booking (
                    id TEXT PRIMARY KEY,
                    guest TEXT NOT NULL,
                    room TEXT NOT NULL,
                    status TEXT NOT NULL
                );",
            )?;
            Ok(())
        })
        .unwrap();
    store
}

fn save(store: &SqliteMessageStore, booking: &mut Booking) -> Result<Vec<Message>, StoreError> {
    store.transaction(|tx| -> Result<Vec<Message>, StoreError> {
        tx.execute(
            "INSERT INTO booking (id, guest, room, status) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status",
            params![booking.id, booking.guest, booking.room, booking.status.as_str()],
        )?;
        EventBridge::new().publish(tx, booking)
    })
}

fn booking_status(store: &SqliteMessageStore, id: &str) -> Option<String> {
    store
        .transaction(|tx| -> Result<Option<String>, StoreError> {
            Ok(tx
                .query_row(
                    "SELECT status FROM booking WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .unwrap()
}

#[test]
fn saving_a_booking_enqueues_its_events() {
    let store = bookings_store();
    let mut booking = Booking::create("b-1", "Ada", "101");
    booking.confirm().unwrap();

    let messages = save(&store, &mut booking).unwrap();

    assert_eq!(booking_status(&store, "b-1").as_deref(), Some("confirmed"));
    assert_eq!(booking.pending_events(), 0);
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.group_key == "Booking-b-1"));
    assert_eq!(messages[0].subject, "BookingCreated");
    assert_eq!(messages[1].subject, "BookingConfirmed");
    assert!(messages[0].sequence_id < messages[1].sequence_id);

    let stored = store.peek(messages[1].sequence_id).unwrap();
    let event: BookingEvent = stored.decode_json().unwrap();
    assert_eq!(
        event,
        BookingEvent::BookingConfirmed {
            booking_id: "b-1".into()
        }
    );
}

#[test]
fn failed_save_leaves_neither_booking_nor_messages() {
    let store = bookings_store();
    let mut booking = Booking::create("b-2", "Grace", "202");

    let result = store.transaction(|tx| -> Result<(), StoreError> {
        tx.execute(
            "INSERT INTO booking (id, guest, room, status) VALUES (?1, ?2, ?3, ?4)",
            params![booking.id, booking.guest, booking.room, booking.status.as_str()],
        )?;
        EventBridge::new().publish(tx, &mut booking)?;
        Err(StoreError::Storage("payment declined".into()))
    });

    assert!(result.is_err());
    assert_eq!(booking_status(&store, "b-2"), None);
    assert_eq!(store.count().unwrap().total(), 0);
}

#[test]
fn saving_without_new_events_enqueues_nothing() {
    let store = bookings_store();
    let mut booking = Booking::create("b-3", "Alan", "303");
    save(&store, &mut booking).unwrap();
    assert_eq!(store.count().unwrap().total(), 1);

    let messages = save(&store, &mut booking).unwrap();
    assert!(messages.is_empty());
    assert_eq!(store.count().unwrap().total(), 1);
}

#[test]
fn booking_lifecycle_is_relayed_in_order() {
    let store = bookings_store();
    let mut booking = Booking::create("b-4", "Edsger", "404");
    save(&store, &mut booking).unwrap();
    booking.confirm().unwrap();
    save(&store, &mut booking).unwrap();
    booking.cancel("guest request").unwrap();
    save(&store, &mut booking).unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);

    let publisher = ScriptedPublisher::new();
    let processor = OutboxProcessor::new(store, publisher.clone());
    let report = processor.run(&ClaimToken::new()).unwrap();

    assert_eq!(report.delivered, 3);
    let subjects: Vec<String> = publisher
        .published()
        .into_iter()
        .map(|(subject, _)| subject)
        .collect();
    assert_eq!(
        subjects,
        vec!["BookingCreated", "BookingConfirmed", "BookingCancelled"]
    );
    assert_eq!(processor.store().count().unwrap().total(), 0);
}

#[test]
fn in_memory_rollback_discards_bridged_messages() {
    let store = InMemoryMessageStore::new();
    let mut booking = Booking::create("b-5", "Barbara", "505");

    let result: Result<(), StoreError> = store.transaction(|tx| {
        let messages = EventBridge::new().publish(tx, &mut booking)?;
        assert_eq!(tx.staged().len(), messages.len());
        Err(StoreError::Storage("aggregate version conflict".into()))
    });

    assert!(result.is_err());
    assert_eq!(store.count().unwrap().total(), 0);
    assert_eq!(booking.group_key(), "Booking-b-5");
}
