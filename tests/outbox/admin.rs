use std::time::Duration;

use booking_outbox::{
    AdminRequest, ClaimToken, HealthStatus, MessageState, MessageStore, OutboxAdmin,
    OutboxProcessor, SequenceId,
};

use crate::support::{self, ScriptedPublisher};

#[test]
fn operator_requeue_gives_quarantined_message_another_chance() {
    let (store, clock) = support::memory_store(2);
    store.enqueue("Booking-A", "BookingCreated", b"1".to_vec()).unwrap();

    let publisher = ScriptedPublisher::new();
    publisher.fail_always("1");
    let processor = OutboxProcessor::new(store.clone(), publisher.clone())
        .with_settings(support::processor_settings(10));
    let admin = OutboxAdmin::new(store.clone()).with_clock(clock.clone());

    processor.run(&ClaimToken::new()).unwrap();
    clock.advance(Duration::from_secs(1));
    processor.run(&ClaimToken::new()).unwrap();
    clock.advance(Duration::from_secs(2));

    assert_eq!(admin.health().status, HealthStatus::Degraded);
    assert_eq!(admin.peek(SequenceId(1)).unwrap().state, MessageState::Quarantined);

    publisher.heal("1");
    admin.force_requeue(SequenceId(1)).unwrap();
    assert_eq!(admin.health().status, HealthStatus::Healthy);

    let report = processor.run(&ClaimToken::new()).unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(admin.counts().unwrap().total(), 0);
}

#[test]
fn peek_all_pages_in_sequence_order() {
    let (store, clock) = support::memory_store(10);
    for n in 1..=5 {
        store
            .enqueue("Booking-A", "BookingChanged", n.to_string().into_bytes())
            .unwrap();
    }
    let admin = OutboxAdmin::new(store).with_clock(clock);

    let page = admin.peek_all(2, 2).unwrap();
    let ids: Vec<i64> = page.iter().map(|detail| detail.sequence_id).collect();
    assert_eq!(ids, vec![3, 4]);

    let response = admin.handle(AdminRequest::PeekAll { offset: 4, limit: 10 });
    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_array().unwrap().len(), 1);
    assert_eq!(response.body[0]["state"], "deliverable");
}

#[test]
fn force_dequeue_removes_message_and_is_404_afterwards() {
    let (store, clock) = support::memory_store(10);
    store.enqueue("Booking-A", "BookingCreated", b"1".to_vec()).unwrap();
    let admin = OutboxAdmin::new(store.clone()).with_clock(clock);

    let response = admin.handle(AdminRequest::Dequeue { sequence_id: 1 });
    assert_eq!(response.status, 200);
    assert_eq!(store.count().unwrap().total(), 0);

    let response = admin.handle(AdminRequest::Dequeue { sequence_id: 1 });
    assert_eq!(response.status, 404);
}
