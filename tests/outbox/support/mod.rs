//! Shared fixtures: a booking aggregate, a store wrapper that records
//! mutating calls, and a publisher whose failures are scripted per body.

pub mod booking;

pub use booking::{Booking, BookingError, BookingEvent, BookingStatus};
pub use recording_store::{RecordingStore, StoreCall};
pub use scripted_publisher::ScriptedPublisher;

use std::time::Duration;

use booking_outbox::{InMemoryMessageStore, ManualClock, ProcessorSettings, StoreSettings};

pub const LOCK_DURATION: Duration = Duration::from_secs(60);
pub const INITIAL_REQUEUE_DELAY: Duration = Duration::from_secs(1);

pub fn store_settings(max_attempt_count: u32) -> StoreSettings {
    StoreSettings {
        lock_duration: LOCK_DURATION,
        max_attempt_count,
    }
}

pub fn processor_settings(lock_limit: usize) -> ProcessorSettings {
    ProcessorSettings {
        lock_limit,
        initial_requeue_delay: INITIAL_REQUEUE_DELAY,
    }
}

/// In-memory store on a manual clock.
pub fn memory_store(max_attempt_count: u32) -> (InMemoryMessageStore, ManualClock) {
    let clock = ManualClock::fixed();
    let store = InMemoryMessageStore::new()
        .with_clock(clock.clone())
        .with_settings(store_settings(max_attempt_count));
    (store, clock)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
