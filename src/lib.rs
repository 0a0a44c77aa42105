//! Transactional outbox relay.
//!
//! Domain events are written to a durable message store in the same
//! transaction as the aggregate that raised them, then relayed to a
//! downstream publisher by a background processor:
//!
//! - claims batches under a lease so concurrent relays never overlap
//! - delivers each aggregate's messages in order, groups in parallel
//! - retries failures with linear backoff until an attempt ceiling
//! - parks exhausted messages in quarantine for operators

mod admin;
mod aggregate;
mod bridge;
mod clock;
mod config;
mod error;
mod health;
#[cfg(feature = "http")]
pub mod http;
mod message;
mod poller;
mod processor;
mod publisher;
pub mod store;

pub use admin::{AdminError, AdminRequest, AdminResponse, MessageDetail, OutboxAdmin};
pub use aggregate::{AggregateRoot, DomainEvent, RecordedEvents};
pub use bridge::{BodyCodec, EventBridge};
pub use clock::{from_millis, to_millis, Clock, ManualClock, SystemClock};
pub use config::{OutboxConfig, ProcessorSettings, StoreSettings};
pub use error::{ConfigError, StoreError};
pub use health::{HealthStatus, OutboxHealth, OutboxHealthIndicator};
pub use message::{ClaimToken, Message, MessageCounts, MessageState, SequenceId};
pub use poller::{OutboxPoller, PollerStats};
pub use processor::{backoff, OutboxProcessor, RunReport};
pub use publisher::{FnPublisher, LogPublisher, LogPublisherError, Publisher};
pub use store::{Enqueue, InMemoryMessageStore, InMemoryTransaction, MessageStore};
#[cfg(feature = "sqlite")]
pub use store::{SqliteMessageStore, SqliteTransaction};
