//! Event-to-Message bridge.
//!
//! Turns the events an aggregate recorded during a unit of work into outbox
//! messages, inside the same transaction that persists the aggregate:
//!
//! ```ignore
//! let bridge = EventBridge::new();
//! store.transaction(|tx| {
//!     tx.execute("UPDATE booking SET status = ?1 WHERE id = ?2", params![..])?;
//!     bridge.publish(tx, &mut booking)
//! })?;
//! ```

use serde::Serialize;
use tracing::debug;

use crate::aggregate::{AggregateRoot, DomainEvent};
use crate::error::StoreError;
use crate::message::Message;
use crate::store::Enqueue;

/// How event payloads are serialized into message bodies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyCodec {
    #[default]
    Json,
    Bitcode,
}

impl BodyCodec {
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, StoreError> {
        match self {
            BodyCodec::Json => Ok(serde_json::to_vec(value)?),
            BodyCodec::Bitcode => Ok(bitcode::serialize(value)?),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EventBridge {
    codec: BodyCodec,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec(mut self, codec: BodyCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn codec(&self) -> BodyCodec {
        self.codec
    }

    /// Enqueue one message per recorded event, in recording order.
    ///
    /// All messages share the aggregate's group key. The aggregate's buffer
    /// is drained even when an enqueue fails; the caller is expected to
    /// roll back and discard the aggregate.
    pub fn publish<A, T>(&self, tx: &mut T, aggregate: &mut A) -> Result<Vec<Message>, StoreError>
    where
        A: AggregateRoot + ?Sized,
        T: Enqueue + ?Sized,
    {
        let group_key = aggregate.group_key();
        let codec = self.codec;
        let mut messages = Vec::new();

        aggregate.dispatch_events(|event| {
            let body = codec.encode(&event)?;
            let message = tx.enqueue(&group_key, event.subject(), body)?;
            messages.push(message);
            Ok::<(), StoreError>(())
        })?;

        debug!(
            group_key = %group_key,
            count = messages.len(),
            "events bridged to outbox"
        );
        Ok(messages)
    }
}
