//! Operator tooling: inspect, force-dequeue and force-requeue individual
//! messages, and read the four-way counts.
//!
//! [`OutboxAdmin::handle`] is framework-agnostic: it maps an [`AdminRequest`]
//! to an [`AdminResponse`] with an HTTP-style status, so any web framework
//! can expose it. The `http` feature wires it into an axum router.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::clock::{to_millis, Clock, SystemClock};
use crate::error::StoreError;
use crate::health::OutboxHealth;
use crate::message::{ClaimToken, Message, MessageCounts, MessageState, SequenceId};
use crate::store::MessageStore;

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("message {0} not found")]
    NotFound(SequenceId),

    #[error("message {0} is claimed by a worker; retry after its lease expires")]
    Claimed(SequenceId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdminError {
    pub fn status_code(&self) -> u16 {
        match self {
            AdminError::NotFound(_) => 404,
            AdminError::Claimed(_) => 409,
            AdminError::Store(_) => 500,
        }
    }
}

/// A message as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDetail {
    pub sequence_id: i64,
    pub group_key: String,
    pub subject: String,
    pub enqueued_at_ms: i64,
    pub available_at_ms: i64,
    /// `now - available_at`; negative while backing off or leased.
    pub delay_ms: i64,
    pub attempt_count: u32,
    pub state: MessageState,
    pub body_base64: String,
}

impl MessageDetail {
    pub fn from_message(message: &Message, now_ms: i64, state: MessageState) -> Self {
        let available_at_ms = to_millis(message.available_at);
        Self {
            sequence_id: message.sequence_id.value(),
            group_key: message.group_key.clone(),
            subject: message.subject.clone(),
            enqueued_at_ms: to_millis(message.enqueued_at),
            available_at_ms,
            delay_ms: now_ms - available_at_ms,
            attempt_count: message.attempt_count,
            state,
            body_base64: STANDARD.encode(&message.body),
        }
    }

    pub fn body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.body_base64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminRequest {
    Peek {
        sequence_id: i64,
    },
    PeekAll {
        #[serde(default)]
        offset: usize,
        #[serde(default = "default_page_size")]
        limit: usize,
    },
    Dequeue {
        sequence_id: i64,
    },
    Requeue {
        sequence_id: i64,
    },
    Counts,
    Health,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl AdminResponse {
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    pub fn from_error(err: AdminError) -> Self {
        Self {
            status: err.status_code(),
            body: json!({ "error": err.to_string() }),
        }
    }
}

impl From<AdminError> for AdminResponse {
    fn from(err: AdminError) -> Self {
        Self::from_error(err)
    }
}

pub struct OutboxAdmin<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: MessageStore> OutboxAdmin<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used to derive states and delays; share it with the store.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn peek(&self, sequence_id: SequenceId) -> Result<MessageDetail, AdminError> {
        let message = self.store.peek(sequence_id).map_err(|err| not_found_as(err, sequence_id))?;
        Ok(self.detail(&message))
    }

    pub fn peek_all(&self, offset: usize, limit: usize) -> Result<Vec<MessageDetail>, AdminError> {
        let messages = self.store.peek_all(offset, limit)?;
        Ok(messages.iter().map(|message| self.detail(message)).collect())
    }

    /// Delete a message regardless of state, unless a worker holds it.
    pub fn force_dequeue(&self, sequence_id: SequenceId) -> Result<(), AdminError> {
        let token = self.claim(sequence_id)?;
        self.store
            .dequeue(sequence_id, &token)
            .map_err(|err| claimed_as(err, sequence_id))?;
        info!(sequence_id = %sequence_id, "message force-dequeued");
        Ok(())
    }

    /// Make a message available now with a fresh attempt budget, unless a
    /// worker holds it.
    pub fn force_requeue(&self, sequence_id: SequenceId) -> Result<(), AdminError> {
        let token = self.claim(sequence_id)?;
        self.store
            .redrive(sequence_id, &token)
            .map_err(|err| claimed_as(err, sequence_id))?;
        info!(sequence_id = %sequence_id, "message force-requeued");
        Ok(())
    }

    pub fn counts(&self) -> Result<MessageCounts, AdminError> {
        Ok(self.store.count()?)
    }

    pub fn health(&self) -> OutboxHealth {
        OutboxHealth::from_counts(self.store.count())
    }

    pub fn handle(&self, request: AdminRequest) -> AdminResponse {
        let result = match request {
            AdminRequest::Peek { sequence_id } => {
                self.peek(SequenceId(sequence_id)).and_then(to_value)
            }
            AdminRequest::PeekAll { offset, limit } => {
                self.peek_all(offset, limit).and_then(to_value)
            }
            AdminRequest::Dequeue { sequence_id } => self
                .force_dequeue(SequenceId(sequence_id))
                .map(|()| json!({ "dequeued": sequence_id })),
            AdminRequest::Requeue { sequence_id } => self
                .force_requeue(SequenceId(sequence_id))
                .map(|()| json!({ "requeued": sequence_id })),
            AdminRequest::Counts => self.counts().and_then(to_value),
            AdminRequest::Health => to_value(self.health()),
        };
        match result {
            Ok(body) => AdminResponse::ok(body),
            Err(err) => AdminResponse::from_error(err),
        }
    }

    fn detail(&self, message: &Message) -> MessageDetail {
        let now = self.clock.now();
        let state = message.state(now, self.store.settings().max_attempt_count);
        MessageDetail::from_message(message, to_millis(now), state)
    }

    fn claim(&self, sequence_id: SequenceId) -> Result<ClaimToken, AdminError> {
        // Distinguish a missing message from one a worker currently holds.
        self.store
            .peek(sequence_id)
            .map_err(|err| not_found_as(err, sequence_id))?;

        let token = ClaimToken::new();
        self.store
            .lock(sequence_id, &token)
            .map_err(|err| claimed_as(err, sequence_id))?;
        Ok(token)
    }
}

fn not_found_as(err: StoreError, sequence_id: SequenceId) -> AdminError {
    if err.is_not_found() {
        AdminError::NotFound(sequence_id)
    } else {
        AdminError::Store(err)
    }
}

fn claimed_as(err: StoreError, sequence_id: SequenceId) -> AdminError {
    if err.is_not_found() {
        AdminError::Claimed(sequence_id)
    } else {
        AdminError::Store(err)
    }
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value, AdminError> {
    serde_json::to_value(value).map_err(|err| AdminError::Store(err.into()))
}
