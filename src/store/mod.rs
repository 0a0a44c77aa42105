//! Message Store - durable, append-only table of outbox messages.
//!
//! The claim token is the only concurrency primitive: every mutating call
//! after a claim names the token it was granted, and rows whose token no
//! longer matches are reported as [`StoreError::NotFound`] and left alone.
//!
//! - `MessageStore` - claim/requeue/dequeue operations used by the processor,
//!   health indicator and admin tooling
//! - `Enqueue` - append inside a caller-owned transaction
//! - `InMemoryMessageStore` - shared in-process backend, mainly for tests
//! - `SqliteMessageStore` - durable backend (requires the `sqlite` feature)

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreSettings;
use crate::error::StoreError;
use crate::message::{ClaimToken, Message, MessageCounts, SequenceId};

pub use memory::{InMemoryMessageStore, InMemoryTransaction};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteMessageStore, SqliteTransaction};

/// Append a message inside an already-open transaction.
///
/// The message becomes visible to claimers only when the surrounding
/// transaction commits, and disappears with it on rollback.
pub trait Enqueue {
    fn enqueue(
        &mut self,
        group_key: &str,
        subject: &str,
        body: Vec<u8>,
    ) -> Result<Message, StoreError>;
}

impl<T: Enqueue + ?Sized> Enqueue for &mut T {
    fn enqueue(
        &mut self,
        group_key: &str,
        subject: &str,
        body: Vec<u8>,
    ) -> Result<Message, StoreError> {
        (**self).enqueue(group_key, subject, body)
    }
}

pub trait MessageStore: Send + Sync {
    /// Lease length and attempt ceiling this store classifies messages with.
    fn settings(&self) -> StoreSettings;

    /// Append a message in a transaction of its own.
    fn enqueue(&self, group_key: &str, subject: &str, body: Vec<u8>)
        -> Result<Message, StoreError>;

    fn count(&self) -> Result<MessageCounts, StoreError>;

    fn peek(&self, sequence_id: SequenceId) -> Result<Message, StoreError>;

    /// Messages in `sequence_id` order, skipping `offset`.
    fn peek_all(&self, offset: usize, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Claim up to `limit` deliverable messages, ordered by `sequence_id`.
    ///
    /// Each claimed row gets `claim_token`, a lease ending at
    /// `now + lock_duration`, and one more attempt.
    ///
    /// A message is passed over while an earlier, non-quarantined message of
    /// its group is leased or backing off, so a group never runs ahead of
    /// its head.
    fn lock_all_deliverable(
        &self,
        claim_token: &ClaimToken,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Same as [`lock_all_deliverable`](Self::lock_all_deliverable), restricted
    /// to unlocked quarantined messages.
    fn lock_all_undeliverable(
        &self,
        claim_token: &ClaimToken,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Claim one specific unlocked message in any state without counting an attempt.
    fn lock(&self, sequence_id: SequenceId, claim_token: &ClaimToken)
        -> Result<Message, StoreError>;

    /// Release the claim and make the message available again after `delay`.
    fn requeue(
        &self,
        sequence_id: SequenceId,
        claim_token: &ClaimToken,
        delay: Duration,
    ) -> Result<(), StoreError>;

    fn requeue_all(
        &self,
        sequence_ids: &[SequenceId],
        claim_token: &ClaimToken,
        delay: Duration,
    ) -> Result<(), StoreError>;

    /// Release the claim, make the message available now and reset its attempts.
    fn redrive(&self, sequence_id: SequenceId, claim_token: &ClaimToken)
        -> Result<(), StoreError>;

    /// Delete a delivered message.
    fn dequeue(&self, sequence_id: SequenceId, claim_token: &ClaimToken)
        -> Result<(), StoreError>;

    fn dequeue_all(
        &self,
        sequence_ids: &[SequenceId],
        claim_token: &ClaimToken,
    ) -> Result<(), StoreError>;
}

impl<S: MessageStore + ?Sized> MessageStore for Arc<S> {
    fn settings(&self) -> StoreSettings {
        (**self).settings()
    }

    fn enqueue(
        &self,
        group_key: &str,
        subject: &str,
        body: Vec<u8>,
    ) -> Result<Message, StoreError> {
        (**self).enqueue(group_key, subject, body)
    }

    fn count(&self) -> Result<MessageCounts, StoreError> {
        (**self).count()
    }

    fn peek(&self, sequence_id: SequenceId) -> Result<Message, StoreError> {
        (**self).peek(sequence_id)
    }

    fn peek_all(&self, offset: usize, limit: usize) -> Result<Vec<Message>, StoreError> {
        (**self).peek_all(offset, limit)
    }

    fn lock_all_deliverable(
        &self,
        claim_token: &ClaimToken,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        (**self).lock_all_deliverable(claim_token, limit)
    }

    fn lock_all_undeliverable(
        &self,
        claim_token: &ClaimToken,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        (**self).lock_all_undeliverable(claim_token, limit)
    }

    fn lock(
        &self,
        sequence_id: SequenceId,
        claim_token: &ClaimToken,
    ) -> Result<Message, StoreError> {
        (**self).lock(sequence_id, claim_token)
    }

    fn requeue(
        &self,
        sequence_id: SequenceId,
        claim_token: &ClaimToken,
        delay: Duration,
    ) -> Result<(), StoreError> {
        (**self).requeue(sequence_id, claim_token, delay)
    }

    fn requeue_all(
        &self,
        sequence_ids: &[SequenceId],
        claim_token: &ClaimToken,
        delay: Duration,
    ) -> Result<(), StoreError> {
        (**self).requeue_all(sequence_ids, claim_token, delay)
    }

    fn redrive(&self, sequence_id: SequenceId, claim_token: &ClaimToken) -> Result<(), StoreError> {
        (**self).redrive(sequence_id, claim_token)
    }

    fn dequeue(&self, sequence_id: SequenceId, claim_token: &ClaimToken) -> Result<(), StoreError> {
        (**self).dequeue(sequence_id, claim_token)
    }

    fn dequeue_all(
        &self,
        sequence_ids: &[SequenceId],
        claim_token: &ClaimToken,
    ) -> Result<(), StoreError> {
        (**self).dequeue_all(sequence_ids, claim_token)
    }
}
