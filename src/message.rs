use std::fmt;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Store-assigned, strictly increasing message identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub i64);

impl SequenceId {
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SequenceId {
    fn from(value: i64) -> Self {
        SequenceId(value)
    }
}

/// Opaque token identifying one holder of a delivery claim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimToken(String);

impl ClaimToken {
    /// A fresh random token.
    pub fn new() -> Self {
        ClaimToken(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClaimToken {
    fn from(value: String) -> Self {
        ClaimToken(value)
    }
}

impl From<&str> for ClaimToken {
    fn from(value: &str) -> Self {
        ClaimToken(value.to_string())
    }
}

/// The four mutually exclusive states a stored message can be in.
///
/// Never stored; always derived from `attempt_count`, `claim_token` and
/// `available_at` against a clock reading and the attempt ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Deliverable,
    DeliverableLocked,
    Quarantined,
    QuarantinedLocked,
}

impl MessageState {
    pub fn classify(quarantined: bool, locked: bool) -> Self {
        match (quarantined, locked) {
            (false, false) => MessageState::Deliverable,
            (false, true) => MessageState::DeliverableLocked,
            (true, false) => MessageState::Quarantined,
            (true, true) => MessageState::QuarantinedLocked,
        }
    }

    pub fn is_quarantined(self) -> bool {
        matches!(
            self,
            MessageState::Quarantined | MessageState::QuarantinedLocked
        )
    }

    pub fn is_locked(self) -> bool {
        matches!(
            self,
            MessageState::DeliverableLocked | MessageState::QuarantinedLocked
        )
    }
}

/// Four-way breakdown of the store contents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounts {
    pub deliverable: u64,
    pub deliverable_locked: u64,
    pub quarantined: u64,
    pub quarantined_locked: u64,
}

impl MessageCounts {
    pub fn record(&mut self, state: MessageState) {
        match state {
            MessageState::Deliverable => self.deliverable += 1,
            MessageState::DeliverableLocked => self.deliverable_locked += 1,
            MessageState::Quarantined => self.quarantined += 1,
            MessageState::QuarantinedLocked => self.quarantined_locked += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.deliverable + self.deliverable_locked + self.quarantined + self.quarantined_locked
    }

    pub fn has_quarantined(&self) -> bool {
        self.quarantined > 0 || self.quarantined_locked > 0
    }
}

/// A durable record of intent to deliver `body` under `subject`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sequence_id: SequenceId,
    pub group_key: String,
    pub subject: String,
    pub body: Vec<u8>,
    pub enqueued_at: SystemTime,
    pub available_at: SystemTime,
    pub claim_token: Option<ClaimToken>,
    pub attempt_count: u32,
}

impl Message {
    /// A freshly enqueued message: unclaimed, available immediately.
    pub fn enqueued(
        sequence_id: SequenceId,
        group_key: impl Into<String>,
        subject: impl Into<String>,
        body: Vec<u8>,
        now: SystemTime,
    ) -> Self {
        Self {
            sequence_id,
            group_key: group_key.into(),
            subject: subject.into(),
            body,
            enqueued_at: now,
            available_at: now,
            claim_token: None,
            attempt_count: 0,
        }
    }

    /// Held under a lease that has not yet expired.
    pub fn is_locked(&self, now: SystemTime) -> bool {
        self.claim_token.is_some() && self.available_at > now
    }

    pub fn is_quarantined(&self, max_attempt_count: u32) -> bool {
        self.attempt_count >= max_attempt_count
    }

    pub fn state(&self, now: SystemTime, max_attempt_count: u32) -> MessageState {
        MessageState::classify(self.is_quarantined(max_attempt_count), self.is_locked(now))
    }

    /// Deliverable, unlocked and past its `available_at`.
    pub fn is_claimable(&self, now: SystemTime, max_attempt_count: u32) -> bool {
        !self.is_quarantined(max_attempt_count) && !self.is_locked(now) && self.available_at <= now
    }

    pub fn holds_claim(&self, claim_token: &ClaimToken) -> bool {
        self.claim_token.as_ref() == Some(claim_token)
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn decode_bitcode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(bitcode::deserialize(&self.body)?)
    }
}
