use thiserror::Error;

use crate::message::SequenceId;

/// Errors raised by [`MessageStore`](crate::MessageStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The targeted rows do not exist, or their claim token no longer matches.
    ///
    /// For batch operations this lists only the ids that were not affected;
    /// every other row in the batch was updated.
    #[error("message(s) not found or claim lost: {sequence_ids:?}")]
    NotFound { sequence_ids: Vec<SequenceId> },

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn not_found(sequence_id: SequenceId) -> Self {
        StoreError::NotFound {
            sequence_ids: vec![sequence_id],
        }
    }

    /// True for a missing row or a lost claim; callers treat these as a no-op.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

impl From<bitcode::Error> for StoreError {
    fn from(err: bitcode::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}

/// Errors raised while loading or validating [`OutboxConfig`](crate::OutboxConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
}
