//! Outbox health: degraded while any message sits in quarantine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::MessageCounts;
use crate::store::MessageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Relay works, but some messages need operator attention.
    Degraded,
    /// The store could not be read.
    Unhealthy,
}

impl HealthStatus {
    /// Healthy or degraded; the service can keep taking traffic.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxHealth {
    pub status: HealthStatus,
    pub message: String,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl OutboxHealth {
    fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Classify a `count()` result.
    pub fn from_counts(counts: Result<MessageCounts, StoreError>) -> Self {
        let counts = match counts {
            Ok(counts) => counts,
            Err(err) => {
                return Self::new(HealthStatus::Unhealthy, "outbox store unavailable")
                    .with_detail("error", err.to_string());
            }
        };

        let health = if counts.has_quarantined() {
            Self::new(HealthStatus::Degraded, "quarantined outbox messages present")
        } else {
            Self::new(HealthStatus::Healthy, "outbox draining normally")
        };
        health
            .with_detail("deliverable", counts.deliverable)
            .with_detail("deliverable_locked", counts.deliverable_locked)
            .with_detail("quarantined", counts.quarantined)
            .with_detail("quarantined_locked", counts.quarantined_locked)
            .with_detail("total", counts.total())
    }
}

/// Read-only health probe over a message store.
pub struct OutboxHealthIndicator<S> {
    store: S,
}

impl<S: MessageStore> OutboxHealthIndicator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn check(&self) -> OutboxHealth {
        OutboxHealth::from_counts(self.store.count())
    }
}
