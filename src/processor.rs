//! Outbox processor: one claim / group / deliver / retire cycle per call.
//!
//! Messages of one group are delivered strictly in `sequence_id` order and a
//! failure stops the rest of that group for the run. Groups are independent
//! and are delivered in parallel.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn};

use crate::config::ProcessorSettings;
use crate::error::StoreError;
use crate::message::{ClaimToken, Message, SequenceId};
use crate::publisher::Publisher;
use crate::store::MessageStore;

/// What one processor run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub claimed: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Not attempted because an earlier message of the same group failed.
    pub skipped: usize,
    pub requeued: usize,
    pub dequeued: usize,
    pub store_errors: usize,
}

impl RunReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }
}

#[derive(Debug)]
struct FailedDelivery {
    message: Message,
    error: String,
}

#[derive(Debug, Default)]
struct GroupOutcome {
    delivered: Vec<SequenceId>,
    failed: Option<FailedDelivery>,
    skipped: usize,
}

pub struct OutboxProcessor<S, P> {
    store: S,
    publisher: P,
    settings: ProcessorSettings,
}

impl<S, P> OutboxProcessor<S, P> {
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            settings: ProcessorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> ProcessorSettings {
        self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}

impl<S: MessageStore, P: Publisher> OutboxProcessor<S, P> {
    /// Claim up to `lock_limit` deliverable messages under `claim_token` and
    /// relay them.
    ///
    /// Only a failed claim is returned as an error; delivery failures and
    /// store errors on requeue or dequeue are logged and counted in the
    /// report, and the affected messages are picked up again on a later run.
    pub fn run(&self, claim_token: &ClaimToken) -> Result<RunReport, StoreError> {
        let span = info_span!("outbox_run", claim_token = %claim_token);
        let _enter = span.enter();

        let messages = self
            .store
            .lock_all_deliverable(claim_token, self.settings.lock_limit)?;
        Ok(self.process(claim_token, messages))
    }

    /// Same pipeline over quarantined messages; used for manual re-drive.
    pub fn redrive(&self, claim_token: &ClaimToken) -> Result<RunReport, StoreError> {
        let span = info_span!("outbox_redrive", claim_token = %claim_token);
        let _enter = span.enter();

        let messages = self
            .store
            .lock_all_undeliverable(claim_token, self.settings.lock_limit)?;
        Ok(self.process(claim_token, messages))
    }

    fn process(&self, claim_token: &ClaimToken, messages: Vec<Message>) -> RunReport {
        let mut report = RunReport {
            claimed: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            return report;
        }
        debug!(claimed = report.claimed, "claimed messages");

        let groups = group_by_key(messages);
        let outcomes = self.deliver_groups(&groups);

        let mut delivered = Vec::with_capacity(report.claimed);
        for outcome in outcomes {
            report.delivered += outcome.delivered.len();
            report.skipped += outcome.skipped;
            delivered.extend(outcome.delivered);

            if let Some(failure) = outcome.failed {
                report.failed += 1;
                self.requeue_failed(claim_token, failure, &mut report);
            }
        }

        if !delivered.is_empty() {
            match self.store.dequeue_all(&delivered, claim_token) {
                Ok(()) => report.dequeued = delivered.len(),
                Err(StoreError::NotFound { sequence_ids }) => {
                    report.dequeued = delivered.len().saturating_sub(sequence_ids.len());
                    report.store_errors += 1;
                    warn!(
                        missing = ?sequence_ids,
                        "claim lost before dequeue; messages will be delivered again"
                    );
                }
                Err(err) => {
                    report.store_errors += 1;
                    error!(error = %err, count = delivered.len(), "dequeue failed");
                }
            }
        }

        info!(
            claimed = report.claimed,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "outbox run complete"
        );
        report
    }

    fn deliver_groups(&self, groups: &[Vec<Message>]) -> Vec<GroupOutcome> {
        let publisher = &self.publisher;
        thread::scope(|scope| {
            let handles: Vec<_> = groups
                .iter()
                .map(|group| scope.spawn(move || deliver_group(publisher, group)))
                .collect();

            handles
                .into_iter()
                .zip(groups)
                .map(|(handle, group)| {
                    handle.join().unwrap_or_else(|_| {
                        error!(
                            group_key = %group[0].group_key,
                            "publisher panicked; group left to lease expiry"
                        );
                        GroupOutcome {
                            skipped: group.len(),
                            ..Default::default()
                        }
                    })
                })
                .collect()
        })
    }

    fn requeue_failed(
        &self,
        claim_token: &ClaimToken,
        failure: FailedDelivery,
        report: &mut RunReport,
    ) {
        let message = failure.message;
        let delay = backoff(self.settings.initial_requeue_delay, message.attempt_count);

        warn!(
            sequence_id = %message.sequence_id,
            group_key = %message.group_key,
            subject = %message.subject,
            attempt_count = message.attempt_count,
            error = %failure.error,
            "delivery failed"
        );
        if message.is_quarantined(self.store.settings().max_attempt_count) {
            warn!(
                sequence_id = %message.sequence_id,
                group_key = %message.group_key,
                "message reached the attempt ceiling and is quarantined"
            );
        }

        match self.store.requeue(message.sequence_id, claim_token, delay) {
            Ok(()) => report.requeued += 1,
            Err(err) if err.is_not_found() => {
                report.store_errors += 1;
                warn!(sequence_id = %message.sequence_id, "claim lost before requeue");
            }
            Err(err) => {
                report.store_errors += 1;
                error!(sequence_id = %message.sequence_id, error = %err, "requeue failed");
            }
        }
    }
}

/// Linear backoff: `initial * attempt_count`.
pub fn backoff(initial: Duration, attempt_count: u32) -> Duration {
    initial.checked_mul(attempt_count).unwrap_or(Duration::MAX)
}

/// Partition by `group_key`, keeping groups in order of first appearance and
/// messages within a group in `sequence_id` order.
fn group_by_key(mut messages: Vec<Message>) -> Vec<Vec<Message>> {
    messages.sort_by_key(|message| message.sequence_id);

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<Message>> = Vec::new();
    for message in messages {
        match index.get(&message.group_key) {
            Some(&i) => groups[i].push(message),
            None => {
                index.insert(message.group_key.clone(), groups.len());
                groups.push(vec![message]);
            }
        }
    }
    groups
}

fn deliver_group<P: Publisher + ?Sized>(publisher: &P, group: &[Message]) -> GroupOutcome {
    let mut outcome = GroupOutcome::default();
    for (position, message) in group.iter().enumerate() {
        match publisher.publish(&message.subject, &message.body) {
            Ok(()) => {
                debug!(sequence_id = %message.sequence_id, subject = %message.subject, "delivered");
                outcome.delivered.push(message.sequence_id);
            }
            Err(err) => {
                outcome.failed = Some(FailedDelivery {
                    message: message.clone(),
                    error: err.to_string(),
                });
                outcome.skipped = group.len() - position - 1;
                break;
            }
        }
    }
    outcome
}
