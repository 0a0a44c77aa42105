use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};

use tracing::debug;

use super::{Enqueue, MessageStore};
use crate::clock::{deadline, Clock, SystemClock};
use crate::config::StoreSettings;
use crate::error::StoreError;
use crate::message::{ClaimToken, Message, MessageCounts, SequenceId};

type Rows = BTreeMap<SequenceId, Message>;

/// In-process message store.
///
/// Cloning yields another handle to the same rows, so a clone can be moved
/// into a worker thread while the original keeps enqueueing. All claim
/// operations run under one write lock, which makes claim-and-update atomic.
///
/// Transactions are serialized, so sequence ids become visible in the order
/// they were assigned.
#[derive(Clone)]
pub struct InMemoryMessageStore {
    rows: Arc<RwLock<Rows>>,
    next_sequence: Arc<AtomicI64>,
    writer: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
    settings: StoreSettings,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
            next_sequence: Arc::new(AtomicI64::new(1)),
            writer: Arc::new(Mutex::new(())),
            clock: Arc::new(SystemClock),
            settings: StoreSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Run `f` as one unit of work.
    ///
    /// Messages enqueued through the transaction become visible only if `f`
    /// returns `Ok`. Sequence ids handed out to a discarded transaction are
    /// never reused.
    ///
    /// Only one transaction runs at a time, so `f` must not enqueue through
    /// the store directly; use the transaction it is given.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut InMemoryTransaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut tx = InMemoryTransaction {
            store: self,
            _writer: self.writer(),
            staged: Vec::new(),
        };
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Every stored message, in sequence order.
    pub fn messages(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.read("messages")?.values().cloned().collect())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read("len")?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn allocate_sequence(&self) -> SequenceId {
        SequenceId(self.next_sequence.fetch_add(1, Ordering::SeqCst))
    }

    // Guards no data, so a panicked transaction leaves nothing to repair.
    fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self, operation: &'static str) -> Result<RwLockReadGuard<'_, Rows>, StoreError> {
        self.rows
            .read()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    fn write(&self, operation: &'static str) -> Result<RwLockWriteGuard<'_, Rows>, StoreError> {
        self.rows
            .write()
            .map_err(|_| StoreError::LockPoisoned(operation))
    }

    fn lock_matching<F>(
        &self,
        operation: &'static str,
        claim_token: &ClaimToken,
        limit: usize,
        mut eligible: F,
    ) -> Result<Vec<Message>, StoreError>
    where
        F: FnMut(&Message, SystemTime) -> bool,
    {
        let now = self.clock.now();
        let lease_end = deadline(now, self.settings.lock_duration);
        let mut rows = self.write(operation)?;

        let mut locked = Vec::new();
        for message in rows.values_mut() {
            if locked.len() >= limit {
                break;
            }
            if !eligible(message, now) {
                continue;
            }
            message.claim_token = Some(claim_token.clone());
            message.available_at = lease_end;
            message.attempt_count += 1;
            locked.push(message.clone());
        }

        debug!(
            operation,
            claim_token = %claim_token,
            locked = locked.len(),
            "locked messages"
        );
        Ok(locked)
    }

    /// Apply `update` to every listed row still held by `claim_token`.
    fn update_claimed<F>(
        &self,
        operation: &'static str,
        sequence_ids: &[SequenceId],
        claim_token: &ClaimToken,
        mut update: F,
    ) -> Result<(), StoreError>
    where
        F: FnMut(&mut Rows, SequenceId),
    {
        let mut rows = self.write(operation)?;
        let mut missing = Vec::new();

        for &sequence_id in sequence_ids {
            let held = rows
                .get(&sequence_id)
                .is_some_and(|message| message.holds_claim(claim_token));
            if held {
                update(&mut *rows, sequence_id);
            } else {
                missing.push(sequence_id);
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                sequence_ids: missing,
            })
        }
    }
}

impl MessageStore for InMemoryMessageStore {
    fn settings(&self) -> StoreSettings {
        self.settings
    }

    fn enqueue(
        &self,
        group_key: &str,
        subject: &str,
        body: Vec<u8>,
    ) -> Result<Message, StoreError> {
        self.transaction(|tx| tx.enqueue(group_key, subject, body))
    }

    fn count(&self) -> Result<MessageCounts, StoreError> {
        let now = self.clock.now();
        let max = self.settings.max_attempt_count;
        let rows = self.read("count")?;

        let mut counts = MessageCounts::default();
        for message in rows.values() {
            counts.record(message.state(now, max));
        }
        Ok(counts)
    }

    fn peek(&self, sequence_id: SequenceId) -> Result<Message, StoreError> {
        self.read("peek")?
            .get(&sequence_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(sequence_id))
    }

    fn peek_all(&self, offset: usize, limit: usize) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .read("peek_all")?
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn lock_all_deliverable(
        &self,
        claim_token: &ClaimToken,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let max = self.settings.max_attempt_count;
        // Groups whose earliest pending message is leased or backing off.
        let mut held_back: HashSet<String> = HashSet::new();
        self.lock_matching("lock_all_deliverable", claim_token, limit, |message, now| {
            if message.is_quarantined(max) || held_back.contains(&message.group_key) {
                return false;
            }
            if !message.is_claimable(now, max) {
                held_back.insert(message.group_key.clone());
                return false;
            }
            true
        })
    }

    fn lock_all_undeliverable(
        &self,
        claim_token: &ClaimToken,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let max = self.settings.max_attempt_count;
        self.lock_matching("lock_all_undeliverable", claim_token, limit, |message, now| {
            message.is_quarantined(max) && !message.is_locked(now)
        })
    }

    fn lock(
        &self,
        sequence_id: SequenceId,
        claim_token: &ClaimToken,
    ) -> Result<Message, StoreError> {
        let now = self.clock.now();
        let mut rows = self.write("lock")?;

        match rows.get_mut(&sequence_id) {
            Some(message) if !message.is_locked(now) => {
                message.claim_token = Some(claim_token.clone());
                message.available_at = deadline(now, self.settings.lock_duration);
                Ok(message.clone())
            }
            _ => Err(StoreError::not_found(sequence_id)),
        }
    }

    fn requeue(
        &self,
        sequence_id: SequenceId,
        claim_token: &ClaimToken,
        delay: Duration,
    ) -> Result<(), StoreError> {
        self.requeue_all(&[sequence_id], claim_token, delay)
    }

    fn requeue_all(
        &self,
        sequence_ids: &[SequenceId],
        claim_token: &ClaimToken,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let available_at = deadline(self.clock.now(), delay);
        self.update_claimed("requeue", sequence_ids, claim_token, |rows, sequence_id| {
            if let Some(message) = rows.get_mut(&sequence_id) {
                message.claim_token = None;
                message.available_at = available_at;
            }
        })
    }

    fn redrive(&self, sequence_id: SequenceId, claim_token: &ClaimToken) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.update_claimed("redrive", &[sequence_id], claim_token, |rows, sequence_id| {
            if let Some(message) = rows.get_mut(&sequence_id) {
                message.claim_token = None;
                message.available_at = now;
                message.attempt_count = 0;
            }
        })
    }

    fn dequeue(&self, sequence_id: SequenceId, claim_token: &ClaimToken) -> Result<(), StoreError> {
        self.dequeue_all(&[sequence_id], claim_token)
    }

    fn dequeue_all(
        &self,
        sequence_ids: &[SequenceId],
        claim_token: &ClaimToken,
    ) -> Result<(), StoreError> {
        self.update_claimed("dequeue", sequence_ids, claim_token, |rows, sequence_id| {
            rows.remove(&sequence_id);
        })
    }
}

/// Unit of work handed out by [`InMemoryMessageStore::transaction`].
pub struct InMemoryTransaction<'a> {
    store: &'a InMemoryMessageStore,
    _writer: MutexGuard<'a, ()>,
    staged: Vec<Message>,
}

impl InMemoryTransaction<'_> {
    /// Messages enqueued so far in this transaction.
    pub fn staged(&self) -> &[Message] {
        &self.staged
    }

    fn commit(self) -> Result<(), StoreError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let mut rows = self.store.write("commit")?;
        for message in self.staged {
            rows.insert(message.sequence_id, message);
        }
        Ok(())
    }
}

impl Enqueue for InMemoryTransaction<'_> {
    fn enqueue(
        &mut self,
        group_key: &str,
        subject: &str,
        body: Vec<u8>,
    ) -> Result<Message, StoreError> {
        let message = Message::enqueued(
            self.store.allocate_sequence(),
            group_key,
            subject,
            body,
            self.store.clock.now(),
        );
        debug!(
            sequence_id = %message.sequence_id,
            group_key,
            subject,
            "enqueued message"
        );
        self.staged.push(message.clone());
        Ok(message)
    }
}
