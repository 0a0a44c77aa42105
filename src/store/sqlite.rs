use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::{Enqueue, MessageStore};
use crate::clock::{deadline, from_millis, to_millis, Clock, SystemClock};
use crate::config::StoreSettings;
use crate::error::StoreError;
use crate::message::{ClaimToken, Message, MessageCounts, MessageState, SequenceId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS outbox_message (
    sequence_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    group_key     TEXT    NOT NULL,
    subject       TEXT    NOT NULL,
    body          BLOB    NOT NULL,
    enqueued_at   INTEGER NOT NULL,
    available_at  INTEGER NOT NULL,
    claim_token   TEXT,
    attempt_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS outbox_message_claimable
    ON outbox_message (attempt_count, available_at);
CREATE INDEX IF NOT EXISTS outbox_message_claim_token
    ON outbox_message (claim_token);
CREATE INDEX IF NOT EXISTS outbox_message_group
    ON outbox_message (group_key, sequence_id);
";

const COLUMNS: &str = "sequence_id, group_key, subject, body, enqueued_at, available_at, \
                       claim_token, attempt_count";

/// Durable message store on a single SQLite connection.
///
/// `sequence_id` is an `AUTOINCREMENT` key, so ids are never reused even
/// after the newest row is dequeued. Claims run in `BEGIN IMMEDIATE`
/// transactions, which serializes claimers across processes sharing the file.
pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    settings: StoreSettings,
}

impl SqliteMessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, creating the outbox table if needed.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
            settings: StoreSettings::default(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Run `f` inside one SQL transaction on the store's connection.
    ///
    /// The closure can write its own tables through the transaction (it
    /// derefs to [`rusqlite::Transaction`]) and enqueue messages through
    /// [`Enqueue`]; both commit together or not at all.
    ///
    /// The connection is held for the whole closure, so `f` must not call
    /// back into this store.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut SqliteTransaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let mut tx = SqliteTransaction {
            tx,
            clock: self.clock.as_ref(),
        };
        let value = f(&mut tx)?;
        tx.tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned("sqlite connection"))
    }

    fn lock_where(
        &self,
        operation: &'static str,
        predicate: &str,
        claim_token: &ClaimToken,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let now = self.clock.now();
        let lease_end = deadline(now, self.settings.lock_duration);
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut messages = {
            let sql = format!(
                "SELECT {COLUMNS} FROM outbox_message m WHERE {predicate} \
                 ORDER BY sequence_id LIMIT ?3"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(
                params![
                    self.settings.max_attempt_count,
                    to_millis(now),
                    limit as i64
                ],
                read_message,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        {
            let mut claim = tx.prepare(
                "UPDATE outbox_message \
                 SET claim_token = ?1, available_at = ?2, attempt_count = attempt_count + 1 \
                 WHERE sequence_id = ?3",
            )?;
            for message in &mut messages {
                claim.execute(params![
                    claim_token.as_str(),
                    to_millis(lease_end),
                    message.sequence_id.value()
                ])?;
                message.claim_token = Some(claim_token.clone());
                message.available_at = from_millis(to_millis(lease_end));
                message.attempt_count += 1;
            }
        }
        tx.commit()?;

        debug!(
            operation,
            claim_token = %claim_token,
            locked = messages.len(),
            "locked messages"
        );
        Ok(messages)
    }

    /// Run `statement` (binding `?1` = id, `?2` = token) for every id and
    /// report the ids that affected no row.
    fn update_claimed(
        &self,
        statement: &str,
        sequence_ids: &[SequenceId],
        claim_token: &ClaimToken,
        extra: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut missing = Vec::new();
        {
            let mut stmt = tx.prepare(statement)?;
            for &sequence_id in sequence_ids {
                let affected = match extra {
                    Some(value) => {
                        stmt.execute(params![sequence_id.value(), claim_token.as_str(), value])?
                    }
                    None => stmt.execute(params![sequence_id.value(), claim_token.as_str()])?,
                };
                if affected == 0 {
                    missing.push(sequence_id);
                }
            }
        }
        tx.commit()?;

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                sequence_ids: missing,
            })
        }
    }
}

impl MessageStore for SqliteMessageStore {
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
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT attempt_count >= ?1 AS quarantined, \
                    (claim_token IS NOT NULL AND available_at > ?2) AS locked, \
                    COUNT(*) \
             FROM outbox_message GROUP BY quarantined, locked",
        )?;
        let rows = stmt.query_map(
            params![
                self.settings.max_attempt_count,
                to_millis(self.clock.now())
            ],
            |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )?;

        let mut counts = MessageCounts::default();
        for row in rows {
            let (quarantined, locked, n) = row?;
            let n = n as u64;
            match MessageState::classify(quarantined, locked) {
                MessageState::Deliverable => counts.deliverable += n,
                MessageState::DeliverableLocked => counts.deliverable_locked += n,
                MessageState::Quarantined => counts.quarantined += n,
                MessageState::QuarantinedLocked => counts.quarantined_locked += n,
            }
        }
        Ok(counts)
    }

    fn peek(&self, sequence_id: SequenceId) -> Result<Message, StoreError> {
        let conn = self.conn()?;
        select_one(&conn, sequence_id)?.ok_or_else(|| StoreError::not_found(sequence_id))
    }

    fn peek_all(&self, offset: usize, limit: usize) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM outbox_message ORDER BY sequence_id LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], read_message)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn lock_all_deliverable(
        &self,
        claim_token: &ClaimToken,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.lock_where(
            "lock_all_deliverable",
            "attempt_count < ?1 AND available_at <= ?2 \
             AND NOT EXISTS (SELECT 1 FROM outbox_message p \
                             WHERE p.group_key = m.group_key \
                               AND p.sequence_id < m.sequence_id \
                               AND p.attempt_count < ?1 \
                               AND p.available_at > ?2)",
            claim_token,
            limit,
        )
    }

    fn lock_all_undeliverable(
        &self,
        claim_token: &ClaimToken,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        self.lock_where(
            "lock_all_undeliverable",
            "attempt_count >= ?1 AND (claim_token IS NULL OR available_at <= ?2)",
            claim_token,
            limit,
        )
    }

    fn lock(
        &self,
        sequence_id: SequenceId,
        claim_token: &ClaimToken,
    ) -> Result<Message, StoreError> {
        let now = self.clock.now();
        let lease_end = deadline(now, self.settings.lock_duration);
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let affected = tx.execute(
            "UPDATE outbox_message SET claim_token = ?1, available_at = ?2 \
             WHERE sequence_id = ?3 AND (claim_token IS NULL OR available_at <= ?4)",
            params![
                claim_token.as_str(),
                to_millis(lease_end),
                sequence_id.value(),
                to_millis(now)
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::not_found(sequence_id));
        }
        let message = select_one(&tx, sequence_id)?;
        tx.commit()?;
        message.ok_or_else(|| StoreError::not_found(sequence_id))
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
        let available_at = to_millis(deadline(self.clock.now(), delay));
        self.update_claimed(
            "UPDATE outbox_message SET claim_token = NULL, available_at = ?3 \
             WHERE sequence_id = ?1 AND claim_token = ?2",
            sequence_ids,
            claim_token,
            Some(available_at),
        )
    }

    fn redrive(&self, sequence_id: SequenceId, claim_token: &ClaimToken) -> Result<(), StoreError> {
        let now = to_millis(self.clock.now());
        self.update_claimed(
            "UPDATE outbox_message SET claim_token = NULL, available_at = ?3, attempt_count = 0 \
             WHERE sequence_id = ?1 AND claim_token = ?2",
            &[sequence_id],
            claim_token,
            Some(now),
        )
    }

    fn dequeue(&self, sequence_id: SequenceId, claim_token: &ClaimToken) -> Result<(), StoreError> {
        self.dequeue_all(&[sequence_id], claim_token)
    }

    fn dequeue_all(
        &self,
        sequence_ids: &[SequenceId],
        claim_token: &ClaimToken,
    ) -> Result<(), StoreError> {
        self.update_claimed(
            "DELETE FROM outbox_message WHERE sequence_id = ?1 AND claim_token = ?2",
            sequence_ids,
            claim_token,
            None,
        )
    }
}

/// Transaction handed out by [`SqliteMessageStore::transaction`].
pub struct SqliteTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
    clock: &'conn dyn Clock,
}

impl<'conn> Deref for SqliteTransaction<'conn> {
    type Target = rusqlite::Transaction<'conn>;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl Enqueue for SqliteTransaction<'_> {
    fn enqueue(
        &mut self,
        group_key: &str,
        subject: &str,
        body: Vec<u8>,
    ) -> Result<Message, StoreError> {
        let now = from_millis(to_millis(self.clock.now()));
        self.tx.execute(
            "INSERT INTO outbox_message \
             (group_key, subject, body, enqueued_at, available_at, claim_token, attempt_count) \
             VALUES (?1, ?2, ?3, ?4, ?4, NULL, 0)",
            params![group_key, subject, body, to_millis(now)],
        )?;
        let sequence_id = SequenceId(self.tx.last_insert_rowid());
        debug!(sequence_id = %sequence_id, group_key, subject, "enqueued message");
        Ok(Message::enqueued(sequence_id, group_key, subject, body, now))
    }
}

fn select_one(conn: &Connection, sequence_id: SequenceId) -> Result<Option<Message>, StoreError> {
    let sql = format!("SELECT {COLUMNS} FROM outbox_message WHERE sequence_id = ?1");
    Ok(conn
        .query_row(&sql, params![sequence_id.value()], read_message)
        .optional()?)
}

fn read_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        sequence_id: SequenceId(row.get(0)?),
        group_key: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        enqueued_at: from_millis(row.get(4)?),
        available_at: from_millis(row.get(5)?),
        claim_token: row.get::<_, Option<String>>(6)?.map(ClaimToken::from),
        attempt_count: row.get(7)?,
    })
}
