//! Background trigger for the outbox processor.
//!
//! Runs the processor on its own thread every `poll_interval`, with a fresh
//! claim token per run. Several pollers (in one process or many) can share a
//! store; the claim protocol keeps them from delivering the same message
//! concurrently.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::config::OutboxConfig;
use crate::message::ClaimToken;
use crate::processor::OutboxProcessor;
use crate::publisher::Publisher;
use crate::store::MessageStore;

/// Totals accumulated by a poller over its lifetime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollerStats {
    pub runs: usize,
    pub delivered: usize,
    pub failed: usize,
    pub errors: usize,
}

/// A thread that calls [`OutboxProcessor::run`] on a fixed cadence.
///
/// ```ignore
/// let config = OutboxConfig::from_env()?;
/// let processor = OutboxProcessor::new(store.clone(), publisher)
///     .with_settings(config.processor_settings());
///
/// if let Some(poller) = OutboxPoller::spawn(processor, &config) {
///     // ... serve traffic ...
///     let stats = poller.stop();
/// }
/// ```
pub struct OutboxPoller {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<PollerStats>>,
}

impl OutboxPoller {
    /// Start polling, or return `None` when the relay is disabled or the
    /// poll interval is not positive.
    pub fn spawn<S, P>(processor: OutboxProcessor<S, P>, config: &OutboxConfig) -> Option<Self>
    where
        S: MessageStore + 'static,
        P: Publisher + 'static,
    {
        if !config.polling_enabled() {
            info!(
                enabled = config.enabled,
                poll_interval_ms = config.poll_interval_ms,
                "outbox polling disabled"
            );
            return None;
        }

        let poll_interval = config.poll_interval();
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = PollerStats::default();
            info!(poll_interval_ms = poll_interval.as_millis() as u64, "outbox poller started");

            loop {
                stats.runs += 1;
                match processor.run(&ClaimToken::new()) {
                    Ok(report) => {
                        stats.delivered += report.delivered;
                        stats.failed += report.failed;
                        stats.errors += report.store_errors;
                    }
                    Err(err) => {
                        stats.errors += 1;
                        error!(error = %err, "outbox claim failed");
                    }
                }

                match stop_rx.recv_timeout(poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            debug!(runs = stats.runs, "outbox poller stopped");
            stats
        });

        Some(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Signal the poller to stop and wait for the current run to finish.
    pub fn stop(mut self) -> PollerStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => PollerStats::default(),
        }
    }

    /// Signal the poller to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for OutboxPoller {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
