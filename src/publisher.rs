use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

/// Downstream event publication.
///
/// Called concurrently from one thread per message group, so implementations
/// must be `Sync`. Delivery is at-least-once: the same subject and body can
/// be handed over again after a crash or an expired lease.
pub trait Publisher: Send + Sync {
    type Error: fmt::Display;

    fn publish(&self, subject: &str, body: &[u8]) -> Result<(), Self::Error>;
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    type Error = P::Error;

    fn publish(&self, subject: &str, body: &[u8]) -> Result<(), Self::Error> {
        (**self).publish(subject, body)
    }
}

impl<P: Publisher + ?Sized> Publisher for &P {
    type Error = P::Error;

    fn publish(&self, subject: &str, body: &[u8]) -> Result<(), Self::Error> {
        (**self).publish(subject, body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogPublisherError {
    #[error("log publisher buffer poisoned")]
    BufferPoisoned,
}

/// Publishes by logging, optionally capturing lines in a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct LogPublisher {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogPublisher {
            buffer: Some(buffer),
        }
    }
}

impl Publisher for LogPublisher {
    type Error = LogPublisherError;

    fn publish(&self, subject: &str, body: &[u8]) -> Result<(), Self::Error> {
        let body = String::from_utf8_lossy(body);
        info!(target: "outbox", subject, body = %body, "published");
        if let Some(buffer) = &self.buffer {
            buffer
                .lock()
                .map_err(|_| LogPublisherError::BufferPoisoned)?
                .push(format!("{} {}", subject, body));
        }
        Ok(())
    }
}

/// Adapts a closure into a [`Publisher`].
pub struct FnPublisher<F>(F);

impl<F> FnPublisher<F> {
    pub fn new(f: F) -> Self {
        FnPublisher(f)
    }
}

impl<F, E> Publisher for FnPublisher<F>
where
    F: Fn(&str, &[u8]) -> Result<(), E> + Send + Sync,
    E: fmt::Display,
{
    type Error = E;

    fn publish(&self, subject: &str, body: &[u8]) -> Result<(), Self::Error> {
        (self.0)(subject, body)
    }
}
