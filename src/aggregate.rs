use serde::Serialize;

/// An event raised by an aggregate root and relayed through the outbox.
pub trait DomainEvent: Serialize {
    /// Routing subject; becomes the message's `subject`.
    fn subject(&self) -> &str;
}

/// Events an aggregate has raised since it was last saved.
///
/// Append-only while the aggregate is in memory; drained exactly once by
/// [`AggregateRoot::dispatch_events`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvents<E> {
    events: Vec<E>,
}

impl<E> Default for RecordedEvents<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E> RecordedEvents<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: E) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn as_slice(&self) -> &[E] {
        &self.events
    }

    /// Remove and return every pending event, oldest first.
    pub fn take(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }
}

/// Aggregate roots that raise domain events for the outbox.
///
/// Implementors expose identity and the event buffer; recording, grouping
/// and draining come for free.
pub trait AggregateRoot {
    type Event: DomainEvent;

    /// Type name used as the first half of the group key, e.g. `"Booking"`.
    fn aggregate_type(&self) -> &str;

    fn aggregate_id(&self) -> String;

    fn recorded_events_mut(&mut self) -> &mut RecordedEvents<Self::Event>;

    fn record_event(&mut self, event: Self::Event) {
        self.recorded_events_mut().record(event);
    }

    /// `"{aggregate_type}-{aggregate_id}"`; every event of one instance shares it.
    fn group_key(&self) -> String {
        format!("{}-{}", self.aggregate_type(), self.aggregate_id())
    }

    /// Drain the buffer into `sink` in recording order.
    ///
    /// The buffer is emptied before the first event is handed over, so a
    /// second call never sees the same events. Stops at the first error.
    fn dispatch_events<F, E>(&mut self, mut sink: F) -> Result<usize, E>
    where
        F: FnMut(Self::Event) -> Result<(), E>,
    {
        let events = self.recorded_events_mut().take();
        let dispatched = events.len();
        for event in events {
            sink(event)?;
        }
        Ok(dispatched)
    }
}
