use booking_outbox::{AggregateRoot, DomainEvent, RecordedEvents};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BookingEvent {
    BookingCreated { booking_id: String, guest: String, room: String },
    BookingConfirmed { booking_id: String },
    BookingCancelled { booking_id: String, reason: String },
}

impl DomainEvent for BookingEvent {
    fn subject(&self) -> &str {
        match self {
            BookingEvent::BookingCreated { .. } => "BookingCreated",
            BookingEvent::BookingConfirmed { .. } => "BookingConfirmed",
            BookingEvent::BookingCancelled { .. } => "BookingCancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Requested,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "requested",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    NotRequested(BookingStatus),
    AlreadyCancelled,
}

#[derive(Debug)]
pub struct Booking {
    pub id: String,
    pub guest: String,
    pub room: String,
    pub status: BookingStatus,
    events: RecordedEvents<BookingEvent>,
}

impl Booking {
    pub fn create(id: &str, guest: &str, room: &str) -> Self {
        let mut booking = Booking {
            id: id.to_string(),
            guest: guest.to_string(),
            room: room.to_string(),
            status: BookingStatus::Requested,
            events: RecordedEvents::new(),
        };
        booking.record_event(BookingEvent::BookingCreated {
            booking_id: id.to_string(),
            guest: guest.to_string(),
            room: room.to_string(),
        });
        booking
    }

    pub fn confirm(&mut self) -> Result<(), BookingError> {
        if self.status != BookingStatus::Requested {
            return Err(BookingError::NotRequested(self.status));
        }
        self.status = BookingStatus::Confirmed;
        self.record_event(BookingEvent::BookingConfirmed {
            booking_id: self.id.clone(),
        });
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str) -> Result<(), BookingError> {
        if self.status == BookingStatus::Cancelled {
            return Err(BookingError::AlreadyCancelled);
        }
        self.status = BookingStatus::Cancelled;
        self.record_event(BookingEvent::BookingCancelled {
            booking_id: self.id.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}

impl AggregateRoot for Booking {
    type Event = BookingEvent;

    fn aggregate_type(&self) -> &str {
        "Booking"
    }

    fn aggregate_id(&self) -> String {
        self.id.clone()
    }

    fn recorded_events_mut(&mut self) -> &mut RecordedEvents<BookingEvent> {
        &mut self.events
    }
}
