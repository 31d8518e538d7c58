use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use contentrepo_core::ExpectedVersion;
use contentrepo_events::{EventEnvelope, SequenceNumber};
use std::sync::Arc;

/// An event ready to be appended to a stream (not yet assigned a position).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub event_version: u32,
    pub payload: JsonValue,
}

/// A stored event: positioned in its own stream (`version`) and globally
/// (`sequence_number`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub stream_name: String,
    pub version: u64,
    pub sequence_number: SequenceNumber,
    pub event_type: String,
    pub event_version: u32,
    pub recorded_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.stream_name.clone(),
            self.version,
            self.sequence_number,
            self.event_type.clone(),
            self.recorded_at,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event store unavailable: {0}")]
    Storage(String),
}

/// Which events to read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamSelector {
    /// Every stream, in global sequence order.
    #[default]
    All,
    Stream(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Skip events before this sequence number.
    pub min_sequence_number: Option<SequenceNumber>,
    /// Read from the tail towards the head.
    pub backwards: bool,
    pub limit: Option<usize>,
}

impl ReadOptions {
    pub fn forward() -> Self {
        Self::default()
    }

    pub fn with_min_sequence_number(mut self, sequence_number: SequenceNumber) -> Self {
        self.min_sequence_number = Some(sequence_number);
        self
    }

    pub fn backwards(mut self) -> Self {
        self.backwards = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A lazily consumed, ordered sequence of stored events.
pub struct EventStream {
    inner: Box<dyn Iterator<Item = Result<StoredEvent, EventStoreError>> + Send>,
}

impl EventStream {
    pub fn new(
        inner: impl Iterator<Item = Result<StoredEvent, EventStoreError>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    pub fn from_events(events: Vec<StoredEvent>) -> Self {
        Self::new(events.into_iter().map(Ok))
    }

    pub fn empty() -> Self {
        Self::from_events(Vec::new())
    }
}

impl Iterator for EventStream {
    type Item = Result<StoredEvent, EventStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl core::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

/// Append-only event store with gap-free global sequence numbers.
///
/// Implementations must:
/// - assign sequence numbers monotonically (starting at 1, no gaps)
/// - enforce optimistic concurrency per stream via `ExpectedVersion`
/// - return `load` results strictly ordered by sequence number
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        stream_name: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load(
        &self,
        selector: &StreamSelector,
        options: ReadOptions,
    ) -> Result<EventStream, EventStoreError>;

    /// Sequence number of the newest event, `none()` for an empty store.
    fn last_sequence_number(&self) -> Result<SequenceNumber, EventStoreError> {
        let mut tail = self.load(&StreamSelector::All, ReadOptions::forward().backwards().with_limit(1))?;
        match tail.next() {
            Some(event) => Ok(event?.sequence_number),
            None => Ok(SequenceNumber::none()),
        }
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        stream_name: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(stream_name, events, expected_version)
    }

    fn load(
        &self,
        selector: &StreamSelector,
        options: ReadOptions,
    ) -> Result<EventStream, EventStoreError> {
        (**self).load(selector, options)
    }

    fn last_sequence_number(&self) -> Result<SequenceNumber, EventStoreError> {
        (**self).last_sequence_number()
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed event.
    pub fn from_typed<E>(event_id: Uuid, event: &E) -> Result<Self, EventStoreError>
    where
        E: contentrepo_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| EventStoreError::InvalidAppend(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            payload,
        })
    }
}
