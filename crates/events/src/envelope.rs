use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Global, gap-free position of an event in the event store.
///
/// `SequenceNumber::none()` (zero) is the position of a subscriber that has not
/// processed anything yet; the first stored event has sequence number 1.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope for an event, containing stream and position metadata.
///
/// Notes:
/// - `version` is the position inside the event's own stream.
/// - `sequence_number` is the global position across all streams; this is what
///   subscriptions track.
/// - `payload` is the domain-agnostic event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    stream_name: String,
    version: u64,
    sequence_number: SequenceNumber,
    event_type: String,
    recorded_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        stream_name: impl Into<String>,
        version: u64,
        sequence_number: SequenceNumber,
        event_type: impl Into<String>,
        recorded_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_name: stream_name.into(),
            version,
            sequence_number,
            event_type: event_type.into(),
            recorded_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Same metadata, different payload (e.g. after deserializing a JSON payload).
    pub fn with_payload<T>(&self, payload: T) -> EventEnvelope<T> {
        EventEnvelope {
            event_id: self.event_id,
            stream_name: self.stream_name.clone(),
            version: self.version,
            sequence_number: self.sequence_number,
            event_type: self.event_type.clone(),
            recorded_at: self.recorded_at,
            payload,
        }
    }
}
