use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use contentrepo_core::ExpectedVersion;
use contentrepo_events::SequenceNumber;

use super::r#trait::{
    EventStore, EventStoreError, EventStream, ReadOptions, StoredEvent, StreamSelector,
    UncommittedEvent,
};

#[derive(Debug, Default)]
struct Log {
    /// All events in global order; index `i` holds sequence number `i + 1`.
    events: Vec<StoredEvent>,
    stream_versions: HashMap<String, u64>,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. `load` snapshots the matching events, so appends made
/// while a stream is consumed are not observed by that stream.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.read().map(|log| log.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        stream_name: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if stream_name.is_empty() {
            return Err(EventStoreError::InvalidAppend(
                "stream name must not be empty".to_string(),
            ));
        }

        let mut log = self
            .log
            .write()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        let current = log.stream_versions.get(stream_name).copied().unwrap_or(0);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "stream '{stream_name}': expected {expected_version:?}, found {current}"
            )));
        }
        if events.is_empty() {
            return Ok(vec![]);
        }

        let recorded_at = Utc::now();
        let mut version = current;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            version += 1;
            let stored = StoredEvent {
                event_id: e.event_id,
                stream_name: stream_name.to_string(),
                version,
                sequence_number: SequenceNumber::new(log.events.len() as u64 + 1),
                event_type: e.event_type,
                event_version: e.event_version,
                recorded_at,
                payload: e.payload,
            };
            log.events.push(stored.clone());
            committed.push(stored);
        }
        log.stream_versions.insert(stream_name.to_string(), version);

        Ok(committed)
    }

    fn load(
        &self,
        selector: &StreamSelector,
        options: ReadOptions,
    ) -> Result<EventStream, EventStoreError> {
        let log = self
            .log
            .read()
            .map_err(|_| EventStoreError::Storage("lock poisoned".to_string()))?;

        let min = options.min_sequence_number.unwrap_or_default();
        let matches = |e: &&StoredEvent| {
            e.sequence_number >= min
                && match selector {
                    StreamSelector::All => true,
                    StreamSelector::Stream(name) => &e.stream_name == name,
                }
        };
        let limit = options.limit.unwrap_or(usize::MAX);

        let events: Vec<StoredEvent> = if options.backwards {
            log.events.iter().rev().filter(matches).take(limit).cloned().collect()
        } else {
            log.events.iter().filter(matches).take(limit).cloned().collect()
        };
        Ok(EventStream::from_events(events))
    }
}
