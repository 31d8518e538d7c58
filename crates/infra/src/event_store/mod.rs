//! Append-only event store boundary.
//!
//! The subscription engine only reads from the store: forward from a minimum
//! sequence number, or backwards to find the current tail.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{
    EventStore, EventStoreError, EventStream, ReadOptions, StoredEvent, StreamSelector,
    UncommittedEvent,
};
