//! Infrastructure layer: event store boundary, subscription engine and stores,
//! content graph read side, background workers, configuration.

pub mod config;
pub mod content_graph;
pub mod event_store;
pub mod subscription;
pub mod workers;
