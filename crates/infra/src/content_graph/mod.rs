//! Content graph read side: node aggregates assembled from coverage rows, the
//! events that produce those rows, and an in-memory projection over them.

pub mod assembler;
pub mod events;
pub mod node_aggregate;
pub mod projection;

pub use assembler::{
    AssemblyError, NodeAggregateStream, NodeRow, assemble_node_aggregate, assemble_node_aggregates,
};
pub use events::{
    ContentGraphEvent, NodeAggregateWasDisabled, NodeAggregateWasEnabled,
    NodeAggregateWithNodeWasCreated, NodeVariantWasCreated,
};
pub use node_aggregate::{NodeAggregate, NodeAggregateClassification, RelationDistributionStrategy};
pub use projection::InMemoryContentGraphProjection;
