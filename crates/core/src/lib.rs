//! `contentrepo-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns)
//! shared by the dimension space, the event model and the infrastructure layer.

pub mod error;
pub mod id;
pub mod value_object;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{
    ContentStreamId, NodeAggregateId, NodeName, NodeTypeName, SubscriptionGroup, SubscriptionId,
};
pub use value_object::ValueObject;
pub use version::ExpectedVersion;
