//! Event model shared by the event store, the subscription engine and projections.
//!
//! - [`EventEnvelope`]: an event payload with its stream and global position
//! - [`Subscription`]: a subscriber's durable progress marker and lifecycle status
//! - [`SubscriptionHandler`]: the capability the engine dispatches events to
//! - [`Projection`]: typed read-model builder, adapted by [`ProjectionHandler`]

pub mod envelope;
pub mod event;
pub mod handler;
pub mod projection;
pub mod subscription;

pub use envelope::{EventEnvelope, SequenceNumber};
pub use event::Event;
pub use handler::{FnHandler, HandlerChain, SubscriptionHandler};
pub use projection::{Projection, ProjectionHandler};
pub use subscription::{
    RunMode, Subscription, SubscriptionError, SubscriptionStatus, Subscriptions,
};
