//! Subscription engine: replays the shared event stream into every registered
//! subscriber, tracking a durable position and lifecycle status per subscriber.

pub mod criteria;
pub mod engine;
pub mod in_memory;
pub mod postgres;
pub mod retry;
pub mod store;
pub mod subscribers;

pub use criteria::{SubscriptionCriteria, SubscriptionEngineCriteria};
pub use engine::{EngineError, ProcessedResult, ProcessingError, SubscriptionEngine};
pub use in_memory::InMemorySubscriptionStore;
pub use postgres::PostgresSubscriptionStore;
pub use retry::{
    BackoffRetryStrategy, BackoffStrategy, MaxAttemptsRetryStrategy, NoRetryStrategy,
    RetryPolicy, RetryStrategy,
};
pub use store::{SubscriptionStore, SubscriptionStoreError};
pub use subscribers::{Subscriber, Subscribers};
