use std::sync::Arc;

use thiserror::Error;

use contentrepo_core::SubscriptionId;
use contentrepo_events::{Subscription, Subscriptions};

use super::criteria::SubscriptionCriteria;

#[derive(Debug, Error)]
pub enum SubscriptionStoreError {
    #[error("subscription '{0}' already exists")]
    Duplicate(SubscriptionId),

    #[error("subscription '{0}' not found")]
    NotFound(SubscriptionId),

    #[error("stored subscription is malformed: {0}")]
    Malformed(String),

    #[error("subscription store unavailable: {0}")]
    Storage(String),
}

/// Durable per-subscriber progress, plus advisory per-subscription locks.
///
/// Implementations stamp `last_saved_at` on every `add`/`update`. Locks are
/// advisory: only the engine consults them, and only the holder of a lock may
/// change that subscription's position or status.
pub trait SubscriptionStore: Send + Sync {
    /// Create the backing storage if needed.
    fn setup(&self) -> Result<(), SubscriptionStoreError> {
        Ok(())
    }

    /// Matching subscriptions, ordered by id.
    fn find_by_criteria(
        &self,
        criteria: &SubscriptionCriteria,
    ) -> Result<Subscriptions, SubscriptionStoreError>;

    fn add(&self, subscription: Subscription) -> Result<(), SubscriptionStoreError>;

    /// Replace a subscription with `change(current)` and return the stored result.
    fn update(
        &self,
        id: &SubscriptionId,
        change: &dyn Fn(Subscription) -> Subscription,
    ) -> Result<Subscription, SubscriptionStoreError>;

    /// Try once to take the lock; `false` when another holder has it.
    fn acquire_lock(&self, id: &SubscriptionId) -> Result<bool, SubscriptionStoreError>;

    fn release_lock(&self, id: &SubscriptionId) -> Result<(), SubscriptionStoreError>;
}

impl<S> SubscriptionStore for Arc<S>
where
    S: SubscriptionStore + ?Sized,
{
    fn setup(&self) -> Result<(), SubscriptionStoreError> {
        (**self).setup()
    }

    fn find_by_criteria(
        &self,
        criteria: &SubscriptionCriteria,
    ) -> Result<Subscriptions, SubscriptionStoreError> {
        (**self).find_by_criteria(criteria)
    }

    fn add(&self, subscription: Subscription) -> Result<(), SubscriptionStoreError> {
        (**self).add(subscription)
    }

    fn update(
        &self,
        id: &SubscriptionId,
        change: &dyn Fn(Subscription) -> Subscription,
    ) -> Result<Subscription, SubscriptionStoreError> {
        (**self).update(id, change)
    }

    fn acquire_lock(&self, id: &SubscriptionId) -> Result<bool, SubscriptionStoreError> {
        (**self).acquire_lock(id)
    }

    fn release_lock(&self, id: &SubscriptionId) -> Result<(), SubscriptionStoreError> {
        (**self).release_lock(id)
    }
}
