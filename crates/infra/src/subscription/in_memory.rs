use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, RwLock};

use chrono::Utc;

use contentrepo_core::SubscriptionId;
use contentrepo_events::{Subscription, Subscriptions};

use super::criteria::SubscriptionCriteria;
use super::store::{SubscriptionStore, SubscriptionStoreError};

/// In-memory subscription store with per-id advisory locks.
///
/// Intended for tests/dev and single-process hosts.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<BTreeMap<SubscriptionId, Subscription>>,
    locks: Mutex<HashSet<SubscriptionId>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        self.subscriptions.read().ok()?.get(id).cloned()
    }

    pub fn is_locked(&self, id: &SubscriptionId) -> bool {
        self.locks.lock().map(|locks| locks.contains(id)).unwrap_or(false)
    }
}

fn poisoned() -> SubscriptionStoreError {
    SubscriptionStoreError::Storage("lock poisoned".to_string())
}

impl SubscriptionStore for InMemorySubscriptionStore {
    fn find_by_criteria(
        &self,
        criteria: &SubscriptionCriteria,
    ) -> Result<Subscriptions, SubscriptionStoreError> {
        let subscriptions = self.subscriptions.read().map_err(|_| poisoned())?;
        Ok(subscriptions
            .values()
            .filter(|s| criteria.matches(s))
            .cloned()
            .collect())
    }

    fn add(&self, subscription: Subscription) -> Result<(), SubscriptionStoreError> {
        let mut subscriptions = self.subscriptions.write().map_err(|_| poisoned())?;
        if subscriptions.contains_key(&subscription.id) {
            return Err(SubscriptionStoreError::Duplicate(subscription.id));
        }
        let subscription = subscription.with_last_saved_at(Utc::now());
        subscriptions.insert(subscription.id.clone(), subscription);
        Ok(())
    }

    fn update(
        &self,
        id: &SubscriptionId,
        change: &dyn Fn(Subscription) -> Subscription,
    ) -> Result<Subscription, SubscriptionStoreError> {
        let mut subscriptions = self.subscriptions.write().map_err(|_| poisoned())?;
        let current = subscriptions
            .get(id)
            .cloned()
            .ok_or_else(|| SubscriptionStoreError::NotFound(id.clone()))?;

        let mut changed = change(current).with_last_saved_at(Utc::now());
        changed.id = id.clone();
        subscriptions.insert(id.clone(), changed.clone());
        Ok(changed)
    }

    fn acquire_lock(&self, id: &SubscriptionId) -> Result<bool, SubscriptionStoreError> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        Ok(locks.insert(id.clone()))
    }

    fn release_lock(&self, id: &SubscriptionId) -> Result<(), SubscriptionStoreError> {
        let mut locks = self.locks.lock().map_err(|_| poisoned())?;
        locks.remove(id);
        Ok(())
    }
}
